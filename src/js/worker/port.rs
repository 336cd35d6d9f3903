// Worker message port - the two queues and lifecycle flag shared by an owner and its worker

use super::queue::{Message, MessageQueue};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Identifier of a worker, unique within its owning registry
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one worker
///
/// Transitions only ever move forward, so the state is stored as a monotonic
/// atomic and readers never need a lock.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum WorkerState {
    Constructing = 0,
    Running = 1,
    Terminating = 2,
    Terminated = 3,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::Constructing,
            1 => WorkerState::Running,
            2 => WorkerState::Terminating,
            _ => WorkerState::Terminated,
        }
    }
}

/// Communication contract for one worker
///
/// `to_worker` carries owner→worker messages, `to_owner` carries
/// worker→owner messages. Per-queue order is FIFO; there is no ordering
/// between the two directions.
#[derive(Debug)]
pub struct WorkerPort {
    id: WorkerId,
    label: String,
    to_worker: MessageQueue,
    to_owner: MessageQueue,
    state: AtomicU8,
}

impl WorkerPort {
    pub fn new(id: WorkerId, label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            label: label.into(),
            to_worker: MessageQueue::new(),
            to_owner: MessageQueue::new(),
            state: AtomicU8::new(WorkerState::Constructing as u8),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Human-readable path of the worker, e.g. `main/2/1`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Owner→worker queue
    pub fn to_worker(&self) -> &MessageQueue {
        &self.to_worker
    }

    /// Worker→owner queue
    pub fn to_owner(&self) -> &MessageQueue {
        &self.to_owner
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    /// Move the lifecycle forward to `state`; never moves backwards.
    ///
    /// Returns the state observed before the call.
    pub fn advance(&self, state: WorkerState) -> WorkerState {
        WorkerState::from(self.state.fetch_max(state as u8, Ordering::AcqRel))
    }

    /// Request termination. Returns `true` only for the call that flipped the flag.
    pub fn terminate(&self) -> bool {
        self.advance(WorkerState::Terminating) < WorkerState::Terminating
    }

    pub fn is_terminated(&self) -> bool {
        self.state() >= WorkerState::Terminating
    }
}

/// Worker-side view of a port
///
/// Handed to the worker thread routine. Posting goes to `to_owner`, the inbox
/// is `to_worker`.
#[derive(Clone, Debug)]
pub struct WorkerEndpoint {
    port: Arc<WorkerPort>,
}

impl WorkerEndpoint {
    pub(crate) fn new(port: Arc<WorkerPort>) -> Self {
        Self { port }
    }

    pub fn id(&self) -> WorkerId {
        self.port.id()
    }

    pub fn label(&self) -> &str {
        self.port.label()
    }

    /// Post a message to the owner
    ///
    /// Messages posted after termination are dropped; returns whether the
    /// message was queued.
    pub fn post(&self, message: Message) -> bool {
        if self.port.is_terminated() {
            tracing::debug!(
                worker = self.port.label(),
                "Dropping message posted by terminated worker"
            );
            return false;
        }
        self.port.to_owner().enqueue(message);
        true
    }

    /// Messages sent by the owner
    pub fn inbox(&self) -> &MessageQueue {
        self.port.to_worker()
    }

    pub fn is_terminated(&self) -> bool {
        self.port.is_terminated()
    }

    pub fn state(&self) -> WorkerState {
        self.port.state()
    }

    pub(crate) fn port(&self) -> &Arc<WorkerPort> {
        &self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_port_is_constructing() {
        let port = WorkerPort::new(WorkerId(1), "main/1");
        assert_eq!(port.state(), WorkerState::Constructing);
        assert!(!port.is_terminated());
        assert_eq!(port.label(), "main/1");
    }

    #[test]
    fn state_never_moves_backwards() {
        let port = WorkerPort::new(WorkerId(1), "main/1");
        port.advance(WorkerState::Terminating);
        port.advance(WorkerState::Running);
        assert_eq!(port.state(), WorkerState::Terminating);
    }

    #[test]
    fn terminate_is_idempotent() {
        let port = WorkerPort::new(WorkerId(1), "main/1");
        port.advance(WorkerState::Running);
        assert!(port.terminate());
        assert!(!port.terminate());
        assert_eq!(port.state(), WorkerState::Terminating);
    }

    #[test]
    fn terminate_after_exit_keeps_terminated() {
        let port = WorkerPort::new(WorkerId(1), "main/1");
        port.advance(WorkerState::Terminated);
        assert!(!port.terminate());
        assert_eq!(port.state(), WorkerState::Terminated);
    }

    #[test]
    fn endpoint_posts_to_owner_queue() {
        let port = WorkerPort::new(WorkerId(3), "main/3");
        let endpoint = WorkerEndpoint::new(port.clone());

        assert!(endpoint.post(Message::from_json(&json!("hi"))));
        assert_eq!(port.to_owner().len(), 1);
        assert!(port.to_worker().is_empty());
    }

    #[test]
    fn endpoint_drops_posts_after_termination() {
        let port = WorkerPort::new(WorkerId(3), "main/3");
        let endpoint = WorkerEndpoint::new(port.clone());
        port.terminate();

        assert!(!endpoint.post(Message::from_json(&json!(1))));
        assert!(port.to_owner().is_empty());
    }

    #[test]
    fn worker_id_displays_as_number() {
        assert_eq!(WorkerId(42).to_string(), "42");
    }
}
