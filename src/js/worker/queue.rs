// Message queue - the mutex-guarded FIFO that carries serialized messages between threads

use parking_lot::Mutex;
use serde_json::Value;

/// Capacity of a queue's buffer after its first growth
pub const INITIAL_CAPACITY: usize = 4;

/// A serialized message in flight between an owner and a worker
///
/// The payload is JSON text produced at enqueue time. A message never holds a
/// reference into either guest runtime, which is what lets it cross threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Box<str>,
}

impl Message {
    /// Wrap an already serialized JSON payload
    pub fn from_serialized(payload: impl Into<Box<str>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Serialize a JSON value into a message
    pub fn from_json(value: &Value) -> Self {
        Self::from_serialized(value.to_string())
    }

    /// Parse the payload back into a JSON value
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.payload)
    }

    /// The serialized payload
    pub fn as_str(&self) -> &str {
        &self.payload
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Registered receiver for one direction of a port
///
/// Guest callbacks are bound to the runtime (and thread) that created them, so
/// the slot lives with whoever dispatches the queue, not inside the shared queue.
#[derive(Debug)]
pub struct CallbackSlot<H> {
    handler: Option<H>,
}

impl<H> CallbackSlot<H> {
    pub fn new() -> Self {
        Self { handler: None }
    }

    /// Replace the registered handler, returning the previous one
    ///
    /// Dropping the returned value releases the previous registration.
    pub fn replace(&mut self, handler: Option<H>) -> Option<H> {
        std::mem::replace(&mut self.handler, handler)
    }

    /// Currently registered handler
    pub fn get(&self) -> Option<&H> {
        self.handler.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.handler.is_some()
    }

    /// Drop the registered handler
    pub fn clear(&mut self) {
        self.handler = None;
    }
}

impl<H> Default for CallbackSlot<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe FIFO of serialized messages
///
/// The buffer grows geometrically (4, 8, 16, ...) and never shrinks. Contents
/// are only touched while the mutex is held; draining swaps the whole buffer
/// out under the lock so dispatch happens with the lock released.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Mutex<Vec<Message>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Append a message at the tail. Always succeeds.
    pub fn enqueue(&self, message: Message) {
        let mut messages = self.messages.lock();
        if messages.len() == messages.capacity() {
            let target = match messages.capacity() {
                0 => INITIAL_CAPACITY,
                capacity => capacity * 2,
            };
            let additional = target - messages.len();
            messages.reserve_exact(additional);
        }
        messages.push(message);
    }

    /// Remove and return every queued message in enqueue order
    pub fn drain_all(&self) -> Vec<Message> {
        let mut messages = self.messages.lock();
        if messages.is_empty() {
            return Vec::new();
        }
        let capacity = messages.capacity();
        std::mem::replace(&mut *messages, Vec::with_capacity(capacity))
    }

    /// Drain the queue if `slot` has a handler registered
    ///
    /// Returns nothing while no handler is registered; the messages keep
    /// accumulating. The lock is released before this returns, so a handler
    /// may enqueue into this same queue while it runs.
    pub fn drain_for<H>(&self, slot: &CallbackSlot<H>) -> Vec<Message> {
        if !slot.is_registered() {
            return Vec::new();
        }
        self.drain_all()
    }

    /// Put undelivered messages back at the head of the queue
    ///
    /// They stay ahead of anything enqueued since they were drained.
    pub fn requeue_front(&self, front: Vec<Message>) {
        if front.is_empty() {
            return;
        }
        let mut messages = self.messages.lock();
        let needed = messages.len() + front.len();
        if needed > messages.capacity() {
            let mut target = messages.capacity().max(INITIAL_CAPACITY);
            while target < needed {
                target *= 2;
            }
            let additional = target - messages.len();
            messages.reserve_exact(additional);
        }
        messages.splice(0..0, front);
    }

    /// Drop every queued message, returning how many were discarded
    pub fn discard(&self) -> usize {
        self.drain_all().len()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Current buffer capacity
    pub fn capacity(&self) -> usize {
        self.messages.lock().capacity()
    }
}
