// Worker registry - the workers owned by one execution context

use super::lifecycle::{self, SpawnOptions, WorkerHandle};
use super::port::{WorkerEndpoint, WorkerId, WorkerState};
use super::queue::{CallbackSlot, Message};
use crate::js::error::WorkerError;
use std::path::Path;

/// A worker owned by this context together with the owner's `onmessage`
#[derive(Debug)]
struct OwnedWorker<H> {
    handle: WorkerHandle,
    on_message: CallbackSlot<H>,
}

/// Messages drained from one worker, ready for dispatch on the owner thread
///
/// The handler is looked up again for every message, so a handler replaced
/// mid-batch takes effect on the next message.
#[derive(Debug)]
pub struct Inbound {
    pub worker: WorkerId,
    pub messages: Vec<Message>,
}

/// Every worker spawned by one execution context
///
/// Each context (the host's main context and every worker's own context)
/// owns exactly one registry. `H` is the owner's callback type. Order of
/// entries is not significant; removal swaps with the last entry.
///
/// Dropping the registry terminates and joins every worker it owns, which
/// in turn tears down their own registries before their threads exit.
#[derive(Debug)]
pub struct WorkerRegistry<H> {
    owner: String,
    workers: Vec<OwnedWorker<H>>,
    next_id: u32,
    options: SpawnOptions,
}

impl<H> WorkerRegistry<H> {
    /// Create an empty registry for the context labelled `owner`
    pub fn new(owner: impl Into<String>) -> Self {
        Self::with_options(owner, SpawnOptions::default())
    }

    pub fn with_options(owner: impl Into<String>, options: SpawnOptions) -> Self {
        Self {
            owner: owner.into(),
            workers: Vec::new(),
            next_id: 1,
            options,
        }
    }

    /// Label of the owning context
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Validate `script`, start a worker running `body` and register it
    pub fn spawn<F>(&mut self, script: &Path, body: F) -> Result<WorkerId, WorkerError>
    where
        F: FnOnce(WorkerEndpoint) + Send + 'static,
    {
        let id = WorkerId(self.next_id);
        let label = format!("{}/{}", self.owner, id);
        let handle = lifecycle::spawn(id, label, script, &self.options, body)?;
        self.next_id += 1;
        self.workers.push(OwnedWorker {
            handle,
            on_message: CallbackSlot::new(),
        });
        Ok(id)
    }

    fn index_of(&self, id: WorkerId) -> Option<usize> {
        self.workers.iter().position(|worker| worker.handle.id() == id)
    }

    fn get(&self, id: WorkerId) -> Result<&OwnedWorker<H>, WorkerError> {
        self.index_of(id)
            .map(|index| &self.workers[index])
            .ok_or(WorkerError::UnknownWorker(id))
    }

    /// Queue a message for a worker
    pub fn post(&self, id: WorkerId, message: Message) -> Result<(), WorkerError> {
        self.get(id)?.handle.post(message)
    }

    /// Register (or clear) the owner's message handler for a worker
    ///
    /// Returns the previous handler.
    pub fn set_handler(&mut self, id: WorkerId, handler: Option<H>) -> Result<Option<H>, WorkerError> {
        let index = self.index_of(id).ok_or(WorkerError::UnknownWorker(id))?;
        let worker = &mut self.workers[index];
        if worker.handle.port().is_terminated() {
            return Err(WorkerError::Terminated(id));
        }
        Ok(worker.on_message.replace(handler))
    }

    /// Owner's message handler for a worker
    pub fn handler(&self, id: WorkerId) -> Option<&H> {
        self.get(id).ok().and_then(|worker| worker.on_message.get())
    }

    /// Request termination without waiting. Idempotent.
    pub fn terminate(&self, id: WorkerId) -> Result<(), WorkerError> {
        self.get(id)?.handle.terminate();
        Ok(())
    }

    /// Finalize a worker: terminate, join its thread and deregister it
    ///
    /// Blocks until the worker thread has exited. Returns `false` when the id
    /// is not tracked.
    pub fn release(&mut self, id: WorkerId) -> bool {
        let Some(index) = self.index_of(id) else {
            tracing::warn!(owner = %self.owner, worker = %id, "Finalizing worker that is not tracked");
            return false;
        };
        let mut worker = self.workers.swap_remove(index);
        worker.handle.shutdown();
        true
    }

    /// Messages from a worker still waiting for the owner
    pub fn pending(&self, id: WorkerId) -> usize {
        self.get(id)
            .map_or(0, |worker| worker.handle.port().to_owner().len())
    }

    pub fn state(&self, id: WorkerId) -> Option<WorkerState> {
        self.get(id).ok().map(|worker| worker.handle.state())
    }

    /// Drain the owner-bound queue of every worker that has a handler
    ///
    /// Workers without a handler keep accumulating their messages.
    pub fn collect_inbound(&self) -> Vec<Inbound> {
        self.workers
            .iter()
            .filter_map(|worker| {
                let port = worker.handle.port();
                let messages = port.to_owner().drain_for(&worker.on_message);
                (!messages.is_empty()).then(|| Inbound {
                    worker: port.id(),
                    messages,
                })
            })
            .collect()
    }

    /// Hand undelivered messages back to a worker's owner-bound queue
    ///
    /// They are delivered first once a handler is registered again. Returns
    /// `false` (and drops them) when the worker is no longer tracked.
    pub fn requeue(&self, id: WorkerId, messages: Vec<Message>) -> bool {
        match self.get(id) {
            Ok(worker) => {
                worker.handle.port().to_owner().requeue_front(messages);
                true
            }
            Err(_) => false,
        }
    }

    /// Join and deregister workers whose threads have exited after termination
    ///
    /// A worker is kept while it still has undelivered messages for a
    /// registered handler. Returns how many were removed.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        let mut index = 0;
        while index < self.workers.len() {
            let worker = &self.workers[index];
            let port = worker.handle.port();
            let exited = port.is_terminated() && worker.handle.is_finished();
            let pending = worker.on_message.is_registered() && !port.to_owner().is_empty();
            if exited && !pending {
                let mut worker = self.workers.swap_remove(index);
                worker.handle.join();
                tracing::debug!(owner = %self.owner, worker = worker.handle.label(), "Reaped worker");
                reaped += 1;
            } else {
                index += 1;
            }
        }
        reaped
    }

    /// Terminate every worker, wait for all of them, and clear the registry
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        tracing::debug!(owner = %self.owner, count = self.workers.len(), "Shutting down workers");
        for worker in &self.workers {
            worker.handle.terminate();
        }
        for mut worker in self.workers.drain(..) {
            worker.handle.join();
        }
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|worker| worker.handle.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl<H> Drop for WorkerRegistry<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
