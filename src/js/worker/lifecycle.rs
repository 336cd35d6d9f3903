// Worker lifecycle - thread creation, termination and joining

use super::port::{WorkerEndpoint, WorkerId, WorkerPort, WorkerState};
use super::queue::Message;
use crate::js::error::WorkerError;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Thread options for spawned workers
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Stack size for the worker thread; the platform default when `None`
    pub stack_size: Option<usize>,
}

/// Owner-side handle of a running worker
///
/// Dropping the handle is the finalization path: it requests termination and
/// blocks until the worker thread has exited.
#[derive(Debug)]
pub struct WorkerHandle {
    port: Arc<WorkerPort>,
    thread: Option<JoinHandle<()>>,
}

/// Marks the port `Terminated` when the worker routine returns or unwinds
struct ExitGuard(Arc<WorkerPort>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.advance(WorkerState::Terminated);
        tracing::debug!(worker = self.0.label(), "Worker thread exited");
    }
}

/// Validate `script` and start a worker thread running `body`
///
/// The script check happens before anything is allocated, so a missing script
/// leaves no thread and no port behind.
pub fn spawn<F>(
    id: WorkerId,
    label: String,
    script: &Path,
    options: &SpawnOptions,
    body: F,
) -> Result<WorkerHandle, WorkerError>
where
    F: FnOnce(WorkerEndpoint) + Send + 'static,
{
    if !script.is_file() {
        return Err(WorkerError::ScriptNotFound {
            path: script.to_path_buf(),
        });
    }

    let port = WorkerPort::new(id, label);
    let endpoint = WorkerEndpoint::new(port.clone());

    let mut builder = thread::Builder::new().name(format!("worker {}", port.label()));
    if let Some(stack_size) = options.stack_size {
        builder = builder.stack_size(stack_size);
    }

    let thread = builder
        .spawn(move || {
            let _exit = ExitGuard(endpoint.port().clone());
            endpoint.port().advance(WorkerState::Running);
            let label = endpoint.label().to_string();
            if panic::catch_unwind(AssertUnwindSafe(move || body(endpoint))).is_err() {
                tracing::error!(worker = %label, "Worker thread panicked");
            }
        })
        .map_err(WorkerError::Spawn)?;

    tracing::debug!(worker = port.label(), script = %script.display(), "Spawned worker");

    Ok(WorkerHandle {
        port,
        thread: Some(thread),
    })
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.port.id()
    }

    pub fn label(&self) -> &str {
        self.port.label()
    }

    pub fn port(&self) -> &Arc<WorkerPort> {
        &self.port
    }

    pub fn state(&self) -> WorkerState {
        self.port.state()
    }

    /// Post a message to the worker
    pub fn post(&self, message: Message) -> Result<(), WorkerError> {
        if self.port.is_terminated() {
            return Err(WorkerError::Terminated(self.id()));
        }
        self.port.to_worker().enqueue(message);
        Ok(())
    }

    /// Request cooperative termination; never blocks
    ///
    /// Takes effect at the next loop boundary the worker reaches. Returns
    /// `true` only for the call that requested it.
    pub fn terminate(&self) -> bool {
        let requested = self.port.terminate();
        if requested {
            tracing::debug!(worker = self.label(), "Worker termination requested");
        }
        requested
    }

    /// Whether the worker thread has returned (or was already joined)
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(true, |thread| thread.is_finished())
    }

    /// Wait for the worker thread. Returns `false` when it was already joined.
    pub fn join(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return false;
        };
        if thread.join().is_err() {
            tracing::error!(worker = self.label(), "Worker thread could not be joined");
        }
        true
    }

    /// Terminate and join; the single path used by every shutdown trigger
    pub fn shutdown(&mut self) {
        self.terminate();
        self.join();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
