// Error types for the script host and its workers

use super::runtime::ScriptError;
use super::worker::WorkerId;
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for host operations
///
/// This is the primary error type returned by the host driver.
/// Individual error types are exposed through `From` conversions.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] JsRuntimeError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the worker lifecycle and message ports
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker constructor: file {} does not exist", .path.display())]
    ScriptNotFound { path: PathBuf },

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Worker {0} is not registered")]
    UnknownWorker(WorkerId),

    #[error("Worker {0} has been terminated")]
    Terminated(WorkerId),
}

/// Errors while creating a guest runtime or executing guest code
#[derive(Debug, Error)]
pub enum JsRuntimeError {
    #[error("Failed to initialize runtime: {0}")]
    Init(String),

    #[error("Failed to load script '{}': {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Uncaught exception: {0}")]
    Script(#[from] ScriptError),

    #[error("Value is not JSON serializable: {0}")]
    Serialization(String),
}

impl From<rquickjs::Error> for JsRuntimeError {
    fn from(err: rquickjs::Error) -> Self {
        JsRuntimeError::Execution(err.to_string())
    }
}

/// Errors while loading host configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}
