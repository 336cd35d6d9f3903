// Script host - embedded QuickJS runtimes with thread-backed workers

pub mod api;
pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod runtime;
pub mod worker;

pub use config::HostConfig;
pub use error::{ConfigError, HostError, JsRuntimeError, WorkerError};
pub use host::Host;
pub use runtime::{ContextSettings, GuestRuntime, ScriptError};
