// quickworkers - thread-backed script workers for an embedded QuickJS host

pub mod js;
pub mod logging;

pub use js::{Host, HostConfig, HostError};
