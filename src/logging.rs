// Logging setup - tracing subscriber for the binary and tests

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info";

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { DEFAULT_FILTER })
    })
}

/// Install the global fmt subscriber
///
/// Thread names are printed so worker output can be told apart. Does nothing
/// if a subscriber is already installed.
pub fn init(verbose: bool) {
    let _ = fmt()
        .with_env_filter(filter(verbose))
        .with_thread_names(true)
        .with_target(true)
        .try_init();
}
