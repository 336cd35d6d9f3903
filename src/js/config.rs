// Configuration types for the script host and its workers

use super::error::ConfigError;
use super::worker::{SpawnOptions, DEFAULT_PERIOD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level host configuration
///
/// Every field has a default, so an empty file (or no file at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory that script paths are resolved against. `~` is expanded.
    pub assets_dir: PathBuf,

    /// Update callback invocations per second
    pub frame_rate: u32,

    /// Limits applied to every guest runtime (main and workers)
    pub runtime: RuntimeConfig,

    /// Worker thread behaviour
    pub workers: WorkerConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("."),
            frame_rate: 60,
            runtime: RuntimeConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}

/// Guest runtime limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Memory limit per runtime in bytes
    pub memory_limit: usize,

    /// Maximum guest stack size in bytes
    pub max_stack_size: usize,

    /// Allocation threshold that triggers a GC cycle; engine default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_threshold: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024, // 64MB
            max_stack_size: 1024 * 1024,    // 1MB
            gc_threshold: None,
        }
    }
}

/// Worker thread configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Period used by `setInterval` when the guest passes none
    pub default_interval_ms: u64,

    /// Pause at the end of every worker loop iteration. `0` only yields.
    pub idle_sleep_ms: u64,

    /// Native stack size for worker threads; platform default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: DEFAULT_PERIOD.as_millis() as u64,
            idle_sleep_ms: 1,
            thread_stack_size: None,
        }
    }
}

impl WorkerConfig {
    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            stack_size: self.thread_stack_size,
        }
    }
}

impl HostConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `path` when given, otherwise the platform default file if it exists
    ///
    /// Falls back to the built-in defaults when there is no file at all. An
    /// explicit path that cannot be read is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "Loading host configuration");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Platform config location, e.g. `~/.config/quickworkers/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "quickworkers")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Asset directory with `~` and environment variables expanded
    pub fn assets_root(&self) -> PathBuf {
        let raw = self.assets_dir.to_string_lossy();
        match shellexpand::full(&raw) {
            Ok(expanded) => PathBuf::from(expanded.into_owned()),
            Err(e) => {
                tracing::warn!(assets_dir = %raw, error = %e, "Could not expand assets directory");
                self.assets_dir.clone()
            }
        }
    }

    /// Time budget of one frame; zero when the frame rate is unbounded
    pub fn frame_period(&self) -> Duration {
        match self.frame_rate {
            0 => Duration::ZERO,
            rate => Duration::from_secs(1) / rate,
        }
    }
}
