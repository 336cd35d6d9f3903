// CLI commands for running guest scripts

use crate::js::{config::HostConfig, host::Host};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};

/// Host subcommands
#[derive(Subcommand, Debug)]
pub enum HostCommands {
    /// Run a main script and drive its frame loop
    Run {
        /// Script path, relative to the asset directory
        script: PathBuf,

        /// Asset directory scripts are resolved against (overrides the config)
        #[arg(short, long)]
        assets: Option<PathBuf>,

        /// Configuration file (default: platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,

        /// Frames per second; 0 runs unthrottled (overrides the config)
        #[arg(long)]
        frame_rate: Option<u32>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file (default: platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl HostCommands {
    /// Execute the command
    pub fn run(self) -> Result<()> {
        match self {
            HostCommands::Run {
                script,
                assets,
                config,
                frames,
                frame_rate,
            } => Self::run_cmd(&script, assets, config.as_deref(), frames, frame_rate),
            HostCommands::Config { config } => Self::config_cmd(config.as_deref()),
        }
    }

    fn run_cmd(
        script: &Path,
        assets: Option<PathBuf>,
        config: Option<&Path>,
        frames: Option<u64>,
        frame_rate: Option<u32>,
    ) -> Result<()> {
        let mut config = HostConfig::load_or_default(config).context("Failed to load configuration")?;
        if let Some(assets) = assets {
            config.assets_dir = assets;
        }
        if let Some(rate) = frame_rate {
            config.frame_rate = rate;
        }

        let host = Host::new(config).context("Failed to start script host")?;
        host.load(script)
            .with_context(|| format!("Failed to run {}", script.display()))?;

        let ran = host.run(frames);
        tracing::info!(frames = ran, "Script host finished");
        Ok(())
    }

    fn config_cmd(config: Option<&Path>) -> Result<()> {
        let config = HostConfig::load_or_default(config).context("Failed to load configuration")?;
        print!("{}", config.to_toml()?);
        Ok(())
    }
}
