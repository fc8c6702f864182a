//! CLI argument definitions for linehaul-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments and
//! resolves the effective [`LinehaulConfig`] from file, environment and flags.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use linehaul_core::config::LinehaulConfig;

/// linehaul log forwarding daemon.
///
/// Tails a single log file and publishes every new line to a Kafka topic
/// exactly once, remembering forwarded lines across restarts.
#[derive(Parser, Debug)]
#[command(name = "linehaul-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to linehaul.toml configuration file.
    #[arg(short, long, default_value = "/etc/linehaul/linehaul.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Load the configuration file, then apply environment and CLI overrides.
    ///
    /// Precedence, lowest to highest: file, `LINEHAUL_*` environment, CLI flags.
    /// Validation runs once, after every override has been applied.
    ///
    /// # Errors
    ///
    /// - Configuration file is missing or unreadable
    /// - TOML parsing fails
    /// - The merged configuration is invalid
    pub async fn load_config(&self) -> Result<LinehaulConfig> {
        let mut config = LinehaulConfig::from_file(&self.config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        config.apply_env_overrides();
        self.apply_overrides(&mut config);
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        Ok(config)
    }

    /// Apply CLI flag overrides on top of an already-loaded configuration.
    pub fn apply_overrides(&self, config: &mut LinehaulConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
    }
}
