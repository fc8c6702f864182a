//! tracing subscriber setup.
//!
//! `RUST_LOG` wins over `general.log_level`. `general.log_format` selects
//! flattened JSON lines or the multi-line pretty format.

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use linehaul_core::config::GeneralConfig;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.log_format.as_str() {
        "json" => registry.with(fmt::layer().json().flatten_event(true)).try_init(),
        "pretty" => registry.with(fmt::layer().pretty()).try_init(),
        other => anyhow::bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
    };
    installed.with_context(|| format!("failed to install {} subscriber", config.log_format))
}
