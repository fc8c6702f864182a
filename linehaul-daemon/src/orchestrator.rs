//! Forwarder assembly and lifecycle management.
//!
//! The [`Orchestrator`] turns a validated [`LinehaulConfig`] into a running
//! [`LogForwarder`] backed by a [`KafkaPublisher`], and drives it until a
//! shutdown signal arrives or the forwarder terminates on its own.
//!
//! # Shutdown
//!
//! - `SIGTERM` / `SIGINT` cancel the forwarder. It stops between lines or
//!   while awaiting a delivery, then flushes the fingerprint store and the
//!   producer. Unprocessed lines are picked up by the rescan on next start.
//! - An irrecoverable forwarder error ends the run with an error, so the
//!   process exits non-zero.

use std::future::Future;

use anyhow::Result;

use linehaul_core::config::LinehaulConfig;
use linehaul_core::pipeline::{HealthStatus, Pipeline};
use linehaul_forwarder::{
    ForwarderConfig, ForwarderStats, KafkaPublisher, KafkaPublisherConfig, LogForwarder,
    LogForwarderBuilder,
};

use crate::metrics_server;

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: LinehaulConfig,
    forwarder: LogForwarder<KafkaPublisher>,
}

impl Orchestrator {
    /// Build from an already-loaded configuration.
    ///
    /// Installs the metrics recorder when enabled, creates the Kafka producer
    /// and opens the fingerprint store. Nothing is polled until [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// - Configuration validation fails
    /// - Metrics recorder cannot be installed
    /// - Kafka producer cannot be created
    /// - Fingerprint store cannot be opened
    pub async fn build_from_config(config: LinehaulConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let publisher = KafkaPublisher::new(KafkaPublisherConfig::from_core(&config.broker))
            .map_err(|e| anyhow::anyhow!("failed to create kafka producer: {}", e))?;
        tracing::info!(
            brokers = %config.broker.address,
            topic = %config.broker.topic,
            delivery = config.broker.delivery.as_str(),
            "kafka publisher initialized"
        );

        let forwarder = LogForwarderBuilder::new()
            .config(ForwarderConfig::from_core(&config))
            .publisher(publisher)
            .build()
            .await
            .map_err(|e| anyhow::anyhow!("failed to build log forwarder: {}", e))?;
        tracing::info!(path = %config.log.file_path, "log forwarder initialized");

        Ok(Self { config, forwarder })
    }

    /// Run until `SIGTERM`/`SIGINT` or until the forwarder terminates.
    pub async fn run(&mut self) -> Result<ForwarderStats> {
        self.run_until(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
        })
        .await
    }

    /// Run until `shutdown` resolves or the forwarder terminates.
    ///
    /// Returns the forwarder's final statistics on a clean stop.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<ForwarderStats>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.forwarder
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start log forwarder: {}", e))?;

        let cancel = self.forwarder.cancellation_token();
        let watcher_cancel = cancel.clone();
        let watcher = tokio::spawn(async move {
            // Stops the forwarder however this task ends, including a panic in `shutdown`.
            let _stop = watcher_cancel.clone().drop_guard();
            tokio::select! {
                () = shutdown => {}
                () = watcher_cancel.cancelled() => {}
            }
        });

        let result = self.forwarder.wait().await;
        cancel.cancel();
        if let Err(e) = watcher.await {
            tracing::warn!(error = %e, "shutdown watcher task failed");
        }

        match result {
            Ok(stats) => {
                tracing::info!(
                    lines_read = stats.lines_read,
                    published = stats.published,
                    duplicates = stats.duplicates,
                    skipped = stats.lines_skipped,
                    publish_failures = stats.publish_failures,
                    tail_resets = stats.tail_resets,
                    "log forwarder stopped"
                );
                Ok(stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "log forwarder terminated");
                Err(anyhow::anyhow!("log forwarder terminated: {}", e))
            }
        }
    }

    /// Current forwarder health.
    pub async fn health(&self) -> HealthStatus {
        self.forwarder.health_check().await
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LinehaulConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to listen for ctrl-c: {}", e))?;
    Ok("ctrl-c")
}
