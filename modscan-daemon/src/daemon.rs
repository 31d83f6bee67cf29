//! Daemon assembly and lifecycle.
//!
//! # Startup Order
//!
//! 1. Validate configuration
//! 2. Install metrics recorder (if enabled)
//! 3. Open the warehouse and create/update result tables (failure aborts)
//! 4. Build scanners (direct or sandboxed executor)
//! 5. Start the worker pool, then the HTTP control server
//!
//! # Shutdown
//!
//! On SIGTERM/SIGINT the shutdown token fires: the server stops accepting
//! requests, idle workers exit, and running tasks get
//! [`SHUTDOWN_GRACE`] to finish before they are aborted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use modscan_core::config::ModscanConfig;
use modscan_core::storage::FsObjectStore;
use modscan_core::warehouse::{JsonlWarehouse, Warehouse, create_tables};
use modscan_scanner::ScannerConfig;

use crate::state::{AppState, WorkerConfig, build_scanners};
use crate::worker::{Task, spawn_workers};
use crate::{metrics_server, server};

/// Time running tasks get to finish after a shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Assembled daemon, ready to run.
pub struct Daemon<W> {
    config: ModscanConfig,
    state: Arc<AppState<W>>,
    rx: Option<mpsc::Receiver<Task>>,
    shutdown: CancellationToken,
}

impl Daemon<JsonlWarehouse> {
    /// Build from configuration with the JSONL warehouse under `warehouse.dir`.
    pub async fn build_from_config(config: ModscanConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics, config.jobs.workers)?;
        }

        let warehouse = JsonlWarehouse::open(&config.warehouse.dir)
            .await
            .map_err(|e| anyhow::anyhow!("failed to open warehouse: {}", e))?;
        Self::build_with_warehouse(config, warehouse).await
    }
}

impl<W: Warehouse> Daemon<W> {
    /// Build over an already-open warehouse.
    ///
    /// Creates or updates every result table; any failure aborts startup.
    pub async fn build_with_warehouse(config: ModscanConfig, warehouse: W) -> Result<Self> {
        let worker_config = WorkerConfig::from_core(&config);
        worker_config.validate()?;

        let (vulncheck, analysis) = build_scanners(
            ScannerConfig::from_core(&config),
            FsObjectStore::new(&config.storage.root),
        )?;

        let (state, rx) = AppState::new(worker_config, warehouse, vulncheck, analysis);
        let changed = create_tables(&state.warehouse, &state.registry)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create result tables: {}", e))?;
        tracing::info!(tables = ?changed, "result tables ready");

        Ok(Self {
            config,
            state: Arc::new(state),
            rx: Some(rx),
            shutdown: CancellationToken::new(),
        })
    }

    /// Shared state (for tests and introspection).
    pub fn state(&self) -> &Arc<AppState<W>> {
        &self.state
    }

    /// Token that stops the server and workers when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.listen_addr)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "failed to bind control server on {}: {}",
                    self.config.server.listen_addr,
                    e
                )
            })?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
            shutdown.cancel();
        });

        self.serve(listener).await
    }

    /// Start workers and serve on `listener` until the shutdown token fires.
    pub async fn serve(&mut self, listener: TcpListener) -> Result<()> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("daemon is already running"))?;
        let mut workers = spawn_workers(Arc::clone(&self.state), rx, self.shutdown.clone());

        let server_result =
            server::serve(listener, Arc::clone(&self.state), self.shutdown.clone()).await;
        self.shutdown.cancel();

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "workers still busy after grace period, aborting"
            );
            workers.abort_all();
        }

        tracing::info!("modscan-daemon shut down");
        server_result
    }
}

/// Wait for SIGTERM or SIGINT.
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
