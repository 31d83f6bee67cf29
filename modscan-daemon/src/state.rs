//! Worker configuration and shared daemon state.
//!
//! [`AppState`] is shared by the HTTP handlers and the worker pool
//! through an `Arc`. The warehouse backend is generic so tests can run
//! the full task path against `MemoryWarehouse`.

use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;

use modscan_core::config::ModscanConfig;
use modscan_core::storage::FsObjectStore;
use modscan_core::warehouse::{SchemaRegistry, Warehouse};
use modscan_jobs::MemoryJobStore;
use modscan_scanner::{
    AnalysisScanner, Executor, GoModDownload, ModuleScanner, ModuleScannerBuilder, ScannerConfig,
};

use crate::worker::Task;

/// Vulncheck scanner as wired by the daemon.
pub type VulnScanner = ModuleScanner<Executor, GoModDownload>;

/// Analysis scanner as wired by the daemon.
pub type BinaryScanner = AnalysisScanner<Executor, GoModDownload, FsObjectStore>;

/// Worker pool and upload settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Bounded task queue capacity.
    pub queue_capacity: usize,
    /// CAS attempts for each job counter update.
    pub update_max_attempts: u32,
    /// Rows per warehouse insert.
    pub chunk_size: usize,
    /// Deadline for one `upload_many` call.
    pub insert_timeout: Duration,
    /// Default module list for enqueue requests without `file`.
    pub corpus_file: String,
    /// Bearer token for the control surface (empty disables the check).
    pub auth_token: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_core(&ModscanConfig::default())
    }
}

impl WorkerConfig {
    /// Derive from the core configuration.
    pub fn from_core(core: &ModscanConfig) -> Self {
        Self {
            workers: core.jobs.workers,
            queue_capacity: core.jobs.queue_capacity,
            update_max_attempts: core.jobs.update_max_attempts,
            chunk_size: core.warehouse.chunk_size,
            insert_timeout: Duration::from_secs(core.warehouse.insert_timeout_secs),
            corpus_file: core.jobs.corpus_file.clone(),
            auth_token: core.server.auth_token.clone(),
        }
    }

    /// Validate ranges.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }
        if self.update_max_attempts == 0 {
            anyhow::bail!("update_max_attempts must be greater than 0");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        if self.insert_timeout.is_zero() {
            anyhow::bail!("insert_timeout must be greater than 0");
        }
        Ok(())
    }
}

/// Builder for [`WorkerConfig`]; `build()` validates.
#[derive(Debug, Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn update_max_attempts(mut self, attempts: u32) -> Self {
        self.config.update_max_attempts = attempts;
        self
    }

    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.config.chunk_size = rows;
        self
    }

    pub fn insert_timeout(mut self, timeout: Duration) -> Self {
        self.config.insert_timeout = timeout;
        self
    }

    pub fn corpus_file(mut self, path: impl Into<String>) -> Self {
        self.config.corpus_file = path.into();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = token.into();
        self
    }

    pub fn build(self) -> Result<WorkerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Build both scanners from one scanner config.
///
/// The executor (direct or sandboxed) and fetcher are shared by clone.
pub fn build_scanners(
    config: ScannerConfig,
    store: FsObjectStore,
) -> Result<(VulnScanner, BinaryScanner)> {
    let executor = Executor::from_config(&config);
    let fetcher = GoModDownload::new(&config.go_path, &config.work_dir);

    let vulncheck = ModuleScannerBuilder::new()
        .config(config.clone())
        .executor(executor.clone())
        .fetcher(fetcher.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build vulncheck scanner: {}", e))?;
    let analysis = AnalysisScanner::new(config, executor, fetcher, store)
        .map_err(|e| anyhow::anyhow!("failed to build analysis scanner: {}", e))?;

    tracing::info!(executor = vulncheck.executor_name(), "scanners initialized");
    Ok((vulncheck, analysis))
}

/// Tables the daemon writes.
pub fn registry() -> SchemaRegistry {
    SchemaRegistry::new(modscan_scanner::rows::tables())
}

/// State shared by handlers and workers.
pub struct AppState<W> {
    pub config: WorkerConfig,
    pub jobs: MemoryJobStore,
    pub warehouse: W,
    pub registry: SchemaRegistry,
    pub vulncheck: VulnScanner,
    pub analysis: BinaryScanner,
    queue: mpsc::Sender<Task>,
    started: Instant,
}

impl<W: Warehouse> AppState<W> {
    /// Create the state and the receiving end of its task queue.
    pub fn new(
        config: WorkerConfig,
        warehouse: W,
        vulncheck: VulnScanner,
        analysis: BinaryScanner,
    ) -> (Self, mpsc::Receiver<Task>) {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let state = Self {
            config,
            jobs: MemoryJobStore::new(),
            warehouse,
            registry: registry(),
            vulncheck,
            analysis,
            queue,
            started: Instant::now(),
        };
        (state, rx)
    }

    /// Object store holding analysis binaries and module files.
    pub fn store(&self) -> &FsObjectStore {
        self.analysis.store()
    }

    /// Sending side of the task queue.
    pub fn queue(&self) -> &mpsc::Sender<Task> {
        &self.queue
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Time since the state was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_core_copies_jobs_and_warehouse_sections() {
        let mut core = ModscanConfig::default();
        core.jobs.workers = 9;
        core.jobs.corpus_file = "objstore://module-files/top".to_owned();
        core.warehouse.insert_timeout_secs = 42;
        core.server.auth_token = "secret".to_owned();

        let config = WorkerConfig::from_core(&core);
        assert_eq!(config.workers, 9);
        assert_eq!(config.corpus_file, "objstore://module-files/top");
        assert_eq!(config.insert_timeout, Duration::from_secs(42));
        assert_eq!(config.auth_token, "secret");
    }

    #[test]
    fn builder_rejects_zero_workers() {
        let err = WorkerConfigBuilder::new().workers(0).build().unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn builder_accepts_defaults() {
        let config = WorkerConfigBuilder::new().chunk_size(10).build().unwrap();
        assert_eq!(config.chunk_size, 10);
    }

    #[test]
    fn registry_contains_result_tables() {
        let registry = registry();
        assert!(registry.get(modscan_scanner::VULNCHECK_TABLE).is_ok());
        assert!(registry.get(modscan_scanner::ANALYSIS_TABLE).is_ok());
    }
}
