//! Shared fixtures for daemon integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use modscan_core::config::ModscanConfig;
use modscan_core::storage::FsObjectStore;
use modscan_core::warehouse::{MemoryWarehouse, create_tables};
use modscan_daemon::state::{AppState, WorkerConfig, WorkerConfigBuilder, build_scanners};
use modscan_daemon::worker::Task;
use modscan_jobs::{Job, JobStore};
use modscan_scanner::ScannerConfig;

pub const CONFIG_LINE: &str = r#"{"config":{"protocol_version":"v1.0.0","scanner_name":"govulncheck","scanner_version":"v1.1.3"}}"#;
pub const OSV_LINE: &str = r#"{"osv":{"id":"GO-2021-0113","affected":[{"module":{"path":"golang.org/x/text"}}]}}"#;
pub const SOURCE_FINDING: &str = r#"{"finding":{"osv":"GO-2021-0113","fixed_version":"v0.3.7","trace":[{"module":"golang.org/x/text","version":"v0.3.5","package":"golang.org/x/text/language","function":"Parse"}]}}"#;

pub struct TestEnv {
    pub root: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn path_string(&self, name: &str) -> String {
        self.path(name).display().to_string()
    }

    /// Core config pointing every path into the temp dir.
    ///
    /// `go` and `govulncheck` do not exist unless [`TestEnv::install_tools`] ran,
    /// so scans fail at the fetch step.
    pub fn core_config(&self) -> ModscanConfig {
        let mut config = ModscanConfig::default();
        config.scanner.tool_path = self.path_string("govulncheck");
        config.scanner.go_path = self.path_string("go");
        config.scanner.vuln_db_path = self.path_string("vulndb");
        config.scanner.work_dir = self.path_string("work");
        config.scanner.worker_version = "test".to_owned();
        config.storage.root = self.path_string("objects");
        config.warehouse.dir = self.path_string("warehouse");
        config.jobs.workers = 2;
        config.jobs.queue_capacity = 64;
        config
    }

    pub fn worker_config(&self) -> WorkerConfigBuilder {
        WorkerConfigBuilder::new()
            .workers(2)
            .queue_capacity(64)
            .insert_timeout(Duration::from_secs(5))
    }

    pub fn store(&self) -> FsObjectStore {
        FsObjectStore::new(self.path("objects"))
    }

    pub async fn state(
        &self,
        config: WorkerConfig,
    ) -> (Arc<AppState<MemoryWarehouse>>, mpsc::Receiver<Task>) {
        let core = self.core_config();
        let (vulncheck, analysis) =
            build_scanners(ScannerConfig::from_core(&core), self.store()).unwrap();
        let (state, rx) = AppState::new(config, MemoryWarehouse::new(), vulncheck, analysis);
        create_tables(&state.warehouse, &state.registry).await.unwrap();
        (Arc::new(state), rx)
    }

    /// Write a module list file and return its path.
    pub fn write_corpus(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Install fake `go` and `govulncheck` executables that succeed.
    #[cfg(unix)]
    pub fn install_tools(&self) {
        let module = self.path("modcache/example.com/v@v1.0.0");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::write(module.join("go.mod"), "module example.com/v\n").unwrap();
        std::fs::write(module.join("main.go"), "package main\n").unwrap();
        std::fs::create_dir_all(self.path("vulndb/index")).unwrap();
        std::fs::write(
            self.path("vulndb/index/db.json"),
            r#"{"modified":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();

        let go = r#"
case "$1 $2" in
  "mod download")
    if [ "$3" = "-json" ]; then
      printf '{"Path":"example.com/v","Version":"v1.0.0","Dir":"@MODULE@"}\n'
    fi
    exit 0;;
esac
echo "unexpected go invocation: $*" >&2
exit 2"#
            .replace("@MODULE@", &module.display().to_string());
        write_script(&self.path("go"), &go);

        let govulncheck = format!(
            r#"
if [ "$1" = "-version" ]; then
  echo "Scanner: govulncheck@v1.1.3"
  exit 0
fi
echo '{CONFIG_LINE}'
echo '{OSV_LINE}'
echo '{SOURCE_FINDING}'
exit 3"#
        );
        write_script(&self.path("govulncheck"), &govulncheck);
    }
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Create a job with `enqueued` tasks directly in the store.
pub async fn create_job<W: modscan_core::warehouse::Warehouse>(
    state: &AppState<W>,
    user: &str,
    enqueued: u64,
) -> Job {
    let mut job = Job::new(user, chrono::Utc::now(), "/test");
    job.record_enqueued(enqueued);
    state.jobs.create(job.clone()).await.unwrap();
    job
}
