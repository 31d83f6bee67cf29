//! Daemon health report served at `/healthz`.

use serde::Serialize;

use modscan_core::metrics as m;
use modscan_core::warehouse::Warehouse;

use crate::state::AppState;

/// Health report for the daemon process.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// `"ok"` while the task queue accepts work, `"closed"` after shutdown began.
    pub status: &'static str,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Configured worker count.
    pub workers: usize,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Scan executor (`direct` or `sandbox`).
    pub executor: &'static str,
}

/// Build the report and refresh the uptime gauge.
pub fn report<W: Warehouse>(state: &AppState<W>) -> DaemonHealth {
    let uptime_secs = state.uptime().as_secs();
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);

    DaemonHealth {
        status: if state.queue().is_closed() { "closed" } else { "ok" },
        uptime_secs,
        workers: state.config.workers,
        queued: state.queued(),
        queue_capacity: state.config.queue_capacity,
        executor: state.vulncheck.executor_name(),
    }
}
