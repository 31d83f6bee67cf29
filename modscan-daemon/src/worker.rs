//! Task queue consumers.
//!
//! Workers share one bounded receiver. Each task goes through:
//!
//! 1. admission (`admit_task`): a canceled job starts nothing and counts nothing
//! 2. work-version gate: unchanged prior results finish as `Skipped`
//! 3. scan, then upload of the result rows
//! 4. finish: `Succeeded`, `Errored` (a row carries an error) or
//!    `Failed` (upload or binary preparation failed)
//!
//! Tasks without a job ID skip steps 1 and 4.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use modscan_core::metrics as m;
use modscan_core::warehouse::{Warehouse, upload_many};
use modscan_jobs::{Admission, TaskOutcome, admit_task, update_job};
use modscan_scanner::{ANALYSIS_TABLE, AnalysisRequest, ScanTarget, VULNCHECK_TABLE, VulnResultRow};

use crate::state::AppState;

/// One unit of queued work.
#[derive(Debug, Clone)]
pub enum Task {
    /// govulncheck scan of one module version.
    Vulncheck {
        target: ScanTarget,
        job_id: Option<String>,
    },
    /// Analysis binary run over one module version.
    Analysis(AnalysisRequest),
}

impl Task {
    /// Owning job, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Vulncheck { job_id, .. } => job_id.as_deref(),
            Self::Analysis(req) => req.job_id.as_deref(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Vulncheck { .. } => "vulncheck",
            Self::Analysis(_) => "analysis",
        }
    }
}

/// What happened to a dequeued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    /// The job was canceled or admission could not be recorded.
    NotAdmitted,
    /// The task ran to a terminal outcome.
    Finished(TaskOutcome),
}

/// Spawn `config.workers` consumers of `rx`.
///
/// Workers stop taking tasks once `shutdown` fires; a task already
/// running finishes first.
pub fn spawn_workers<W: Warehouse>(
    state: Arc<AppState<W>>,
    rx: mpsc::Receiver<Task>,
    shutdown: CancellationToken,
) -> JoinSet<()> {
    let rx = Arc::new(Mutex::new(rx));
    let mut workers = JoinSet::new();

    for worker in 0..state.config.workers {
        let state = Arc::clone(&state);
        let rx = Arc::clone(&rx);
        let shutdown = shutdown.clone();
        workers.spawn(async move {
            debug!(worker, "worker started");
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => None,
                    task = async { rx.lock().await.recv().await } => task,
                };
                let Some(task) = next else { break };
                process_task(&state, task).await;
            }
            debug!(worker, "worker stopped");
        });
    }

    info!(workers = state.config.workers, "worker pool started");
    workers
}

/// Run one task through admission, scan, upload and finish.
pub async fn process_task<W: Warehouse>(state: &AppState<W>, task: Task) -> TaskResult {
    let job_id = task.job_id().map(str::to_owned);
    let attempts = state.config.update_max_attempts;

    if let Some(id) = &job_id {
        match admit_task(&state.jobs, id, attempts).await {
            Ok(Admission::Started) => {}
            Ok(Admission::Canceled) => {
                info!(job_id = %id, "job canceled, task not started");
                return TaskResult::NotAdmitted;
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "task admission failed");
                return TaskResult::NotAdmitted;
            }
        }
    }

    metrics::gauge!(m::JOBS_TASKS_IN_FLIGHT).increment(1.0);
    let kind = task.kind();
    let outcome = match task {
        Task::Vulncheck { target, .. } => run_vulncheck(state, &target).await,
        Task::Analysis(req) => run_analysis(state, &req).await,
    };
    metrics::gauge!(m::JOBS_TASKS_IN_FLIGHT).decrement(1.0);
    metrics::counter!(
        m::JOBS_TASKS_FINISHED_TOTAL,
        m::LABEL_MODE => kind,
        m::LABEL_OUTCOME => outcome.as_str()
    )
    .increment(1);

    if let Some(id) = &job_id
        && let Err(e) = update_job(&state.jobs, id, attempts, |job| job.record_finish(outcome)).await
    {
        error!(job_id = %id, outcome = %outcome, error = %e, "failed to record task outcome");
    }

    TaskResult::Finished(outcome)
}

async fn run_vulncheck<W: Warehouse>(state: &AppState<W>, target: &ScanTarget) -> TaskOutcome {
    match state.vulncheck.is_current(&state.warehouse, target).await {
        Ok(true) => {
            info!(target = %target, "prior result is current, skipping");
            return TaskOutcome::Skipped;
        }
        Ok(false) => {}
        Err(e) => warn!(target = %target, error = %e, "work version check failed, scanning"),
    }

    let rows = state.vulncheck.scan(target).await;
    let errored = rows.iter().any(VulnResultRow::has_error);
    if let Err(e) = upload_many(
        &state.warehouse,
        &state.registry,
        VULNCHECK_TABLE,
        rows,
        state.config.chunk_size,
        state.config.insert_timeout,
    )
    .await
    {
        error!(target = %target, error = %e, "failed to upload scan results");
        return TaskOutcome::Failed;
    }

    if errored {
        TaskOutcome::Errored
    } else {
        TaskOutcome::Succeeded
    }
}

async fn run_analysis<W: Warehouse>(state: &AppState<W>, req: &AnalysisRequest) -> TaskOutcome {
    let binary = match state.analysis.prepare_binary(req).await {
        Ok(binary) => binary,
        Err(e) => {
            error!(module = %req.path(), binary = %req.binary, error = %e, "failed to prepare analysis binary");
            return TaskOutcome::Failed;
        }
    };

    match state.analysis.is_current(&state.warehouse, req, &binary).await {
        Ok(true) => {
            info!(module = %req.path(), binary = %req.binary, "prior result is current, skipping");
            return TaskOutcome::Skipped;
        }
        Ok(false) => {}
        Err(e) => warn!(module = %req.path(), error = %e, "work version check failed, scanning"),
    }

    let row = state.analysis.scan(req, &binary).await;
    let errored = row.has_error();
    if let Err(e) = upload_many(
        &state.warehouse,
        &state.registry,
        ANALYSIS_TABLE,
        vec![row],
        state.config.chunk_size,
        state.config.insert_timeout,
    )
    .await
    {
        error!(module = %req.path(), error = %e, "failed to upload analysis result");
        return TaskOutcome::Failed;
    }

    if errored {
        TaskOutcome::Errored
    } else {
        TaskOutcome::Succeeded
    }
}
