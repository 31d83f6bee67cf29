//! Bulk enqueue: corpus selection, job creation, task submission.
//!
//! An enqueue request selects modules from a module list by import
//! count, creates a job with `num_enqueued` set to the selection size,
//! and feeds one task per module into the bounded queue from a
//! background task so the HTTP response does not wait on queue space.

use chrono::Utc;
use tracing::{info, warn};

use modscan_core::metrics as m;
use modscan_core::storage::{ObjectStore, analysis_binary_path};
use modscan_core::warehouse::Warehouse;
use modscan_jobs::{Job, JobStore};
use modscan_scanner::corpus::{
    ImportBounds, ModuleFile, ModuleIndex, ModuleSpec, OBJSTORE_PREFIX, StoredModuleFile, select,
};
use modscan_scanner::{AnalysisRequest, EnqueueParams, ScanTarget};

use crate::error::ApiError;
use crate::state::AppState;
use crate::worker::Task;

/// Version used for corpus entries without one.
pub const LATEST_VERSION: &str = "latest";

/// Kind of bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueKind {
    Vulncheck,
    Analysis,
}

impl EnqueueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vulncheck => "vulncheck",
            Self::Analysis => "analysis",
        }
    }
}

/// Load the module list named by the request, or the configured default.
///
/// Request-supplied lists must live in the object store (`objstore://`);
/// only the configured default may be a local path.
pub async fn load_corpus<W: Warehouse>(
    state: &AppState<W>,
    file: Option<&str>,
) -> Result<Vec<ModuleSpec>, ApiError> {
    let modules = match file {
        Some(name) if name.starts_with(OBJSTORE_PREFIX) => {
            StoredModuleFile::new(state.store(), name).modules().await?
        }
        Some(name) => {
            return Err(ApiError::BadRequest(format!(
                "module file '{name}' must be an {OBJSTORE_PREFIX} path"
            )));
        }
        None if state.config.corpus_file.is_empty() => {
            return Err(ApiError::BadRequest(
                "no module file given and no default corpus configured".to_owned(),
            ));
        }
        None if state.config.corpus_file.starts_with(OBJSTORE_PREFIX) => {
            StoredModuleFile::new(state.store(), &state.config.corpus_file)
                .modules()
                .await?
        }
        None => ModuleFile::new(&state.config.corpus_file).modules().await?,
    };
    Ok(modules)
}

fn build_task(
    kind: EnqueueKind,
    params: &EnqueueParams,
    job_id: &str,
    module: ModuleSpec,
) -> Result<Task, ApiError> {
    let version = module
        .version
        .unwrap_or_else(|| LATEST_VERSION.to_owned());
    let task = match kind {
        EnqueueKind::Vulncheck => Task::Vulncheck {
            target: ScanTarget::new(module.path, version, params.mode)?
                .with_imported_by(module.imported_by),
            job_id: Some(job_id.to_owned()),
        },
        EnqueueKind::Analysis => Task::Analysis(AnalysisRequest {
            module: module.path,
            version,
            binary: params.binary.clone(),
            args: params.args.clone(),
            insecure: false,
            job_id: Some(job_id.to_owned()),
            no_deps: false,
        }),
    };
    Ok(task)
}

/// Create a job for the selected modules and queue its tasks.
///
/// Job IDs have minute resolution: a second job from the same user in
/// the same minute is rejected with `Conflict`.
pub async fn enqueue<W: Warehouse>(
    state: &AppState<W>,
    kind: EnqueueKind,
    params: EnqueueParams,
    url: &str,
) -> Result<Job, ApiError> {
    if params.user.is_empty() {
        return Err(ApiError::BadRequest("missing user".to_owned()));
    }

    let mut job = Job::new(&params.user, Utc::now(), url);
    if kind == EnqueueKind::Analysis {
        params.validate_for_analysis()?;
        let checksum = state
            .store()
            .checksum(&analysis_binary_path(&params.binary))
            .await?
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "analysis binary '{}' has not been uploaded",
                    params.binary
                ))
            })?;
        job = job.with_binary(&params.binary, checksum, params.args.clone());
    }

    let modules = load_corpus(state, params.file.as_deref()).await?;
    let available = modules.len();
    let selected = select(
        modules,
        ImportBounds {
            min: params.min,
            max: params.max,
        },
    );

    let tasks = selected
        .into_iter()
        .map(|module| build_task(kind, &params, &job.id, module))
        .collect::<Result<Vec<_>, _>>()?;
    let count = u64::try_from(tasks.len()).unwrap_or(u64::MAX);
    job.record_enqueued(count);
    state.jobs.create(job.clone()).await?;

    let queue = state.queue().clone();
    let job_id = job.id.clone();
    tokio::spawn(async move {
        for task in tasks {
            if queue.send(task).await.is_err() {
                warn!(job_id = %job_id, "task queue closed while enqueueing");
                break;
            }
        }
    });

    metrics::counter!(m::JOBS_TASKS_ENQUEUED_TOTAL, m::LABEL_MODE => kind.as_str())
        .increment(count);
    info!(
        job_id = %job.id,
        kind = kind.as_str(),
        available,
        enqueued = count,
        min = params.min,
        max = ?params.max,
        "job enqueued"
    );
    Ok(job)
}
