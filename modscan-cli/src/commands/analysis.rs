//! `modscan analysis enqueue` command handler
//!
//! Uploads the analysis binary (and an optional module list) to the object
//! store, skipping objects whose checksum already matches, then asks the
//! daemon to enqueue one task per selected module.

use std::path::Path;

use bytes::Bytes;
use chrono::Utc;
use tracing::info;

use modscan_core::config::ModscanConfig;
use modscan_core::storage::{
    FsObjectStore, ObjectStore, analysis_binary_path, module_file_path, upload_if_changed,
};
use modscan_scanner::EnqueueParams;
use modscan_scanner::corpus::OBJSTORE_PREFIX;
use modscan_scanner::request::split_args;

use crate::cli::{AnalysisAction, AnalysisArgs, EnqueueArgs};
use crate::client::ControlClient;
use crate::commands::jobs::JobDetail;
use crate::error::CliError;
use crate::output::OutputWriter;

/// Execute the `analysis` command.
pub async fn execute(
    args: AnalysisArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let AnalysisAction::Enqueue(args) = args.action;

    let config = ModscanConfig::load(config_path).await?;
    let store = FsObjectStore::new(&config.storage.root);
    let params = upload_inputs(&store, &args).await?;

    let client = ControlClient::from_env(&args.server);
    let job = client.enqueue_analysis(&params).await?;
    info!(job_id = %job.id, enqueued = job.num_enqueued, "analysis job created");

    writer.render(&JobDetail::new(job, Utc::now()))
}

fn base_name(path: &Path) -> Result<&str, CliError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CliError::Command(format!("'{}' has no file name", path.display())))
}

/// Upload the binary and module list, returning the enqueue parameters.
///
/// The binary is stored under its base name; the module list goes under
/// the user's module file directory and is referenced as `objstore://`.
pub async fn upload_inputs<S: ObjectStore>(
    store: &S,
    args: &EnqueueArgs,
) -> Result<EnqueueParams, CliError> {
    let binary = base_name(&args.binary)?.to_owned();
    let data = tokio::fs::read(&args.binary).await?;
    let object = analysis_binary_path(&binary);
    let uploaded = upload_if_changed(store, &object, Bytes::from(data)).await?;
    info!(binary = %binary, object = %object, uploaded, "analysis binary ready");

    let file = match &args.file {
        Some(path) => {
            let name = module_file_path(Some(&args.user), base_name(path)?);
            let data = tokio::fs::read(path).await?;
            let uploaded = upload_if_changed(store, &name, Bytes::from(data)).await?;
            info!(object = %name, uploaded, "module file ready");
            Some(format!("{OBJSTORE_PREFIX}{name}"))
        }
        None => None,
    };

    if let Some(max) = args.max
        && max < args.min
    {
        return Err(CliError::Command(format!(
            "max ({max}) is less than min ({})",
            args.min
        )));
    }

    let params = EnqueueParams {
        binary,
        user: args.user.clone(),
        min: args.min,
        max: args.max,
        args: args.args.as_deref().map(split_args).unwrap_or_default(),
        file,
        ..EnqueueParams::default()
    };
    params.validate_for_analysis()?;
    Ok(params)
}
