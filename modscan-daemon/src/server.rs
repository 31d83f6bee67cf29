//! HTTP control surface.
//!
//! | Route | Query | Response |
//! |-------|-------|----------|
//! | `GET /jobs/list` | | `[Job]`, newest first |
//! | `GET /jobs/describe` | `jobid` | `Job` |
//! | `GET /jobs/cancel` | `jobid` | `Job` after cancel |
//! | `GET /analysis/enqueue` | `binary user min max args file` | new `Job` |
//! | `GET /vulncheck/enqueue` | `user min max file mode` | new `Job` |
//! | `GET /jobs/results` | `jobid errors` | latest analysis rows of the job |
//! | `GET /healthz` | | `DaemonHealth` |
//!
//! Errors are plain-text bodies with a non-200 status. When
//! `server.auth_token` is set every route except `/healthz` requires
//! `Authorization: Bearer <token>`.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{RawQuery, Request, State};
use axum::http::{Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use modscan_core::warehouse::{PartitionQuery, Warehouse};
use modscan_jobs::{Job, JobStore, update_job};
use modscan_scanner::{ANALYSIS_TABLE, EnqueueParams};

use crate::enqueue::{EnqueueKind, enqueue};
use crate::error::ApiError;
use crate::health::{self, DaemonHealth};
use crate::state::AppState;

type Shared<W> = State<Arc<AppState<W>>>;

/// Build the router over shared state.
pub fn router<W: Warehouse>(state: Arc<AppState<W>>) -> Router {
    Router::new()
        .route("/jobs/list", get(list_jobs::<W>))
        .route("/jobs/describe", get(describe_job::<W>))
        .route("/jobs/cancel", get(cancel_job::<W>))
        .route("/jobs/results", get(job_results::<W>))
        .route("/analysis/enqueue", get(enqueue_analysis::<W>))
        .route("/vulncheck/enqueue", get(enqueue_vulncheck::<W>))
        .route("/healthz", get(healthz::<W>))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token::<W>,
        ))
        .with_state(state)
}

/// Serve until `shutdown` fires.
pub async fn serve<W: Warehouse>(
    listener: TcpListener,
    state: Arc<AppState<W>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(listen_addr = %addr, "control server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("control server failed: {}", e))
}

async fn require_token<W: Warehouse>(
    State(state): Shared<W>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.auth_token.as_str();
    if expected.is_empty() || request.uri().path() == "/healthz" {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if token_matches(provided, expected) {
        next.run(request).await
    } else {
        ApiError::Unauthorized.into_response()
    }
}

/// Constant-time bearer token comparison.
fn token_matches(provided: Option<&str>, expected: &str) -> bool {
    provided.is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
}

fn query_param(raw: Option<&str>, key: &str) -> Option<String> {
    url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn job_id_param(raw: Option<&str>) -> Result<String, ApiError> {
    query_param(raw, "jobid")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing jobid".to_owned()))
}

fn bool_param(raw: Option<&str>, key: &str) -> Result<bool, ApiError> {
    match query_param(raw, key).as_deref() {
        None | Some("") | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(ApiError::BadRequest(format!(
            "{key}: '{other}' is not a boolean"
        ))),
    }
}

async fn list_jobs<W: Warehouse>(State(state): Shared<W>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.jobs.list().await?))
}

async fn describe_job<W: Warehouse>(
    State(state): Shared<W>,
    RawQuery(query): RawQuery,
) -> Result<Json<Job>, ApiError> {
    let id = job_id_param(query.as_deref())?;
    Ok(Json(state.jobs.get(&id).await?))
}

async fn cancel_job<W: Warehouse>(
    State(state): Shared<W>,
    RawQuery(query): RawQuery,
) -> Result<Json<Job>, ApiError> {
    let id = job_id_param(query.as_deref())?;
    let job = update_job(&state.jobs, &id, state.config.update_max_attempts, |job| {
        job.cancel();
        Ok(())
    })
    .await?;
    info!(job_id = %id, "job canceled");
    Ok(Json(job))
}

async fn job_results<W: Warehouse>(
    State(state): Shared<W>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Value>>, ApiError> {
    let id = job_id_param(query.as_deref())?;
    let errors_only = bool_param(query.as_deref(), "errors")?;
    state.jobs.get(&id).await?;

    let latest = PartitionQuery::new(ANALYSIS_TABLE)
        .partition_on(["module_path", "sortable_version", "binary_name"])
        .order_by_desc("created_at")
        .filter_eq("job_id", id);
    let mut rows = state.warehouse.latest(&latest).await?;
    if errors_only {
        rows.retain(|row| {
            row.get("error")
                .and_then(Value::as_str)
                .is_some_and(|e| !e.is_empty())
        });
    }
    Ok(Json(rows))
}

async fn enqueue_analysis<W: Warehouse>(
    State(state): Shared<W>,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> Result<Json<Job>, ApiError> {
    let params = EnqueueParams::from_query(query.as_deref().unwrap_or_default())?;
    Ok(Json(
        enqueue(&state, EnqueueKind::Analysis, params, &uri.to_string()).await?,
    ))
}

async fn enqueue_vulncheck<W: Warehouse>(
    State(state): Shared<W>,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> Result<Json<Job>, ApiError> {
    let params = EnqueueParams::from_query(query.as_deref().unwrap_or_default())?;
    Ok(Json(
        enqueue(&state, EnqueueKind::Vulncheck, params, &uri.to_string()).await?,
    ))
}

async fn healthz<W: Warehouse>(State(state): Shared<W>) -> Json<DaemonHealth> {
    Json(health::report(&state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_must_match_exactly() {
        assert!(token_matches(Some("s3cret"), "s3cret"));
        assert!(!token_matches(Some("s3cres"), "s3cret"));
        assert!(!token_matches(Some("s3cret-longer"), "s3cret"));
        assert!(!token_matches(Some(""), "s3cret"));
        assert!(!token_matches(None, "s3cret"));
    }

    #[test]
    fn query_params_are_percent_decoded() {
        let raw = Some("jobid=alice-240501-1200&file=objstore%3A%2F%2Fx");
        assert_eq!(job_id_param(raw).unwrap(), "alice-240501-1200");
        assert_eq!(query_param(raw, "file").as_deref(), Some("objstore://x"));
    }

    #[test]
    fn missing_job_id_is_bad_request() {
        let err = job_id_param(Some("jobid=")).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(job_id_param(None).is_err());
    }

    #[test]
    fn errors_flag_parsing() {
        assert!(!bool_param(None, "errors").unwrap());
        assert!(bool_param(Some("errors=true"), "errors").unwrap());
        assert!(bool_param(Some("errors=1"), "errors").unwrap());
        assert!(bool_param(Some("errors=yes"), "errors").is_err());
    }
}
