//! `modscan jobs` against a stub control server.

use axum::extract::RawQuery;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use serial_test::serial;
use tokio::net::TcpListener;

use modscan_cli::client::{ControlClient, TOKEN_ENV};
use modscan_cli::error::CliError;
use modscan_jobs::Job;

const TOKEN: &str = "t0ken";

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {TOKEN}");
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str())
}

fn sample_job() -> Job {
    let mut job = Job::new("alice", Utc::now(), "/vulncheck/enqueue?user=alice");
    job.record_enqueued(3);
    job
}

async fn start_stub() -> String {
    let app = Router::new()
        .route(
            "/jobs/list",
            get(|headers: HeaderMap| async move {
                if !authorized(&headers) {
                    return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
                }
                Json(vec![sample_job()]).into_response()
            }),
        )
        .route(
            "/jobs/describe",
            get(|RawQuery(query): RawQuery| async move {
                let query = query.unwrap_or_default();
                if query.contains("jobid=missing") {
                    return (StatusCode::NOT_FOUND, "job not found: missing\n").into_response();
                }
                Json(sample_job()).into_response()
            }),
        )
        .route(
            "/jobs/results",
            get(|RawQuery(query): RawQuery| async move {
                Json(vec![json!({"query": query.unwrap_or_default()})]).into_response()
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _: Result<(), _> = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn status_of(err: &CliError) -> Option<u16> {
    match err {
        CliError::Server { status, .. } => Some(*status),
        _ => None,
    }
}

#[tokio::test]
async fn list_sends_bearer_token() {
    let base = start_stub().await;
    let client = ControlClient::new(&base, Some(TOKEN.to_owned()));

    let jobs = client.list_jobs().await.expect("list");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].user, "alice");
    assert_eq!(jobs[0].num_enqueued, 3);
}

#[tokio::test]
async fn missing_token_surfaces_server_body() {
    let base = start_stub().await;
    let client = ControlClient::new(&base, None);

    let err = client.list_jobs().await.unwrap_err();
    assert_eq!(status_of(&err), Some(401));
    assert_eq!(err.to_string(), "unauthorized");
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn unknown_job_body_is_shown_verbatim() {
    let base = start_stub().await;
    let client = ControlClient::new(&base, None);

    let err = client.describe_job("missing").await.unwrap_err();
    assert_eq!(status_of(&err), Some(404));
    assert_eq!(err.to_string(), "job not found: missing");
}

#[tokio::test]
async fn results_pass_job_id_and_errors_flag() {
    let base = start_stub().await;
    let client = ControlClient::new(&base, None);

    let rows = client.job_results("alice-240501-1200", true).await.unwrap();
    assert_eq!(rows[0]["query"], "jobid=alice-240501-1200&errors=true");
}

#[tokio::test]
async fn unreachable_server_maps_to_exit_code_3() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ControlClient::new(&format!("http://{addr}"), None);
    let err = client.list_jobs().await.unwrap_err();
    assert!(matches!(err, CliError::ServerUnavailable(_)), "{err:?}");
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
#[serial]
async fn token_is_read_from_environment() {
    let base = start_stub().await;
    // SAFETY: serial test, no concurrent environment access.
    unsafe { std::env::set_var(TOKEN_ENV, TOKEN) };
    let result = ControlClient::from_env(&base).list_jobs().await;
    unsafe { std::env::remove_var(TOKEN_ENV) };

    assert_eq!(result.expect("list").len(), 1);
}
