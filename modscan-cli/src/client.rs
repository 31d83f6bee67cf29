//! HTTP client for the `modscan-daemon` control surface.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use modscan_jobs::Job;
use modscan_scanner::EnqueueParams;

use crate::error::CliError;

/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "MODSCAN_TOKEN";

/// Control server client.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ControlClient {
    /// Client for `base` with an optional bearer token.
    pub fn new(base: &str, token: Option<String>) -> Self {
        Self {
            base: base.trim_end_matches('/').to_owned(),
            token: token.filter(|t| !t.is_empty()),
            http: reqwest::Client::new(),
        }
    }

    /// Client for `base` with the token from `MODSCAN_TOKEN`.
    pub fn from_env(base: &str) -> Self {
        Self::new(base, std::env::var(TOKEN_ENV).ok())
    }

    /// Request URL for `path` and an encoded query string.
    pub fn url(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}{path}", self.base)
        } else {
            format!("{}{path}?{query}", self.base)
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T, CliError> {
        let url = self.url(path, query);
        debug!(url = %url, "control request");

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CliError::Server {
                status: status.as_u16(),
                body: body.trim_end().to_owned(),
            });
        }
        Ok(response.json::<T>().await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, CliError> {
        self.get("/jobs/list", "").await
    }

    pub async fn describe_job(&self, id: &str) -> Result<Job, CliError> {
        self.get("/jobs/describe", &job_query(id, false)).await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<Job, CliError> {
        self.get("/jobs/cancel", &job_query(id, false)).await
    }

    /// Latest analysis rows of a job, optionally only those with an error.
    pub async fn job_results(&self, id: &str, errors_only: bool) -> Result<Vec<Value>, CliError> {
        self.get("/jobs/results", &job_query(id, errors_only)).await
    }

    pub async fn enqueue_analysis(&self, params: &EnqueueParams) -> Result<Job, CliError> {
        self.get("/analysis/enqueue", &params.to_query()).await
    }
}

fn job_query(id: &str, errors_only: bool) -> String {
    let mut s = url::form_urlencoded::Serializer::new(String::new());
    s.append_pair("jobid", id);
    if errors_only {
        s.append_pair("errors", "true");
    }
    s.finish()
}
