//! Control surface over a real listener.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use modscan_core::storage::{ObjectStore, analysis_binary_path, sha256_hex};
use modscan_core::warehouse::{MemoryWarehouse, upload_many};
use modscan_daemon::server;
use modscan_daemon::state::AppState;
use modscan_daemon::worker::Task;
use modscan_scanner::{ANALYSIS_TABLE, AnalysisResultRow};

use common::{TestEnv, create_job};

const CORPUS: &str = "\
a.example/one v1.0.0 500
b.example/two v1.1.0 50
c.example/three
";

struct Server {
    base: String,
    state: Arc<AppState<MemoryWarehouse>>,
    rx: mpsc::Receiver<Task>,
    shutdown: CancellationToken,
    client: reqwest::Client,
    token: String,
}

impl Server {
    async fn start(env: &TestEnv, token: &str) -> Self {
        let corpus = env.write_corpus("corpus.txt", CORPUS);
        let config = env
            .worker_config()
            .auth_token(token)
            .corpus_file(corpus.display().to_string())
            .build()
            .unwrap();
        let (state, rx) = env.state(config).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server::serve(listener, Arc::clone(&state), shutdown.clone()));

        Self {
            base: format!("http://{addr}"),
            state,
            rx,
            shutdown,
            client: reqwest::Client::new(),
            token: token.to_owned(),
        }
    }

    async fn get(&self, path: &str) -> (u16, String) {
        let mut request = self.client.get(format!("{}{path}", self.base));
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    async fn get_json(&self, path: &str) -> Value {
        let (status, body) = self.get(path).await;
        assert_eq!(status, 200, "GET {path}: {body}");
        serde_json::from_str(&body).unwrap()
    }

    async fn next_task(&mut self) -> Task {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("no task queued")
            .expect("queue closed")
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[tokio::test]
async fn healthz_is_open_while_jobs_need_token() {
    let env = TestEnv::new();
    let server = Server::start(&env, "s3cret").await;

    let health = reqwest::get(format!("{}/healthz", server.base)).await.unwrap();
    assert_eq!(health.status().as_u16(), 200);
    let health: Value = health.json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["workers"], 2);

    let anonymous = reqwest::get(format!("{}/jobs/list", server.base)).await.unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);
    assert_eq!(anonymous.text().await.unwrap(), "unauthorized");

    let wrong = server
        .client
        .get(format!("{}/jobs/list", server.base))
        .bearer_auth("guess")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status().as_u16(), 401);

    assert_eq!(server.get_json("/jobs/list").await, Value::Array(vec![]));
}

#[tokio::test]
async fn vulncheck_enqueue_selects_by_import_count() {
    let env = TestEnv::new();
    let mut server = Server::start(&env, "").await;

    let job = server
        .get_json("/vulncheck/enqueue?user=alice&min=10&mode=source")
        .await;
    assert_eq!(job["num_enqueued"], 2);
    assert!(job["id"].as_str().unwrap().starts_with("alice-"));
    assert!(job["url"].as_str().unwrap().contains("/vulncheck/enqueue"));

    let first = server.next_task().await;
    let second = server.next_task().await;
    match (&first, &second) {
        (Task::Vulncheck { target: a, job_id }, Task::Vulncheck { target: b, .. }) => {
            assert_eq!(a.module(), "a.example/one");
            assert_eq!(a.imported_by(), 500);
            assert_eq!(b.module(), "b.example/two");
            assert_eq!(job_id.as_deref(), job["id"].as_str());
        }
        other => panic!("unexpected tasks: {other:?}"),
    }

    let listed = server.get_json("/jobs/list").await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn corpus_entry_without_version_scans_latest() {
    let env = TestEnv::new();
    let mut server = Server::start(&env, "").await;

    let job = server.get_json("/vulncheck/enqueue?user=bob&max=5").await;
    assert_eq!(job["num_enqueued"], 1);
    match server.next_task().await {
        Task::Vulncheck { target, .. } => {
            assert_eq!(target.module(), "c.example/three");
            assert_eq!(target.version(), "latest");
        }
        other => panic!("unexpected task: {other:?}"),
    }
}

#[tokio::test]
async fn describe_and_cancel_job() {
    let env = TestEnv::new();
    let server = Server::start(&env, "").await;
    let job = create_job(&server.state, "carol", 4).await;

    let described = server.get_json(&format!("/jobs/describe?jobid={}", job.id)).await;
    assert_eq!(described["canceled"], false);

    let canceled = server.get_json(&format!("/jobs/cancel?jobid={}", job.id)).await;
    assert_eq!(canceled["canceled"], true);
    let again = server.get_json(&format!("/jobs/cancel?jobid={}", job.id)).await;
    assert_eq!(again["canceled"], true);

    let (status, body) = server.get("/jobs/describe?jobid=nobody-240101-0000").await;
    assert_eq!(status, 404);
    assert!(body.contains("job not found"), "{body}");

    let (status, body) = server.get("/jobs/describe").await;
    assert_eq!(status, 400);
    assert_eq!(body, "missing jobid");
}

#[tokio::test]
async fn enqueue_rejects_bad_requests() {
    let env = TestEnv::new();
    let server = Server::start(&env, "").await;

    let (status, body) = server.get("/vulncheck/enqueue?min=1").await;
    assert_eq!(status, 400);
    assert_eq!(body, "missing user");

    let (status, _) = server.get("/vulncheck/enqueue?user=a&min=10&max=1").await;
    assert_eq!(status, 400);

    let (status, body) = server
        .get("/vulncheck/enqueue?user=a&file=%2Fetc%2Fpasswd")
        .await;
    assert_eq!(status, 400);
    assert!(body.contains("objstore://"), "{body}");

    let (status, body) = server.get("/analysis/enqueue?user=a&binary=findcalls").await;
    assert_eq!(status, 400);
    assert!(body.contains("has not been uploaded"), "{body}");

    let (status, _) = server.get("/analysis/enqueue?user=a&binary=..%2Fx").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn analysis_enqueue_records_binary_checksum() {
    let env = TestEnv::new();
    let mut server = Server::start(&env, "").await;

    let binary = Bytes::from_static(b"\x7fELF fake analysis binary");
    let store = env.store();
    store
        .write(&analysis_binary_path("findcalls"), binary.clone())
        .await
        .unwrap();
    store
        .write(
            "module-files/top",
            Bytes::from_static(b"x.example/m v0.1.0 7\ny.example/n v0.2.0 3\n"),
        )
        .await
        .unwrap();

    let job = server
        .get_json("/analysis/enqueue?user=dave&binary=findcalls&args=-v+x&file=objstore%3A%2F%2Fmodule-files%2Ftop")
        .await;
    assert_eq!(job["num_enqueued"], 2);
    assert_eq!(job["binary"], "findcalls");
    assert_eq!(job["binary_version"], sha256_hex(&binary));
    assert_eq!(job["binary_args"], serde_json::json!(["-v", "x"]));

    match server.next_task().await {
        Task::Analysis(req) => {
            assert_eq!(req.module, "x.example/m");
            assert_eq!(req.binary, "findcalls");
            assert_eq!(req.job_id.as_deref(), job["id"].as_str());
        }
        other => panic!("unexpected task: {other:?}"),
    }
}

#[tokio::test]
async fn results_return_latest_rows_and_filter_errors() {
    let env = TestEnv::new();
    let server = Server::start(&env, "").await;
    let job = create_job(&server.state, "erin", 2).await;

    let mut ok = AnalysisResultRow::new("x.example/m", "v0.1.0", "findcalls", &[]);
    ok.job_id = job.id.clone();
    let mut failed = AnalysisResultRow::new("y.example/n", "v0.2.0", "findcalls", &[]);
    failed.job_id = job.id.clone();
    failed.error = "analysis binary crashed".to_owned();
    let mut other_job = AnalysisResultRow::new("z.example/o", "v1.0.0", "findcalls", &[]);
    other_job.job_id = "someone-else".to_owned();

    upload_many(
        &server.state.warehouse,
        &server.state.registry,
        ANALYSIS_TABLE,
        vec![ok, failed, other_job],
        10,
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let all = server.get_json(&format!("/jobs/results?jobid={}", job.id)).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let errors = server
        .get_json(&format!("/jobs/results?jobid={}&errors=true", job.id))
        .await;
    let errors = errors.as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["module_path"], "y.example/n");
}
