//! End-to-end tests: webhook handlers, safety policy, real worker processes
//! and the on-disk audit trail.

#![cfg(unix)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use buy_relay::adapters::audit::AuditStore;
use buy_relay::adapters::http::{self, AppState};
use buy_relay::adapters::process::ProcessRunner;
use buy_relay::application::{Dispatcher, PipelineError, WebhookPipeline};
use buy_relay::domain::{DispatchFailureKind, SafetyLimits, WorkerKind, WorkerSettings};

const INITIAL_BUY: &str = "initial_buy.sh";
const NEXT_BUY: &str = "next_buy.sh";

struct Harness {
    _dir: TempDir,
    state: AppState,
    audit: AuditStore,
    scripts: PathBuf,
}

impl Harness {
    /// Workers are sh scripts written into a temp dir; each records its
    /// arguments next to itself so tests can inspect them.
    fn new(initial_buy: &str, next_buy: &str, timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let scripts = dir.path().join("workers");
        std::fs::create_dir(&scripts).unwrap();
        std::fs::write(scripts.join(INITIAL_BUY), initial_buy).unwrap();
        std::fs::write(scripts.join(NEXT_BUY), next_buy).unwrap();

        let audit = AuditStore::open(dir.path().join("data")).unwrap();
        let settings = WorkerSettings {
            interpreter: "sh".to_string(),
            initial_buy_script: scripts.join(INITIAL_BUY),
            next_buy_script: scripts.join(NEXT_BUY),
            market_name: "BTC".to_string(),
            data_dir: audit.data_dir().to_path_buf(),
            dry_run: false,
        };
        let runner = ProcessRunner::new().with_kill_grace(Duration::from_secs(2));
        let dispatcher = Dispatcher::new(settings, Arc::new(runner)).with_timeout(timeout);
        let pipeline = WebhookPipeline::new(
            Arc::new(SafetyLimits::default()),
            dispatcher,
            audit.clone(),
        );

        Self {
            _dir: dir,
            state: AppState::new(pipeline),
            audit,
            scripts,
        }
    }

    fn ok() -> Self {
        let record = "echo \"$@\" > \"$(dirname \"$0\")/args.txt\"\necho OK\n";
        Self::new(record, record, Duration::from_secs(10))
    }

    async fn post(&self, body: &'static [u8]) -> Response {
        self.post_with(HeaderMap::new(), body).await
    }

    async fn post_form(&self, body: &'static [u8]) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        self.post_with(headers, body).await
    }

    async fn post_with(&self, headers: HeaderMap, body: &'static [u8]) -> Response {
        http::webhook(State(self.state.clone()), headers, Bytes::from_static(body))
            .await
            .into_response()
    }

    fn recorded_args(&self) -> Option<String> {
        std::fs::read_to_string(self.scripts.join("args.txt"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn log_len(&self) -> usize {
        self.audit.raw_entries().unwrap().len()
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_initial_buy_end_to_end() {
    let harness = Harness::ok();

    let response = harness
        .post(br#"{"profit": "500", "level": 0, "tokenId": "abc"}"#)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["worker"], "initial_buy");
    assert_eq!(body["mode"], "live");

    let data_dir = harness.audit.data_dir().display().to_string();
    assert_eq!(
        harness.recorded_args().unwrap(),
        format!("abc 500 --market-name BTC --data-dir {}", data_dir)
    );

    let last = harness.audit.last_response().unwrap().unwrap();
    assert_eq!(last.worker, WorkerKind::InitialBuy);
    assert_eq!(last.parameters.token_id, "abc");
    assert!(harness.audit.last_error().unwrap().is_none());
    assert_eq!(harness.log_len(), 1);
}

#[tokio::test]
async fn test_next_buy_end_to_end() {
    let harness = Harness::ok();

    let response = harness
        .post(br#"{"profit": 25.5, "level": "3", "tokenId": "abc"}"#)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let args = harness.recorded_args().unwrap();
    assert!(args.starts_with("abc --level 3 --profit 25.5 --auto-confirm --data-dir "));
}

#[tokio::test]
async fn test_worker_failure_is_reported_and_snapshotted() {
    let failing = "echo 'bad arg' >&2\nexit 1\n";
    let harness = Harness::new(failing, failing, Duration::from_secs(10));

    let response = harness
        .post(br#"{"profit": "10", "level": 1, "tokenId": "abc"}"#)
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "worker_failure");
    assert_eq!(body["worker"], "next_buy");
    assert!(body["error"].as_str().unwrap().contains("bad arg"));

    let last = harness.audit.last_error().unwrap().unwrap();
    assert_eq!(last.kind, DispatchFailureKind::WorkerFailure);
    assert!(harness.audit.last_response().unwrap().is_none());
    assert_eq!(harness.log_len(), 1);
}

#[tokio::test]
async fn test_hung_worker_times_out() {
    let hung = "echo started\nexec sleep 30\n";
    let harness = Harness::new(hung, hung, Duration::from_millis(500));

    let started = Instant::now();
    let response = harness
        .post(br#"{"profit": "10", "level": 0, "tokenId": "abc"}"#)
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "timeout");
    assert!(body["output"].as_str().unwrap().contains("started"));
}

#[tokio::test]
async fn test_missing_fields_never_spawn() {
    let harness = Harness::ok();

    let bodies: [&'static [u8]; 4] = [
        br#"{"level": 0, "tokenId": "abc"}"#,
        br#"{"profit": "10", "tokenId": "abc"}"#,
        br#"{"profit": "10", "level": 0}"#,
        b"not json at all",
    ];
    for body in bodies {
        let response = harness.post(body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    assert!(harness.recorded_args().is_none());
    assert_eq!(harness.log_len(), bodies.len());
    assert!(harness.audit.last_response().unwrap().is_none());
    assert!(harness.audit.last_error().unwrap().is_none());
}

#[tokio::test]
async fn test_form_encoded_instruction_is_executed() {
    let harness = Harness::ok();

    let response = harness.post_form(b"profit=10&level=0&tokenid=abc").await;

    assert_eq!(response.status(), StatusCode::OK);
    let args = harness.recorded_args().unwrap();
    assert!(args.starts_with("abc 10 --market-name BTC --data-dir "));

    let entries = harness.audit.raw_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload, json!("profit=10&level=0&tokenid=abc"));
}

#[tokio::test]
async fn test_form_encoded_missing_field_is_rejected() {
    let harness = Harness::ok();

    let response = harness.post_form(b"profit=10&tokenid=abc").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.recorded_args().is_none());
    assert_eq!(harness.log_len(), 1);
}

#[tokio::test]
async fn test_disconnected_client_does_not_cancel_worker() {
    let slow = "sleep 1\ntouch \"$(dirname \"$0\")/done\"\necho OK\n";
    let harness = Harness::new(slow, slow, Duration::from_secs(10));

    // Dropping the handler future is what the server does on disconnect
    let abandoned = tokio::time::timeout(
        Duration::from_millis(300),
        harness.post(br#"{"profit": "10", "level": 0, "tokenId": "abc"}"#),
    )
    .await;
    assert!(abandoned.is_err());

    let deadline = Instant::now() + Duration::from_secs(10);
    while harness.audit.last_response().unwrap().is_none() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(harness.scripts.join("done").exists());
    assert!(harness.audit.last_response().unwrap().is_some());
    assert!(harness.audit.last_error().unwrap().is_none());
    assert_eq!(harness.log_len(), 1);
}

#[tokio::test]
async fn test_policy_rejections_never_spawn() {
    let harness = Harness::ok();

    let response = harness
        .post(br#"{"profit": "2500", "level": 0, "tokenId": "abc"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let reason = body_json(response).await["reason"].as_str().unwrap().to_string();
    assert!(reason.contains("2500") && reason.contains("2000"));

    let response = harness
        .post(br#"{"profit": "1", "level": 6, "tokenId": "abc"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(harness.recorded_args().is_none());
    assert_eq!(harness.log_len(), 2);
}

#[tokio::test]
async fn test_missing_interpreter_is_spawn_failure() {
    let dir = TempDir::new().unwrap();
    let audit = AuditStore::open(dir.path()).unwrap();
    let settings = WorkerSettings {
        interpreter: "/nonexistent/python-for-tests".to_string(),
        data_dir: audit.data_dir().to_path_buf(),
        ..Default::default()
    };
    let dispatcher = Dispatcher::new(settings, Arc::new(ProcessRunner::new()));
    let pipeline = WebhookPipeline::new(Arc::new(SafetyLimits::default()), dispatcher, audit);

    let err = pipeline
        .handle(&json!({"profit": "10", "level": 0, "tokenId": "abc"}))
        .await
        .unwrap_err();

    match err {
        PipelineError::DispatchFailed(failure) => {
            assert_eq!(failure.kind, DispatchFailureKind::SpawnFailure);
            assert!(failure.error.starts_with("Failed to start worker"));
        }
        other => panic!("expected spawn failure, got {:?}", other),
    }
    assert!(pipeline.audit().last_error().unwrap().is_some());
}

#[tokio::test]
async fn test_log_grows_once_per_request_in_every_branch() {
    let harness = Harness::ok();

    let bodies: [&'static [u8]; 3] = [
        br#"{"profit": "10", "level": 0, "tokenId": "abc"}"#,
        br#"{"profit": "10", "level": 9, "tokenId": "abc"}"#,
        br#"{"level": 0}"#,
    ];
    for (i, body) in bodies.into_iter().enumerate() {
        harness.post(body).await;
        assert_eq!(harness.log_len(), i + 1);
    }
}

#[tokio::test]
async fn test_status_endpoint() {
    let harness = Harness::ok();

    let response = http::status(State(harness.state.clone())).await.into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["server"], "running");
    assert_eq!(body["mode"], "live");
    assert_eq!(body["safety_limits"]["max_level"], 5);
    assert_eq!(body["safety_limits"]["enabled"], true);
}
