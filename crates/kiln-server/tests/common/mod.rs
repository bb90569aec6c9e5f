#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use kiln_core::domain::{
    ArtifactRef, JobId, JobPatch, JobRecord, MergeOutcome, ProgressEvent, RunnerError, StoreError,
};
use kiln_core::ports::{JobContext, JobRunner, ProgressReporter, StateStore};
use kiln_core::{Orchestrator, OrchestratorBuilder, OrchestratorConfig};
use tower::ServiceExt;

use kiln_server::config::ServerConfig;
use kiln_server::router::build_app_router;
use kiln_server::runner::RunnerSettings;
use kiln_server::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        runner: RunnerSettings::default(),
    }
}

/// In-process runner: `ok.py` produces an artifact, `hang.py` never returns,
/// anything else fails.
pub struct FakeRunner;

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run(
        &self,
        ctx: JobContext,
        mut progress: ProgressReporter,
    ) -> Result<ArtifactRef, RunnerError> {
        progress
            .report(ProgressEvent::new(30, "installing dependencies").with_log("resolving"))
            .await;
        progress
            .report(ProgressEvent::new(70, "building").with_log("linking"))
            .await;
        if ctx.input.source == "hang.py" {
            std::future::pending::<()>().await;
        }
        if ctx.input.source != "ok.py" {
            return Err(RunnerError::Failed("build failed: unsupported source".into()));
        }
        let filename = format!("{}.zip", ctx.id);
        tokio::fs::write(ctx.work_dir.join(&filename), b"PK\x05\x06fake").await?;
        Ok(ArtifactRef::new(filename))
    }
}

/// State store that is never reachable.
pub struct DownStore;

#[async_trait]
impl StateStore for DownStore {
    async fn put(&self, _: JobRecord) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
    async fn get(&self, _: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
    async fn merge(&self, _: &JobId, _: JobPatch) -> Result<MergeOutcome, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
    async fn append_log(&self, _: &JobId, _: String) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
    async fn delete(&self, _: &JobId) -> Result<bool, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
    async fn expired(&self, _: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
}

pub struct TestApp {
    pub router: Router,
    pub orchestrator: Arc<Orchestrator>,
    _artifacts: tempfile::TempDir,
}

/// Build the full application router (same middleware stack as production)
/// around an orchestrator backed by the in-memory store.
pub fn build_test_app() -> TestApp {
    build_test_app_with(None, |_| {})
}

pub fn build_test_app_with(
    store: Option<Arc<dyn StateStore>>,
    tweak: impl FnOnce(&mut OrchestratorConfig),
) -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = OrchestratorConfig {
        artifact_root: tmp.path().to_path_buf(),
        ..OrchestratorConfig::default()
    };
    tweak(&mut config);
    let mut builder = OrchestratorBuilder::new(config).runner(Arc::new(FakeRunner));
    if let Some(store) = store {
        builder = builder.store(store);
    }
    let orchestrator = Arc::new(builder.build().unwrap());

    let server_config = test_config();
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
    };
    TestApp {
        router: build_app_router(state, &server_config),
        orchestrator,
        _artifacts: tmp,
    }
}

pub async fn send(app: &TestApp, method: Method, uri: &str, body: Option<&str>) -> Response<Body> {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap()
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: &TestApp, uri: &str, json: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(json)).await
}

pub async fn delete(app: &TestApp, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Submit `source` and return the job id.
pub async fn submit(app: &TestApp, source: &str) -> String {
    let response = post_json(app, "/api/v1/jobs", &format!(r#"{{"source":"{source}"}}"#)).await;
    let json = body_json(response).await;
    json["job_id"].as_str().unwrap().to_string()
}

/// Wait until `n` jobs have been picked up by workers.
pub async fn wait_running(app: &TestApp, n: usize) {
    for _ in 0..500 {
        if app.orchestrator.stats().running == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{n} job(s) never started");
}

/// Poll until the job reports `completed`, returning the last status body.
pub async fn wait_completed(app: &TestApp, job_id: &str) -> serde_json::Value {
    for _ in 0..500 {
        let json = body_json(get(app, &format!("/api/v1/jobs/{job_id}")).await).await;
        if json["completed"] == true {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not complete");
}
