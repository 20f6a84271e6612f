#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use reportbridge_api::config::ServerConfig;
use reportbridge_api::router::build_app_router;
use reportbridge_api::state::AppState;
use reportbridge_core::results::JobResult;
use reportbridge_core::script::{ConfigResolver, CredentialType, JobSpecification, SessionCredential};
use reportbridge_core::types::JobId;
use reportbridge_delivery::{DistributionError, Distributor};
use reportbridge_engine::{EngineError, RenderingEngine, SubmitResponse};
use reportbridge_orchestrator::{Orchestrator, OrchestratorConfig, Watcher};
use reportbridge_session::{SessionCache, SessionError, SessionKey, SessionProvider};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeEngine {
    results: Mutex<HashMap<JobId, Vec<JobResult>>>,
}

impl FakeEngine {
    pub fn set_results(&self, id: JobId, results: Vec<JobResult>) {
        self.results.lock().unwrap().insert(id, results);
    }
}

#[async_trait]
impl RenderingEngine for FakeEngine {
    async fn submit(&self, job_id: JobId, _spec: &JobSpecification) -> Result<SubmitResponse, EngineError> {
        Ok(SubmitResponse {
            success: true,
            operation_id: Some(format!("op-{job_id}")),
            error: None,
        })
    }

    async fn poll_results(&self, job_id: JobId) -> Result<Vec<JobResult>, EngineError> {
        Ok(self.results.lock().unwrap().get(&job_id).cloned().unwrap_or_default())
    }

    async fn download_artifact(&self, _job_id: JobId, _name: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(Some(b"pdf".to_vec()))
    }

    async fn stop(&self, _job_id: JobId) -> Result<bool, EngineError> {
        Ok(true)
    }

    async fn delete_working_dir(&self, _id: &str) -> Result<bool, EngineError> {
        Ok(true)
    }

    async fn upload_artifact(&self, _filename: &str, _data: Vec<u8>) -> Result<String, EngineError> {
        Ok("upload-1".into())
    }
}

pub struct FakeDistributor;

#[async_trait]
impl Distributor for FakeDistributor {
    async fn distribute(
        &self,
        _job_id: JobId,
        _results: &[JobResult],
        _cancel: CancellationToken,
    ) -> Result<String, DistributionError> {
        Ok(r#"[{"type": "hub", "success": true, "message": "published"}]"#.into())
    }
}

#[derive(Default)]
pub struct FakeProvider {
    pub refuse: AtomicBool,
}

#[async_trait]
impl SessionProvider for FakeProvider {
    async fn issue(&self, _key: &SessionKey) -> Result<Option<SessionCredential>, SessionError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(SessionCredential {
            cookie_name: "X-Qlik-Session".into(),
            cookie_value: "cookie".into(),
            bearer_token: None,
        }))
    }

    async fn validate(&self, _key: &SessionKey, _credential: &SessionCredential) -> bool {
        true
    }

    async fn release(&self, _key: &SessionKey, _credential: &SessionCredential) {}
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub orchestrator: Arc<Orchestrator>,
    pub watcher: Watcher,
    pub engine: Arc<FakeEngine>,
    pub provider: Arc<FakeProvider>,
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

/// Build the full application router over in-memory collaborators.
pub fn build_test_app() -> TestApp {
    let engine = Arc::new(FakeEngine::default());
    let provider = Arc::new(FakeProvider::default());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            cleanup_delay: Duration::from_secs(3600),
            ..OrchestratorConfig::default()
        },
        ConfigResolver::new(CredentialType::Session),
        SessionCache::new(provider.clone()),
        engine.clone(),
        Arc::new(FakeDistributor),
    );

    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        config: Arc::new(test_config()),
    };

    TestApp {
        router: build_app_router(state),
        watcher: Watcher::new(Arc::clone(&orchestrator)),
        orchestrator,
        engine,
        provider,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &TestApp, uri: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn start_body(script: &str) -> Value {
    serde_json::json!({
        "script": script,
        "serverUri": "https://sense.example",
        "app": "app-1",
        "user": {"directory": "CORP", "id": "alice"},
    })
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 2s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
