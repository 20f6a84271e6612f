#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reportbridge_core::results::{EngineStatus, JobResult, ReportResult};
use reportbridge_core::script::{ConfigResolver, CredentialType, JobSpecification, SessionCredential};
use reportbridge_core::types::{JobId, UserIdentity};
use reportbridge_delivery::{DistributionError, Distributor};
use reportbridge_engine::{EngineError, RenderingEngine, SubmitResponse};
use reportbridge_orchestrator::{
    JobSnapshot, Orchestrator, OrchestratorConfig, RestartConfig, StartRequest, Watcher,
};
use reportbridge_session::{SessionCache, SessionError, SessionKey, SessionProvider};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Rendering engine
// ---------------------------------------------------------------------------

/// In-memory rendering engine recording every call.
#[derive(Default)]
pub struct FakeEngine {
    results: Mutex<HashMap<JobId, Vec<JobResult>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// File names requested through `download_artifact`, in order.
    pub downloads: Mutex<Vec<String>>,
    pub submitted: Mutex<Vec<(JobId, JobSpecification)>>,
    pub stopped: Mutex<Vec<JobId>>,
    pub deleted: Mutex<Vec<String>>,
    pub uploaded: Mutex<Vec<String>>,
    /// When set, submissions are answered with `success: false`.
    pub reject_submissions: AtomicBool,
    /// Number of upcoming polls that fail with a 503.
    pub failing_polls: AtomicUsize,
}

impl FakeEngine {
    pub fn set_results(&self, id: JobId, results: Vec<JobResult>) {
        self.results.lock().unwrap().insert(id, results);
    }

    /// Serve `data` under the file name `name`.
    pub fn add_file(&self, name: &str, data: &[u8]) {
        self.files.lock().unwrap().insert(name.to_string(), data.to_vec());
    }

    pub fn fail_polls(&self, count: usize) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn submitted_spec(&self, id: JobId) -> Option<JobSpecification> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .find(|(submitted, _)| *submitted == id)
            .map(|(_, spec)| spec.clone())
    }
}

#[async_trait]
impl RenderingEngine for FakeEngine {
    async fn submit(
        &self,
        job_id: JobId,
        spec: &JobSpecification,
    ) -> Result<SubmitResponse, EngineError> {
        self.submitted.lock().unwrap().push((job_id, spec.clone()));
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Ok(SubmitResponse {
                success: false,
                operation_id: None,
                error: Some("template missing".into()),
            });
        }
        Ok(SubmitResponse {
            success: true,
            operation_id: Some(format!("op-{job_id}")),
            error: None,
        })
    }

    async fn poll_results(&self, job_id: JobId) -> Result<Vec<JobResult>, EngineError> {
        let failing = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::Api {
                status: 503,
                body: "engine down".into(),
            });
        }
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn download_artifact(
        &self,
        _job_id: JobId,
        name: &str,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        self.downloads.lock().unwrap().push(name.to_string());
        Ok(self.files.lock().unwrap().get(name).cloned())
    }

    async fn stop(&self, job_id: JobId) -> Result<bool, EngineError> {
        self.stopped.lock().unwrap().push(job_id);
        Ok(true)
    }

    async fn delete_working_dir(&self, id: &str) -> Result<bool, EngineError> {
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(true)
    }

    async fn upload_artifact(&self, filename: &str, _data: Vec<u8>) -> Result<String, EngineError> {
        let mut uploaded = self.uploaded.lock().unwrap();
        uploaded.push(filename.to_string());
        Ok(format!("upload-{}", uploaded.len()))
    }
}

// ---------------------------------------------------------------------------
// Distribution service
// ---------------------------------------------------------------------------

/// Distributor that answers with a fixed text after an optional delay.
pub struct FakeDistributor {
    pub calls: AtomicUsize,
    pub received: Mutex<Vec<Vec<JobResult>>>,
    pub response: Mutex<String>,
    pub delay: Mutex<Duration>,
    /// Calls that ended because their token was cancelled.
    pub cancelled: AtomicUsize,
    /// When set, calls fail with a 502.
    pub fail: AtomicBool,
}

impl Default for FakeDistributor {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            response: Mutex::new(
                r#"[{"type": "mail", "success": true, "message": "sent", "reportName": "Sales"}]"#
                    .into(),
            ),
            delay: Mutex::new(Duration::ZERO),
            cancelled: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

impl FakeDistributor {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Distributor for FakeDistributor {
    async fn distribute(
        &self,
        _job_id: JobId,
        results: &[JobResult],
        cancel: CancellationToken,
    ) -> Result<String, DistributionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().unwrap().push(results.to_vec());

        let delay = *self.delay.lock().unwrap();
        tokio::select! {
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                return Err(DistributionError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(DistributionError::Api {
                status: 502,
                body: "smtp unreachable".into(),
            });
        }
        Ok(self.response.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Session provider
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeProvider {
    pub issued: AtomicUsize,
    pub released: AtomicUsize,
    /// When set, issuance answers without a credential.
    pub refuse: AtomicBool,
}

#[async_trait]
impl SessionProvider for FakeProvider {
    async fn issue(&self, _key: &SessionKey) -> Result<Option<SessionCredential>, SessionError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(SessionCredential {
            cookie_name: "X-Qlik-Session".into(),
            cookie_value: format!("cookie-{n}"),
            bearer_token: None,
        }))
    }

    async fn validate(&self, _key: &SessionKey, _credential: &SessionCredential) -> bool {
        true
    }

    async fn release(&self, _key: &SessionKey, _credential: &SessionCredential) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub watcher: Watcher,
    pub engine: Arc<FakeEngine>,
    pub distributor: Arc<FakeDistributor>,
    pub provider: Arc<FakeProvider>,
}

impl Harness {
    pub fn snapshot(&self, id: JobId) -> JobSnapshot {
        self.orchestrator.pool().get(id).unwrap().snapshot()
    }

    pub fn released(&self) -> usize {
        self.provider.released.load(Ordering::SeqCst)
    }
}

/// Fast watcher, cleanup far enough away that records stay inspectable.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        watcher_interval: Duration::from_millis(10),
        idle_timeout: None,
        cleanup_delay: Duration::from_secs(3600),
        restart: RestartConfig {
            max_restarts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        },
        template_dir: None,
        shutdown_timeout: Duration::from_secs(5),
    }
}

pub fn harness(config: OrchestratorConfig) -> Harness {
    let engine = Arc::new(FakeEngine::default());
    let distributor = Arc::new(FakeDistributor::default());
    let provider = Arc::new(FakeProvider::default());

    let orchestrator = Orchestrator::new(
        config,
        ConfigResolver::new(CredentialType::Session),
        SessionCache::new(provider.clone()),
        engine.clone(),
        distributor.clone(),
    );
    let watcher = Watcher::new(Arc::clone(&orchestrator));

    Harness {
        orchestrator,
        watcher,
        engine,
        distributor,
        provider,
    }
}

pub fn start_request(script: &str) -> StartRequest {
    StartRequest {
        script: script.to_string(),
        server_uri: "https://sense.example".into(),
        app_id: "app-1".into(),
        user: UserIdentity::new("CORP", "alice"),
    }
}

pub const SCRIPT: &str = "{template: {input: 'sales.xlsx', output: 'Sales'}}";

// ---------------------------------------------------------------------------
// Result builders
// ---------------------------------------------------------------------------

pub fn task(status: EngineStatus) -> JobResult {
    JobResult {
        status,
        message: None,
        reports: Vec::new(),
    }
}

pub fn finished(paths: &[&str]) -> JobResult {
    JobResult {
        status: EngineStatus::Success,
        message: None,
        reports: vec![ReportResult {
            name: Some("Sales".into()),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            artifacts: Vec::new(),
        }],
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
