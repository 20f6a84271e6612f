//! Tests for `EngineApi` against a local axum stand-in for the engine.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use reportbridge_core::results::EngineStatus;
use reportbridge_core::script::JobSpecification;
use reportbridge_core::types::JobId;
use reportbridge_engine::{EngineApi, EngineError, RenderingEngine};
use serde_json::{json, Value};

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Engine stand-in that knows a single job.
fn fake_engine(known: JobId) -> Router {
    let known = Arc::new(known.to_string());

    async fn submit(Path(id): Path<String>, Json(spec): Json<Value>) -> Json<Value> {
        let has_tasks = spec.get("tasks").is_some_and(Value::is_array);
        Json(json!({"success": has_tasks, "operationId": format!("op-{id}")}))
    }

    async fn results(State(known): State<Arc<String>>, Path(id): Path<String>) -> Response {
        if id != *known {
            return StatusCode::NOT_FOUND.into_response();
        }
        Json(json!([
            {"status": "SUCCESS", "reports": [{"name": "Sales", "paths": ["Sales Q1.pdf"]}]}
        ]))
        .into_response()
    }

    async fn file(Path((_id, name)): Path<(String, String)>) -> Response {
        if name == "Sales Q1.pdf" {
            Bytes::from_static(b"%PDF-1.7").into_response()
        } else {
            StatusCode::NOT_FOUND.into_response()
        }
    }

    async fn stop() -> Json<Value> {
        Json(json!({"success": true}))
    }

    async fn upload(body: Bytes) -> Response {
        let text = String::from_utf8_lossy(&body);
        if text.contains("filename=\"sales.xlsx\"") && text.contains("template-bytes") {
            Json(json!({"id": "art-1"})).into_response()
        } else {
            StatusCode::BAD_REQUEST.into_response()
        }
    }

    async fn remove(Path(id): Path<String>) -> StatusCode {
        if id == "art-1" {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::NOT_FOUND
        }
    }

    Router::new()
        .route("/api/v1/jobs/{id}", post(submit))
        .route("/api/v1/jobs/{id}/results", get(results))
        .route("/api/v1/jobs/{id}/files/{name}", get(file))
        .route("/api/v1/jobs/{id}/stop", post(stop))
        .route("/api/v1/files", post(upload))
        .route("/api/v1/files/{id}", delete(remove))
        .with_state(known)
}

fn spec() -> JobSpecification {
    serde_json::from_value(json!({
        "tasks": [{"reports": [{"template": {"input": "sales.xlsx"}}]}]
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Test: submission returns the engine's answer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_operation_id() {
    let id = JobId::new();
    let engine = EngineApi::new(serve(fake_engine(id)).await);

    let response = engine.submit(id, &spec()).await.unwrap();

    assert!(response.success);
    assert_eq!(response.operation_id, Some(format!("op-{id}")));
}

// ---------------------------------------------------------------------------
// Test: results are parsed, unknown jobs have none yet
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poll_results_parses_statuses() {
    let id = JobId::new();
    let engine = EngineApi::new(serve(fake_engine(id)).await);

    let results = engine.poll_results(id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, EngineStatus::Success);
    assert_eq!(results[0].reports[0].paths, vec!["Sales Q1.pdf".to_string()]);

    let none = engine.poll_results(JobId::new()).await.unwrap();
    assert!(none.is_empty());
}

// ---------------------------------------------------------------------------
// Test: artifacts download by name, missing ones are None
// ---------------------------------------------------------------------------

#[tokio::test]
async fn download_artifact_handles_missing_files() {
    let id = JobId::new();
    let engine = EngineApi::new(serve(fake_engine(id)).await);

    let bytes = engine.download_artifact(id, "Sales Q1.pdf").await.unwrap();
    assert_eq!(bytes.as_deref(), Some(&b"%PDF-1.7"[..]));

    let missing = engine.download_artifact(id, "nope.pdf").await.unwrap();
    assert!(missing.is_none());
}

// ---------------------------------------------------------------------------
// Test: stop, upload and delete round through the file store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_upload_and_delete() {
    let id = JobId::new();
    let engine = EngineApi::new(serve(fake_engine(id)).await);

    assert!(engine.stop(id).await.unwrap());

    let artifact = engine
        .upload_artifact("sales.xlsx", b"template-bytes".to_vec())
        .await
        .unwrap();
    assert_eq!(artifact, "art-1");

    assert!(engine.delete_working_dir(&artifact).await.unwrap());
    assert!(!engine.delete_working_dir("unknown").await.unwrap());
}

// ---------------------------------------------------------------------------
// Test: non-2xx answers carry status and body
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_errors_carry_status_and_body() {
    let router = Router::new().route(
        "/api/v1/jobs/{id}",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "engine down") }),
    );
    let engine = EngineApi::new(serve(router).await);

    let err = engine.submit(JobId::new(), &spec()).await.unwrap_err();

    match err {
        EngineError::Api { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "engine down");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: an unreachable engine is a request error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_engine_is_a_request_error() {
    let engine = EngineApi::new("http://127.0.0.1:1");

    let err = engine.poll_results(JobId::new()).await.unwrap_err();

    assert!(matches!(err, EngineError::Request(_)));
}
