//! `OllamaClient` against an in-process axum stand-in for the Ollama API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use edgequake_medreport::pipeline::intake::StagedFile;
use edgequake_medreport::{
    AnalysisConfig, Analyzer, ErrorKind, ExtractionError, ModelBackend, ModelClient, ModelError,
    OllamaClient, TextExtractor, Upload,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<Value>>>,
}

async fn generate_ok(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.requests.lock().unwrap().push(body);
    Json(json!({
        "model": "llama3.1:8b",
        "response": "Here is the analysis: {\"summary\":\"Thyroid values in range\",\"key_findings\":[\"TSH 2.1\"],\"disclaimer\":\"Educational only\"}",
        "done": true
    }))
}

async fn generate_slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({ "response": "too late" }))
}

async fn generate_500() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded")
}

async fn generate_garbage() -> &'static str {
    "this is not json"
}

async fn tags() -> Json<Value> {
    Json(json!({ "models": [{ "name": "llama3.1:8b", "size": 4920753328u64 }] }))
}

/// Spawn the mock on an ephemeral port and return its base URL.
async fn spawn_mock(generate: Router<MockState>, state: MockState) -> String {
    let app = generate
        .route("/api/tags", get(tags))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn config(timeout_secs: u64) -> AnalysisConfig {
    AnalysisConfig::builder()
        .model_timeout_secs(timeout_secs)
        .probe_timeout_secs(1)
        .build()
        .unwrap()
}

#[tokio::test]
async fn generate_sends_non_streaming_request() {
    let state = MockState::default();
    let url = spawn_mock(
        Router::new().route("/api/generate", post(generate_ok)),
        state.clone(),
    )
    .await;

    let client = OllamaClient::new(&url, "llama3.1:8b", &config(10)).unwrap();
    let raw = assert_ok!(client.invoke("### FILE: a.pdf\nTSH 2.1").await);
    assert!(raw.contains("Thyroid values in range"));

    let requests = state.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["model"], "llama3.1:8b");
    assert_eq!(requests[0]["stream"], false);
    assert_eq!(requests[0]["prompt"], "### FILE: a.pdf\nTSH 2.1");
    assert_eq!(requests[0]["options"]["num_predict"], 2000);
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let url = spawn_mock(
        Router::new().route("/api/generate", post(generate_slow)),
        MockState::default(),
    )
    .await;

    let client = OllamaClient::new(&url, "m", &config(1)).unwrap();
    let err = assert_err!(client.invoke("hi").await);
    assert_eq!(err, ModelError::Timeout { secs: 1 });
}

#[tokio::test]
async fn server_error_is_bad_response() {
    let url = spawn_mock(
        Router::new().route("/api/generate", post(generate_500)),
        MockState::default(),
    )
    .await;

    let client = OllamaClient::new(&url, "m", &config(5)).unwrap();
    let err = assert_err!(client.invoke("hi").await);
    assert!(matches!(err, ModelError::BadResponse(ref m) if m.contains("500")));
}

#[tokio::test]
async fn non_json_body_is_bad_response() {
    let url = spawn_mock(
        Router::new().route("/api/generate", post(generate_garbage)),
        MockState::default(),
    )
    .await;

    let client = OllamaClient::new(&url, "m", &config(5)).unwrap();
    let err = assert_err!(client.invoke("hi").await);
    assert!(matches!(err, ModelError::BadResponse(_)));
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = OllamaClient::new(&format!("http://{addr}"), "m", &config(5)).unwrap();
    let err = assert_err!(client.invoke("hi").await);
    assert!(matches!(err, ModelError::Unreachable(_)), "got {err:?}");

    let err = assert_err!(client.probe().await);
    assert!(matches!(err, ModelError::Unreachable(_)), "got {err:?}");
}

#[tokio::test]
async fn probe_returns_tags_payload() {
    let url = spawn_mock(Router::new(), MockState::default()).await;
    let client = OllamaClient::new(&url, "llama3.1:8b", &config(5)).unwrap();
    let health = assert_ok!(client.probe().await);
    assert_eq!(health.model, "llama3.1:8b");
    assert_eq!(health.details["models"][0]["name"], "llama3.1:8b");
}

// ── Through the orchestrator ─────────────────────────────────────────────────

struct Verbatim;

#[async_trait::async_trait]
impl TextExtractor for Verbatim {
    async fn extract(&self, file: &StagedFile) -> Result<String, ExtractionError> {
        tokio::fs::read_to_string(&file.path)
            .await
            .map_err(|e| ExtractionError::Io(e.to_string()))
    }
}

#[tokio::test]
async fn analyzer_over_http_recovers_embedded_object() {
    let url = spawn_mock(
        Router::new().route("/api/generate", post(generate_ok)),
        MockState::default(),
    )
    .await;
    let scratch = tempfile::tempdir().unwrap();
    let cfg = AnalysisConfig::builder()
        .backend(ModelBackend::Ollama {
            host: url.clone(),
            model: "llama3.1:8b".into(),
        })
        .scratch_dir(scratch.path())
        .build()
        .unwrap();
    let client = Arc::new(OllamaClient::new(&url, "llama3.1:8b", &cfg).unwrap());
    let analyzer = Analyzer::with_parts(cfg, client, Arc::new(Verbatim));

    let output = assert_ok!(
        analyzer
            .analyze(vec![Upload::new("thyroid.pdf", b"TSH 2.1 mIU/L".to_vec())])
            .await
    );
    assert_eq!(output.result.summary, "Thyroid values in range");
    assert_eq!(output.result.key_findings, vec!["TSH 2.1"]);
    assert!(output.result.possible_red_flags.is_empty());
    assert_eq!(output.processed_files, vec!["thyroid.pdf"]);
}

#[tokio::test]
async fn analyzer_over_http_times_out_and_cleans_up() {
    let url = spawn_mock(
        Router::new().route("/api/generate", post(generate_slow)),
        MockState::default(),
    )
    .await;
    let scratch = tempfile::tempdir().unwrap();
    let cfg = AnalysisConfig::builder()
        .backend(ModelBackend::Ollama {
            host: url,
            model: "m".into(),
        })
        .model_timeout_secs(1)
        .probe_timeout_secs(1)
        .scratch_dir(scratch.path())
        .build()
        .unwrap();
    let analyzer = assert_ok!(Analyzer::new(cfg));

    // Keep the client wired from config; swap in a verbatim extractor.
    let err = assert_err!(
        Analyzer::with_parts(
            analyzer.config().clone(),
            Arc::clone(analyzer.model()),
            Arc::new(Verbatim),
        )
        .analyze(vec![Upload::new("r.pdf", b"some report text".to_vec())])
        .await
    );
    assert_eq!(err.kind(), ErrorKind::ModelTimeout);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}
