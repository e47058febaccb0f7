//! HTTP surface: `GET /api/health` and `POST /api/analyze`.
//!
//! A thin axum layer over [`Analyzer`]. Uploads arrive as multipart field
//! `files`; the handler enforces the count and per-file size limits while
//! streaming, so an oversized request is refused before it is buffered in
//! full. Every response body is an [`Envelope`] (or the health payload).
//!
//! | Outcome                   | Status |
//! |---------------------------|--------|
//! | success                   | 200    |
//! | validation                | 400    |
//! | extraction total failure  | 422    |
//! | model unreachable / bad   | 502    |
//! | model timeout             | 504    |
//! | internal                  | 500    |

use crate::analyze::Analyzer;
use crate::config::MAX_FILES;
use crate::error::{AnalysisError, ErrorKind};
use crate::output::Envelope;
use crate::pipeline::intake::Upload;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Multipart field carrying the uploaded files.
pub const FILES_FIELD: &str = "files";

/// Multipart framing allowance on top of the file payload limit.
const BODY_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::ExtractionTotalFailure => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ModelUnreachable | ErrorKind::ModelBadResponse => StatusCode::BAD_GATEWAY,
        ErrorKind::ModelTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the router. The body limit allows a full batch of maximum-size files.
pub fn router(analyzer: Arc<Analyzer>) -> Router {
    let body_limit = (MAX_FILES as u64)
        .saturating_mul(analyzer.config().max_file_bytes)
        .saturating_add(BODY_OVERHEAD_BYTES);
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/analyze", post(handle_analyze))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
        .with_state(analyzer)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(analyzer: Arc<Analyzer>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Server listening");
    axum::serve(listener, router(analyzer))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn handle_health(State(analyzer): State<Arc<Analyzer>>) -> Response {
    match analyzer.health().await {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "model": health.model, "tags": health.details })),
        )
            .into_response(),
        Err(e) => {
            warn!("Health probe failed: {}", e);
            let mut body = json!({ "ok": false, "error": e.user_message() });
            if analyzer.config().expose_error_details {
                body["details"] = json!(format!("{e:?}"));
            }
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn handle_analyze(
    State(analyzer): State<Arc<Analyzer>>,
    mut multipart: Multipart,
) -> Response {
    let expose = analyzer.config().expose_error_details;

    let uploads = match read_files(&mut multipart, analyzer.config().max_file_bytes).await {
        Ok(uploads) => uploads,
        Err(e) => {
            warn!("Rejected upload: {}", e);
            return failure(&e, expose);
        }
    };

    match analyzer.analyze(uploads).await {
        Ok(output) => (StatusCode::OK, Json(Envelope::success(output))).into_response(),
        Err(e) => {
            error!("Error processing files: {}", e);
            failure(&e, expose)
        }
    }
}

fn failure(err: &AnalysisError, expose_details: bool) -> Response {
    (
        status_for(err.kind()),
        Json(Envelope::failure(err, expose_details)),
    )
        .into_response()
}

/// Collect the `files` fields, stopping at the first limit breach.
async fn read_files(
    multipart: &mut Multipart,
    max_file_bytes: u64,
) -> Result<Vec<Upload>, AnalysisError> {
    let mut uploads = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AnalysisError::MalformedRequest(e.body_text()))?
    {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        if uploads.len() == MAX_FILES {
            return Err(AnalysisError::TooManyFiles {
                count: MAX_FILES + 1,
                max: MAX_FILES,
            });
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let media_type = field.content_type().map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AnalysisError::MalformedRequest(e.body_text()))?
        {
            let size = (bytes.len() + chunk.len()) as u64;
            if size > max_file_bytes {
                return Err(AnalysisError::FileTooLarge {
                    name,
                    size,
                    max_mb: max_file_bytes.div_ceil(1024 * 1024),
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        let mut upload = Upload::new(name, bytes);
        if let Some(mt) = media_type {
            upload = upload.with_media_type(mt);
        }
        uploads.push(upload);
    }

    Ok(uploads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::error::{ExtractionError, ModelError};
    use crate::pipeline::extract::TextExtractor;
    use crate::pipeline::intake::StagedFile;
    use crate::pipeline::llm::{EndpointHealth, ModelClient};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "medreport-test-boundary";

    struct FixedModel(Result<String, ModelError>);

    #[async_trait]
    impl ModelClient for FixedModel {
        fn endpoint(&self) -> String {
            "mock://model".into()
        }
        fn model(&self) -> String {
            "llama3.1:8b".into()
        }
        async fn invoke(&self, _prompt: &str) -> Result<String, ModelError> {
            self.0.clone()
        }
        async fn probe(&self) -> Result<EndpointHealth, ModelError> {
            match &self.0 {
                Err(e) => Err(e.clone()),
                Ok(_) => Ok(EndpointHealth {
                    endpoint: self.endpoint(),
                    model: self.model(),
                    details: json!({ "models": [{ "name": "llama3.1:8b" }] }),
                }),
            }
        }
    }

    struct BytesAsText;

    #[async_trait]
    impl TextExtractor for BytesAsText {
        async fn extract(&self, file: &StagedFile) -> Result<String, ExtractionError> {
            let bytes = std::fs::read(&file.path).map_err(|e| ExtractionError::Io(e.to_string()))?;
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            if text.is_empty() {
                return Err(ExtractionError::EmptyDocument { chars: 0 });
            }
            Ok(text)
        }
    }

    fn app(dir: &std::path::Path, reply: Result<String, ModelError>) -> Router {
        let config = AnalysisConfig::builder()
            .scratch_dir(dir)
            .max_file_bytes(1024)
            .build()
            .unwrap();
        router(Arc::new(Analyzer::with_parts(
            config,
            Arc::new(FixedModel(reply)),
            Arc::new(BytesAsText),
        )))
    }

    fn multipart_request(files: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::ExtractionTotalFailure),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(ErrorKind::ModelUnreachable), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::ModelBadResponse), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::ModelTimeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(ErrorKind::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn analyze_success_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let reply = r#"Sure! {"summary":"Normal CBC","key_findings":["Hb 14"],"possible_red_flags":[],"recommended_followups":[],"questions_for_doctor":[],"disclaimer":"d"}"#;
        let response = app(dir.path(), Ok(reply.into()))
            .oneshot(multipart_request(&[("cbc.pdf", &b"Hemoglobin 14 g/dL"[..])]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let v = json_body(response).await;
        assert_eq!(v["ok"], true);
        assert_eq!(v["format"], "json");
        assert_eq!(v["data"]["summary"], "Normal CBC");
        assert_eq!(v["processed_files"], json!(["cbc.pdf"]));
    }

    #[tokio::test]
    async fn unsupported_type_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), Ok("{}".into()))
            .oneshot(multipart_request(&[("notes.docx", &b"text"[..])]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let v = json_body(response).await;
        assert_eq!(v["ok"], false);
        assert!(v["error"].as_str().unwrap().contains("notes.docx"));
        assert!(v.get("details").is_none());
    }

    #[tokio::test]
    async fn eleven_files_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..11).map(|i| format!("r{i}.pdf")).collect();
        let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();
        let response = app(dir.path(), Ok("{}".into()))
            .oneshot(multipart_request(&files))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn oversized_file_is_refused_while_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let big = vec![b'a'; 2048];
        let response = app(dir.path(), Ok("{}".into()))
            .oneshot(multipart_request(&[("big.png", big.as_slice())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let v = json_body(response).await;
        assert!(v["error"].as_str().unwrap().contains("big.png"));
    }

    #[tokio::test]
    async fn no_files_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), Ok("{}".into()))
            .oneshot(multipart_request(&[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let v = json_body(response).await;
        assert_eq!(v["error"], "No files uploaded");
    }

    #[tokio::test]
    async fn extraction_total_failure_is_422() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), Ok("{}".into()))
            .oneshot(multipart_request(&[("blank.pdf", &b"   "[..])]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn model_timeout_is_504() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), Err(ModelError::Timeout { secs: 120 }))
            .oneshot(multipart_request(&[("r.pdf", &b"text"[..])]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn health_ok_carries_model_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), Ok(String::new()))
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v = json_body(response).await;
        assert_eq!(v["ok"], true);
        assert_eq!(v["model"], "llama3.1:8b");
        assert_eq!(v["tags"]["models"][0]["name"], "llama3.1:8b");
    }

    #[tokio::test]
    async fn health_unreachable_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), Err(ModelError::Unreachable("refused".into())))
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let v = json_body(response).await;
        assert_eq!(v["ok"], false);
        assert!(v["error"].as_str().unwrap().contains("not reachable"));
    }
}
