//! Model clients: send one prompt, get free text back.
//!
//! [`ModelClient`] is the seam between the orchestrator and whatever
//! answers the prompt. Two implementations ship:
//!
//! * [`OllamaClient`]: talks to Ollama's `/api/generate` and `/api/tags`
//!   directly over `reqwest`. This is the default backend.
//! * [`ProviderClient`]: wraps any `edgequake-llm` provider (OpenAI,
//!   Anthropic, Gemini, …).
//!
//! Neither retries: one attempt, bounded by the configured timeout. Neither
//! inspects the text it returns; structure is the coercer's problem.

use crate::config::{AnalysisConfig, ModelBackend};
use crate::error::{AnalysisError, ModelError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identity and reachability of the configured endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    /// Endpoint URL or provider name.
    pub endpoint: String,
    pub model: String,
    /// Whatever the endpoint reported about itself (Ollama: the `/api/tags` body).
    pub details: Value,
}

/// Sends a prompt to an external text-generation service.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Endpoint identity used in logs and errors.
    fn endpoint(&self) -> String;

    /// Model identifier.
    fn model(&self) -> String;

    /// One attempt, bounded by the client's analysis timeout.
    async fn invoke(&self, prompt: &str) -> Result<String, ModelError>;

    /// Lightweight reachability check with its own short timeout.
    async fn probe(&self) -> Result<EndpointHealth, ModelError>;
}

/// Build the client named by `config.backend`.
pub fn client_from_config(config: &AnalysisConfig) -> Result<Arc<dyn ModelClient>, AnalysisError> {
    match &config.backend {
        ModelBackend::Ollama { host, model } => Ok(Arc::new(OllamaClient::new(
            host,
            model,
            config,
        )?)),
        ModelBackend::Hosted { provider, model } => {
            let inner = ProviderFactory::create_llm_provider(provider, model).map_err(|e| {
                AnalysisError::ProviderNotConfigured {
                    provider: provider.clone(),
                    hint: format!("{e}"),
                }
            })?;
            Ok(Arc::new(ProviderClient::new(
                inner,
                provider.clone(),
                model.clone(),
                config,
            )))
        }
    }
}

// ── Ollama ───────────────────────────────────────────────────────────────

/// Request body for Ollama `/api/generate`.
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
}

/// Response body from Ollama `/api/generate`.
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

/// HTTP client for an Ollama server.
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: reqwest::Client,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
    probe_timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str, config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AnalysisError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.model_timeout_secs,
            probe_timeout_secs: config.probe_timeout_secs,
        })
    }

    fn map_send_error(&self, e: reqwest::Error, timeout_secs: u64) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout { secs: timeout_secs }
        } else if e.is_connect() || e.is_request() {
            ModelError::Unreachable(e.to_string())
        } else {
            ModelError::BadResponse(e.to_string())
        }
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let start = Instant::now();
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Ollama returned HTTP {}: {}", status, text);
            return Err(ModelError::BadResponse(format!("HTTP {status}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| self.map_send_error(e, self.timeout_secs))?;
        let raw = parsed.response.unwrap_or_default();

        debug!(
            "Ollama answered in {:?}: {} chars",
            start.elapsed(),
            raw.len()
        );
        Ok(raw)
    }

    async fn probe(&self) -> Result<EndpointHealth, ModelError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(self.probe_timeout_secs))
            .send()
            .await
            .map_err(|e| self.map_send_error(e, self.probe_timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::BadResponse(format!("HTTP {status}")));
        }

        let details: Value = response
            .json()
            .await
            .map_err(|e| self.map_send_error(e, self.probe_timeout_secs))?;

        Ok(EndpointHealth {
            endpoint: self.base_url.clone(),
            model: self.model.clone(),
            details,
        })
    }
}

// ── Hosted providers ─────────────────────────────────────────────────────

/// Adapter over an `edgequake-llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    name: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
}

impl ProviderClient {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        name: String,
        model: String,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            provider,
            name,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.model_timeout_secs,
        }
    }
}

#[async_trait]
impl ModelClient for ProviderClient {
    fn endpoint(&self) -> String {
        self.name.clone()
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
        let messages = vec![ChatMessage::user(prompt)];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let call = self.provider.chat(&messages, Some(&options));
        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), call).await {
            Err(_) => Err(ModelError::Timeout {
                secs: self.timeout_secs,
            }),
            Ok(Err(e)) => Err(classify_provider_error(&e.to_string(), self.timeout_secs)),
            Ok(Ok(response)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    self.name, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
        }
    }

    /// Hosted providers have no free listing endpoint; report identity only.
    async fn probe(&self) -> Result<EndpointHealth, ModelError> {
        info!("Probe for hosted provider '{}' is identity-only", self.name);
        Ok(EndpointHealth {
            endpoint: self.name.clone(),
            model: self.model.clone(),
            details: serde_json::json!({ "provider": self.name, "network_checked": false }),
        })
    }
}

/// Best-effort mapping of a provider error message onto [`ModelError`].
fn classify_provider_error(msg: &str, timeout_secs: u64) -> ModelError {
    let lower = msg.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        ModelError::Timeout { secs: timeout_secs }
    } else if lower.contains("connect") || lower.contains("dns") || lower.contains("network") {
        ModelError::Unreachable(msg.to_string())
    } else {
        ModelError::BadResponse(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_wire_format() {
        let body = GenerateRequest {
            model: "llama3.1:8b",
            prompt: "hi",
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                num_predict: 2000,
            },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "llama3.1:8b");
        assert_eq!(v["stream"], false);
        assert_eq!(v["options"]["num_predict"], 2000);
    }

    #[test]
    fn generate_response_tolerates_missing_field() {
        let r: GenerateResponse = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(r.response.is_none());
    }

    #[test]
    fn provider_errors_are_classified() {
        assert!(matches!(
            classify_provider_error("request timed out", 120),
            ModelError::Timeout { .. }
        ));
        assert!(matches!(
            classify_provider_error("error trying to connect: refused", 120),
            ModelError::Unreachable(_)
        ));
        assert!(matches!(
            classify_provider_error("401 invalid api key", 120),
            ModelError::BadResponse(_)
        ));
    }

    #[test]
    fn ollama_client_trims_host() {
        let config = AnalysisConfig::default();
        let c = OllamaClient::new("http://localhost:11434/", "m", &config).unwrap();
        assert_eq!(c.endpoint(), "http://localhost:11434");
        assert_eq!(c.model(), "m");
    }
}
