//! Generation client abstraction and the Ollama-compatible implementation.
//!
//! A [`Generator`] issues exactly one prompt-completion exchange with a
//! client-side deadline and classifies whatever goes wrong. It never
//! retries; wrap calls in [`crate::retry::with_retry`] for that.
//!
//! # Wire format
//!
//! Request (`POST {llm.endpoint}`):
//!
//! ```json
//! { "model": "llama3.1:8b", "prompt": "...", "stream": false, "max_tokens": 2000 }
//! ```
//!
//! Response:
//!
//! ```json
//! { "response": "generated text" }
//! ```
//!
//! # Error classification
//!
//! | Condition | Error |
//! |-----------|-------|
//! | Deadline passed before the body was read | [`AnalysisError::Timeout`] |
//! | Connection failure | [`AnalysisError::Transport`] without status |
//! | Non-2xx status | [`AnalysisError::Transport`] with status and body excerpt |
//! | Body is not JSON or lacks `response` | [`AnalysisError::Transport`] |

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{AnalysisError, Result};

/// One prompt-completion request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub timeout: Duration,
    pub max_output: usize,
}

/// Trait for text-generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier sent with each request.
    fn model_name(&self) -> &str;

    /// Perform a single generation exchange. No retry.
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Generator backed by an Ollama-style `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AnalysisError::System(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }

    async fn exchange(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateBody {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            max_tokens: request.max_output,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AnalysisError::transport(format!(
                    "LLM connection error (is the model server running at {}?): {}",
                    self.endpoint, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Transport {
                status: Some(status.as_u16()),
                message: format!("LLM API error {}: {}", status, excerpt(&body_text)),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::transport(format!("failed to read LLM response: {}", e)))?;
        parse_response(&bytes)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        tracing::debug!(
            model = %self.model,
            prompt_chars = request.prompt.len(),
            max_output = request.max_output,
            "sending generation request"
        );

        // Dropping the in-flight future on expiry aborts the request.
        match tokio::time::timeout(request.timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout {
                after: request.timeout,
            }),
        }
    }
}

fn parse_response(bytes: &[u8]) -> Result<String> {
    let parsed: GenerateResponse = serde_json::from_slice(bytes).map_err(|e| {
        AnalysisError::transport(format!("Invalid LLM response: missing response text: {}", e))
    })?;
    Ok(parsed.response)
}

fn excerpt(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_field() {
        let out = parse_response(br#"{"model":"m","response":"looks fine","done":true}"#).unwrap();
        assert_eq!(out, "looks fine");
    }

    #[test]
    fn missing_response_is_transport_error() {
        let err = parse_response(br#"{"error":"model not found"}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::Transport { status: None, .. }));
    }

    #[test]
    fn non_json_is_transport_error() {
        assert!(parse_response(b"<html>502</html>").is_err());
    }

    #[test]
    fn excerpt_truncates_long_bodies() {
        let long = "e".repeat(500);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 203);
        assert_eq!(excerpt("short"), "short");
    }
}
