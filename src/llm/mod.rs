//! Completion service abstraction.
//!
//! Both LLM-based leaf scoring and parent reason synthesis route
//! through the single `complete` operation, keeping the engine
//! agnostic to the underlying model and provider.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::utilities::errors::CompletionError;

/// Default model for the OpenAI-compatible client.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 120.0;

// ---------------------------------------------------------------------------
// CompletionClient trait
// ---------------------------------------------------------------------------

/// A service that turns a prompt into completion text.
///
/// Implementations should handle transient failures themselves; the
/// engine treats any returned error as a failed scorer call (or, for
/// reason synthesis, downgrades it to a templated fallback).
#[async_trait]
pub trait CompletionClient: Send + Sync + fmt::Debug {
    /// Issue one completion request (asynchronous).
    async fn acomplete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<String, CompletionError>;

    /// Issue one completion request, blocking the calling thread.
    ///
    /// Default implementation owns a runtime and drives `acomplete`.
    fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<String, CompletionError> {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| CompletionError::new(format!("failed to start runtime: {e}")))?;
        rt.block_on(self.acomplete(prompt, temperature, max_tokens))
    }

    /// Model identifier used for requests.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// OpenAiClient
// ---------------------------------------------------------------------------

/// Client for any OpenAI-compatible chat completions endpoint.
///
/// Model, API key, and base URL come from the constructor or from the
/// `OPENAI_API_KEY` / `OPENAI_BASE_URL` environment variables.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    /// Model identifier sent with every request.
    pub model: String,
    /// API key; requests fail without one.
    pub api_key: Option<String>,
    /// Base URL (e.g. `https://api.openai.com/v1`).
    pub base_url: Option<String>,
    /// Request timeout in seconds.
    pub timeout: f64,
    /// Maximum number of retries on 429/5xx responses.
    pub max_retries: u32,
}

impl OpenAiClient {
    /// Create a client for the given model, reading credentials from
    /// the environment where not supplied.
    pub fn new(
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.or_else(|| std::env::var("OPENAI_API_KEY").ok()),
            base_url: base_url.or_else(|| std::env::var("OPENAI_BASE_URL").ok()),
            timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: 2,
        }
    }

    /// Create a client with the default model.
    pub fn from_env() -> Self {
        Self::new(DEFAULT_MODEL, None, None)
    }

    /// Resolved API base URL.
    pub fn api_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }

    /// Build the chat completions request body for a single user prompt.
    fn build_request_body(&self, prompt: &str, temperature: f64, max_tokens: Option<u32>) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    /// Extract the first choice's message content from a response.
    fn parse_response(response: &Value) -> Result<String, CompletionError> {
        let content = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| CompletionError::new("no response choices received"))?;
        Ok(content.to_string())
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn acomplete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<String, CompletionError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            CompletionError::new(
                "API key not set; set OPENAI_API_KEY or pass api_key to the constructor",
            )
        })?;

        let body = self.build_request_body(prompt, temperature, max_tokens);
        let endpoint = format!("{}/chat/completions", self.api_base_url());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs_f64(self.timeout))
            .build()
            .map_err(|e| CompletionError::new(e.to_string()))?;

        let mut last_error: Option<CompletionError> = None;
        let mut retry_delay = std::time::Duration::from_secs(1);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!("completion retry attempt {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match client
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(CompletionError::new(e.to_string()));
                    continue;
                }
            };

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_error = Some(CompletionError::new("rate limited (429)"));
                continue;
            }
            if status.is_server_error() {
                last_error = Some(CompletionError::new(format!("server error: {status}")));
                continue;
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = Some(CompletionError::new(e.to_string()));
                    continue;
                }
            };

            if status.is_client_error() {
                return Err(CompletionError::new(format!("API error ({status}): {text}")));
            }

            let json: Value = serde_json::from_str(&text).map_err(|e| {
                CompletionError::new(format!(
                    "failed to parse response: {} - body: {}",
                    e,
                    &text[..text.len().min(500)]
                ))
            })?;

            return Self::parse_response(&json);
        }

        Err(last_error
            .unwrap_or_else(|| CompletionError::new("completion failed after all retries")))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// FixedCompletionClient
// ---------------------------------------------------------------------------

/// Completion client that always returns a canned response.
///
/// Deterministic scoring for tests and offline runs.
#[derive(Debug, Clone)]
pub struct FixedCompletionClient {
    /// The response returned for every request.
    pub response: String,
}

impl FixedCompletionClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for FixedCompletionClient {
    async fn acomplete(
        &self,
        _prompt: &str,
        _temperature: f64,
        _max_tokens: Option<u32>,
    ) -> Result<String, CompletionError> {
        Ok(self.response.clone())
    }

    fn complete(
        &self,
        _prompt: &str,
        _temperature: f64,
        _max_tokens: Option<u32>,
    ) -> Result<String, CompletionError> {
        Ok(self.response.clone())
    }

    fn model(&self) -> &str {
        "fixed"
    }
}
