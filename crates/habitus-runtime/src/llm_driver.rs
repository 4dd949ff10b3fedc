//! [`LlmDriver`] – OpenAI-compatible chat-completions client.
//!
//! The production [`AnalysisBackend`]: sends the reconciliation prompt to a
//! model server exposing `/v1/chat/completions` (OpenAI, Ollama on
//! `http://localhost:11434`, vLLM, ...) and forces a structured reply through
//! `response_format: json_schema`.
//!
//! # Example
//!
//! ```rust,no_run
//! use habitus_runtime::llm_driver::{ChatMessage, LlmDriver, Role};
//!
//! let driver = LlmDriver::new("http://localhost:11434", "llama3");
//! let messages = vec![
//!     ChatMessage { role: Role::System, content: "You analyze usage patterns.".into() },
//!     ChatMessage { role: Role::User, content: "{}".into() },
//! ];
//! // Requires a running model server.
//! // let reply = driver.complete(&messages, &serde_json::json!({})).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::analyzer::AnalysisBackend;

/// Name under which the response schema is registered with the server.
const SCHEMA_NAME: &str = "memory_modifications";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from talking to the model server.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response could not be interpreted.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// No reply within the allotted time.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    strict: bool,
    schema: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, LlmError> {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// Async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share; the inner `reqwest::Client` pools connections.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Create a driver for `base_url` (e.g. `"http://localhost:11434"`) and
    /// `model` (e.g. `"llama3"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|k: &String| !k.is_empty());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        schema: &'a serde_json::Value,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: SCHEMA_NAME,
                    strict: true,
                    schema,
                },
            },
        }
    }

    /// Send `messages` and return the assistant's reply text, constrained to
    /// `schema`.
    ///
    /// # Errors
    ///
    /// [`LlmError::Http`] if the request fails or the server answers with an
    /// error status, [`LlmError::BadResponse`] if the reply has no choices.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        let mut request = self
            .client
            .post(self.endpoint())
            .json(&self.request_body(messages, schema));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(model = %self.model, messages = messages.len(), "sending chat completion");
        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response.into_content()
    }
}

#[async_trait]
impl AnalysisBackend for LlmDriver {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        let messages = [
            ChatMessage {
                role: Role::System,
                content: system.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: user.to_string(),
            },
        ];
        LlmDriver::complete(self, &messages, schema).await
    }
}
