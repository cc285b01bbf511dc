//! Text-completion service abstraction and the OpenRouter-backed client.
//!
//! The pipeline treats the hosted LLM as an opaque, untrusted oracle: one
//! bounded request in, plain text out, possibly malformed. [`CompletionService`]
//! is the seam that keeps the extraction and summary stages testable against
//! scripted responses.

use crate::error::ExtractionError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "meta-llama/llama-3.1-8b-instruct";

/// Both external calls in one pipeline invocation suspend only here.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One bounded completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Async trait implemented by completion backends (and test doubles).
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ExtractionError>;
}

/// OpenRouter client for chat completions.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    /// Create a new client, reading the API key from OPENROUTER_API_KEY.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY environment variable not set"))?;
        let model = env::var("OPENROUTER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_key,
            model,
        })
    }

}

#[async_trait]
impl CompletionService for OpenRouterClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ExtractionError> {
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(request.system),
                Message::user(request.prompt),
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!("Sending completion request: model={}", body.model);

        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::Timeout
                } else {
                    ExtractionError::Service(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Service(format!(
                "completion API error ({}): {}",
                status, error_text
            )));
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Service(format!("unreadable response body: {}", e)))?;

        if let Some(usage) = &response.usage {
            info!(
                "Completion response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: Role,
    content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted completion backend: pops one queued response per call.
    /// An exhausted queue reports a service failure.
    pub(crate) struct ScriptedService {
        responses: Mutex<Vec<Result<String, ExtractionError>>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedService {
        pub(crate) fn new(responses: Vec<Result<String, ExtractionError>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn replying(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }

        pub(crate) fn failing() -> Self {
            Self::new(vec![])
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedService {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ExtractionError::Service("no scripted response".into())))
        }
    }
}
