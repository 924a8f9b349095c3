//! Real upstream provider over the public chat-completions wire format.
//! Two configured timeouts: a connect timeout and a total per-call
//! deadline (0.5s / 1.5s), matching the reference values.

use async_trait::async_trait;
use circuit::error::ProviderError;
use circuit::provider::{ChatRequest, ChatResponse, Provider, Usage};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const TOTAL_TIMEOUT: Duration = Duration::from_millis(1_500);

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url: base_url.into(), api_key: api_key.into() })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if let Some(code) = body.get("error").and_then(|e| e.get("code")).and_then(|c| c.as_str()) {
            return Err(classify_soft_error(code));
        }
        if status.is_server_error() {
            return Err(ProviderError::ServerError);
        }

        let assistant_text = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let usage = Usage {
            prompt_tokens: body.get("usage").and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).map(|v| v as u32),
            completion_tokens: body.get("usage").and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64()).map(|v| v as u32),
        };

        Ok(ChatResponse { body, assistant_text, usage })
    }
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

fn classify_soft_error(code: &str) -> ProviderError {
    match code {
        "timeout" => ProviderError::Timeout,
        "server_error" => ProviderError::ServerError,
        "rate_limit" => ProviderError::RateLimit,
        other => ProviderError::NonRetryable(other.to_string()),
    }
}
