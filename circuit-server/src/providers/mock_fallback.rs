//! Secondary provider used when the primary is down. Always succeeds, so
//! fallback tests and demos can rely on it deterministically.

use async_trait::async_trait;
use circuit::error::ProviderError;
use circuit::provider::{ChatRequest, ChatResponse, Provider, Usage};

pub struct MockFallbackProvider;

#[async_trait]
impl Provider for MockFallbackProvider {
    fn name(&self) -> &str {
        "mock-fallback"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let assistant_text = "fallback provider response".to_string();
        let body = serde_json::json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "object": "chat.completion",
            "model": request.model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": assistant_text},
                "finish_reason": "stop",
            }],
        });
        Ok(ChatResponse { body, assistant_text, usage: Usage::default() })
    }
}
