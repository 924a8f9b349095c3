//! Deterministic primary provider for local development and tests; echoes
//! the last user message back with a canned prefix instead of calling out
//! to a real model.

use async_trait::async_trait;
use circuit::error::ProviderError;
use circuit::provider::{ChatRequest, ChatResponse, Provider, Usage};

pub struct MockChatProvider {
    name: &'static str,
}

impl MockChatProvider {
    pub fn new() -> Self {
        Self { name: "mock-openai" }
    }
}

impl Default for MockChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockChatProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let assistant_text = format!("mock reply to: {}", last_user);
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

#[cfg(test)]
mod tests {
    use super::*;
    use circuit::provider::ChatMessage;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let provider = MockChatProvider::new();
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: "ping".to_string() }],
            stream: false,
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            max_tokens: None,
            stop: None,
            user: None,
        };
        let response = provider.complete(&request).await.unwrap();
        assert!(response.assistant_text.contains("ping"));
    }
}
