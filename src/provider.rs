//! Abstract capability for buffered and streaming completions.
//!
//! The source chooses providers at startup via a factory sharing a loose
//! structural protocol; here that's re-architected as an explicit capability
//! variant, so the factory returns one concrete shape instead of a duck-typed
//! object the pipeline has to probe at call time.

use crate::error::ProviderError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_n")]
    pub n: u32,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub user: Option<String>,
}

fn default_temperature() -> f64 {
    1.0
}
fn default_top_p() -> f64 {
    1.0
}
fn default_n() -> u32 {
    1
}

/// A provider-reported usage block, when the upstream supplies one; the
/// estimator falls back to its own BPE count when this is absent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub body: serde_json::Value,
    pub assistant_text: String,
    pub usage: Usage,
}

/// One raw chunk as received from the upstream transport, before
/// normalization. Re-architected from three loosely-typed encodings (dict /
/// bytes / SSE string) into one explicit variant.
#[derive(Debug, Clone)]
pub enum ChunkKind {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    SseLine(String),
}

/// Declares which call shape a concrete provider implements. The factory
/// returns exactly one variant per provider instance; the pipeline matches
/// on it rather than probing capability at call time.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Default streaming implementation: providers that only support
    /// buffered completions can be driven as a single-chunk stream. Real
    /// streaming providers override this. Yields the delta as a bare JSON
    /// value; SSE framing is applied once, by the caller driving the
    /// stream, not here.
    async fn stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<ChunkKind, ProviderError>>, ProviderError> {
        let response = self.complete(request).await?;
        let delta = serde_json::json!({
            "choices": [{"delta": {"content": response.assistant_text}}]
        });
        Ok(Box::pin(futures::stream::iter(vec![Ok(ChunkKind::Json(delta))])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_defaults_match_external_contract() {
        let json = serde_json::json!({
            "model": "gpt-test",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let req: ChatRequest = serde_json::from_value(json).unwrap();
        assert!(!req.stream);
        assert_eq!(req.temperature, 1.0);
        assert_eq!(req.top_p, 1.0);
        assert_eq!(req.n, 1);
        assert!(req.max_tokens.is_none());
    }
}
