//! Streaming settlement: the hardest part of the pipeline. One
//! [`StreamSession`] per streaming request, owned by the request that
//! created it and dropped at finalize. Exactly one terminal call
//! (`finalize_success` or `finalize_failure`) is made per session.

use crate::circuit_breaker::CircuitBreaker;
use crate::estimator::TokenEstimator;
use crate::provider::{ChatMessage, ChunkKind};
use crate::quota::{QuotaLedger, QuotaStore};

/// One normalized chunk: the original frame forwarded to the client
/// verbatim, plus whatever assistant text it carried (possibly none).
pub struct NormalizedChunk {
    pub raw_frame_to_forward: Vec<u8>,
    pub extracted_text: String,
}

/// Normalizes the three upstream chunk encodings into one shape. A
/// `data: [DONE]` SSE line carries no content; non-SSE strings carry none
/// either.
pub fn normalize_chunk(chunk: ChunkKind) -> NormalizedChunk {
    match chunk {
        ChunkKind::Json(value) => {
            let text = extract_delta_content(&value).unwrap_or_default();
            let raw = serde_json::to_vec(&value).unwrap_or_default();
            NormalizedChunk { raw_frame_to_forward: raw, extracted_text: text }
        }
        ChunkKind::Bytes(bytes) => NormalizedChunk { raw_frame_to_forward: bytes, extracted_text: String::new() },
        ChunkKind::SseLine(line) => {
            let text = parse_sse_content(&line).unwrap_or_default();
            NormalizedChunk { raw_frame_to_forward: line.clone().into_bytes(), extracted_text: text }
        }
    }
}

fn parse_sse_content(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data: ")?.trim();
    if payload == "[DONE]" {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    extract_delta_content(&value)
}

fn extract_delta_content(value: &serde_json::Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

pub struct StreamOutcome {
    pub status_code: u16,
    pub tokens_input: Option<u32>,
    pub tokens_output: Option<u32>,
    pub cost_usd: f64,
    pub accrued: bool,
}

/// Live object for one streaming response.
pub struct StreamSession {
    request_id: String,
    client_hash: String,
    provider_name: String,
    model: String,
    prompt_messages: Vec<ChatMessage>,
    accumulated_output: String,
    breaker: CircuitBreaker,
    terminated: bool,
}

impl StreamSession {
    pub fn open(
        request_id: String,
        client_hash: String,
        provider_name: String,
        model: String,
        prompt_messages: Vec<ChatMessage>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            request_id,
            client_hash,
            provider_name,
            model,
            prompt_messages,
            accumulated_output: String::new(),
            breaker,
            terminated: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Appends extracted text to the accumulated output; forwarding the raw
    /// frame to the client is the caller's job, not this session's.
    pub fn push_chunk(&mut self, chunk: &NormalizedChunk) {
        self.accumulated_output.push_str(&chunk.extracted_text);
    }

    /// Clean stream termination. Computes cost, runs the authoritative
    /// quota check, accrues only when allowed, records breaker success
    /// unconditionally (breaker reflects the stream having completed, not
    /// the quota outcome), and returns the settled outcome for the audit
    /// row.
    pub async fn finalize_success<S: QuotaStore>(
        mut self,
        estimator: &TokenEstimator,
        ledger: &QuotaLedger<S>,
        date: chrono::NaiveDate,
    ) -> Result<StreamOutcome, S::Error> {
        self.terminated = true;
        let prompt_tokens = estimator.count_messages(&self.model, &self.prompt_messages);
        let completion_tokens = estimator.count_text(&self.accumulated_output);
        let cost = estimator.estimate_cost_usd(&self.model, Some(prompt_tokens), Some(completion_tokens));

        let decision = ledger.check(&self.client_hash, date, cost).await?;
        self.breaker.record_success();

        let (status_code, accrued) = if decision.allowed {
            if cost > 0.0 {
                ledger.accrue(&self.client_hash, date, cost).await?;
            }
            (200, cost > 0.0)
        } else {
            // The client has already received the bytes; this is accepted,
            // documented leakage, not a bug.
            (429, false)
        };

        Ok(StreamOutcome {
            status_code,
            tokens_input: Some(prompt_tokens),
            tokens_output: Some(completion_tokens),
            cost_usd: if accrued { cost } else { 0.0 },
            accrued,
        })
    }

    /// Mid-stream failure: accrues any computed partial cost unconditionally
    /// (a deliberate, documented asymmetry with the success path — see
    /// DESIGN.md) and records breaker failure.
    pub async fn finalize_failure<S: QuotaStore>(
        mut self,
        estimator: &TokenEstimator,
        ledger: &QuotaLedger<S>,
        date: chrono::NaiveDate,
    ) -> Result<StreamOutcome, S::Error> {
        self.terminated = true;
        let prompt_tokens = estimator.count_messages(&self.model, &self.prompt_messages);
        let completion_tokens = estimator.count_text(&self.accumulated_output);
        let cost = estimator.estimate_cost_usd(&self.model, Some(prompt_tokens), Some(completion_tokens));

        self.breaker.record_failure();
        if cost > 0.0 {
            ledger.accrue(&self.client_hash, date, cost).await?;
        }

        Ok(StreamOutcome {
            status_code: 502,
            tokens_input: Some(prompt_tokens),
            tokens_output: Some(completion_tokens),
            cost_usd: cost,
            accrued: cost > 0.0,
        })
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn client_hash(&self) -> &str {
        &self.client_hash
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if !self.terminated {
            tracing::error!(
                request_id = %self.request_id,
                "stream session dropped without a terminal finalize call"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_done_line_carries_no_content() {
        let chunk = normalize_chunk(ChunkKind::SseLine("data: [DONE]".to_string()));
        assert_eq!(chunk.extracted_text, "");
    }

    #[test]
    fn sse_content_line_extracts_delta_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#.to_string();
        let chunk = normalize_chunk(ChunkKind::SseLine(line));
        assert_eq!(chunk.extracted_text, "hi");
    }

    #[test]
    fn non_sse_string_carries_no_content() {
        let chunk = normalize_chunk(ChunkKind::SseLine("not an sse line".to_string()));
        assert_eq!(chunk.extracted_text, "");
    }

    #[test]
    fn every_chunk_is_forwarded_verbatim() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n".to_string();
        let chunk = normalize_chunk(ChunkKind::SseLine(line.clone()));
        assert_eq!(chunk.raw_frame_to_forward, line.into_bytes());
    }
}
