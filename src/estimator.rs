//! Model-aware token counting and cost estimation.
//!
//! Token counting uses a byte-pair-encoding table keyed by model name, with
//! a documented default for unknown models. Per-message overhead constants
//! are parameterized per model family rather than hardcoded globally — the
//! `cl100k_base` family's `{per_message: 4, priming: 2}` is the default for
//! unrecognized models.

use crate::provider::ChatMessage;
use std::collections::HashMap;
use tiktoken_rs::CoreBPE;

#[derive(Debug, Clone, Copy)]
pub struct TokenOverhead {
    pub per_message: u32,
    pub priming: u32,
}

impl Default for TokenOverhead {
    fn default() -> Self {
        Self { per_message: 4, priming: 2 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    /// USD per 1000 input tokens.
    pub input_price: f64,
    /// USD per 1000 output tokens.
    pub output_price: f64,
}

pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
    overhead: HashMap<String, TokenOverhead>,
}

impl PriceTable {
    pub fn new() -> Self {
        let mut prices = HashMap::new();
        prices.insert("gpt-4o".to_string(), ModelPrice { input_price: 2.50, output_price: 10.00 });
        prices.insert("gpt-4o-mini".to_string(), ModelPrice { input_price: 0.15, output_price: 0.60 });
        prices.insert("gpt-3.5-turbo".to_string(), ModelPrice { input_price: 0.50, output_price: 1.50 });
        Self { prices, overhead: HashMap::new() }
    }

    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    pub fn with_overhead(mut self, model: impl Into<String>, overhead: TokenOverhead) -> Self {
        self.overhead.insert(model.into(), overhead);
        self
    }

    pub fn price_for(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }

    pub fn overhead_for(&self, model: &str) -> TokenOverhead {
        self.overhead.get(model).copied().unwrap_or_default()
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Loaded once at startup; BPE tables are expensive to construct.
pub struct TokenEstimator {
    bpe: CoreBPE,
    prices: PriceTable,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to load token encoder: {0}")]
pub struct EstimatorError(String);

impl TokenEstimator {
    pub fn new(prices: PriceTable) -> Result<Self, EstimatorError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| EstimatorError(e.to_string()))?;
        Ok(Self { bpe, prices })
    }

    pub fn count_text(&self, text: &str) -> u32 {
        self.bpe.encode_ordinary(text).len() as u32
    }

    /// `Σ_m (per_message_overhead + Σ_field tokens(field_value)) + priming_overhead`.
    pub fn count_messages(&self, model: &str, messages: &[ChatMessage]) -> u32 {
        let overhead = self.prices.overhead_for(model);
        let mut total = 0u32;
        for message in messages {
            total += overhead.per_message;
            total += self.count_text(&message.role);
            total += self.count_text(&message.content);
        }
        total + overhead.priming
    }

    /// Unknown model or missing counts both yield 0 cost; this is not an
    /// error condition.
    pub fn estimate_cost_usd(
        &self,
        model: &str,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    ) -> f64 {
        let (Some(prompt), Some(completion)) = (prompt_tokens, completion_tokens) else {
            return 0.0;
        };
        let Some(price) = self.prices.price_for(model) else {
            return 0.0;
        };
        let raw = (prompt as f64 / 1000.0) * price.input_price
            + (completion as f64 / 1000.0) * price.output_price;
        (raw * 1e6).round() / 1e6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn estimator() -> TokenEstimator {
        TokenEstimator::new(PriceTable::new()).unwrap()
    }

    #[test]
    fn empty_text_counts_zero_tokens() {
        assert_eq!(estimator().count_text(""), 0);
    }

    #[test]
    fn bpe_counting_is_not_additive() {
        let est = estimator();
        let a = est.count_text("hello ");
        let b = est.count_text("world");
        let combined = est.count_text("hello world");
        assert_ne!(a + b, combined);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let est = estimator();
        assert_eq!(est.estimate_cost_usd("not-a-real-model", Some(100), Some(50)), 0.0);
    }

    #[test]
    fn missing_token_count_costs_zero() {
        let est = estimator();
        assert_eq!(est.estimate_cost_usd("gpt-4o", None, Some(50)), 0.0);
        assert_eq!(est.estimate_cost_usd("gpt-4o", Some(100), None), 0.0);
    }

    #[test]
    fn known_model_cost_matches_formula() {
        let est = estimator();
        let cost = est.estimate_cost_usd("gpt-3.5-turbo", Some(1000), Some(1000));
        assert_eq!(cost, 0.50 + 1.50);
    }

    #[test]
    fn message_overhead_counts_role_and_content() {
        let est = estimator();
        let messages =
            vec![ChatMessage { role: "user".to_string(), content: "hi".to_string() }];
        let count = est.count_messages("gpt-4o", &messages);
        assert!(count > 4 + 2);
    }
}
