//! Best-effort monetary cost of a completed call.

use std::collections::HashMap;

use thiserror::Error;

use crate::types::TokenUsage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CostError {
    #[error("no pricing known for model: {0}")]
    UnknownModel(String),
    #[error("provider did not report token usage")]
    MissingUsage,
}

pub trait CostEstimator: Send + Sync {
    fn estimate(&self, model: &str, usage: Option<&TokenUsage>) -> Result<f64, CostError>;
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Price list keyed by model name prefix; the longest matching prefix wins, so
/// `gpt-4o-mini` is priced separately from `gpt-4o`.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
}

impl PricingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Approximate public list prices.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        // OpenAI
        table.set_price("gpt-4o", 2.5, 10.0);
        table.set_price("gpt-4o-mini", 0.15, 0.6);
        table.set_price("gpt-4-turbo", 10.0, 30.0);
        table.set_price("gpt-4", 30.0, 60.0);
        table.set_price("gpt-3.5-turbo", 0.5, 1.5);
        // Anthropic
        table.set_price("claude-3-opus", 15.0, 75.0);
        table.set_price("claude-3-5-sonnet", 3.0, 15.0);
        table.set_price("claude-3-sonnet", 3.0, 15.0);
        table.set_price("claude-3-5-haiku", 0.8, 4.0);
        table.set_price("claude-3-haiku", 0.25, 1.25);
        // Google
        table.set_price("gemini-1.5-pro", 1.25, 5.0);
        table.set_price("gemini-1.5-flash", 0.075, 0.3);
        // Cohere
        table.set_price("command-r-plus", 2.5, 10.0);
        table.set_price("command-r", 0.15, 0.6);
        table
    }

    pub fn set_price(&mut self, model_prefix: impl Into<String>, input: f64, output: f64) {
        self.prices.insert(
            model_prefix.into(),
            ModelPrice {
                input_per_million: input,
                output_per_million: output,
            },
        );
    }

    pub fn price_for(&self, model: &str) -> Option<ModelPrice> {
        // `openrouter/anthropic/claude-3-haiku` -> `claude-3-haiku`
        let bare = model.rsplit('/').next().unwrap_or(model);
        self.prices
            .iter()
            .filter(|(prefix, _)| bare.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, price)| *price)
    }
}

impl CostEstimator for PricingTable {
    fn estimate(&self, model: &str, usage: Option<&TokenUsage>) -> Result<f64, CostError> {
        let usage = usage.ok_or(CostError::MissingUsage)?;
        let price = self
            .price_for(model)
            .ok_or_else(|| CostError::UnknownModel(model.to_string()))?;

        let input = usage.prompt_tokens as f64 / 1_000_000.0 * price.input_per_million;
        let output = usage.completion_tokens as f64 / 1_000_000.0 * price.output_per_million;
        Ok(input + output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_and_provider_prefix_are_handled() {
        let table = PricingTable::with_defaults();
        assert_eq!(table.price_for("gpt-4o-mini-2024-07-18").unwrap().input_per_million, 0.15);
        assert_eq!(table.price_for("gpt-4o-2024-08-06").unwrap().input_per_million, 2.5);
        assert_eq!(
            table.price_for("openrouter/anthropic/claude-3-haiku").unwrap().output_per_million,
            1.25
        );
        assert!(table.price_for("llama3").is_none());
    }

    #[test]
    fn estimates_from_usage() {
        let mut table = PricingTable::empty();
        table.set_price("m", 1.0, 2.0);
        let cost = table.estimate("m", Some(&TokenUsage::new(1_000_000, 500_000))).unwrap();
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn reports_missing_usage_and_unknown_models() {
        let table = PricingTable::with_defaults();
        assert_eq!(table.estimate("gpt-4o", None), Err(CostError::MissingUsage));
        assert_eq!(
            table.estimate("mystery", Some(&TokenUsage::new(1, 1))),
            Err(CostError::UnknownModel("mystery".into()))
        );
    }
}
