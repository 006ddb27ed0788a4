use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::PromptConfig, result::TestResult};

/// Per-model aggregate over a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    /// Completed units that carry no match result.
    pub unevaluated: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub total_cost: f64,
    pub avg_latency_ms: Option<f64>,
}

impl ModelSummary {
    pub fn from_results<'a>(
        model: impl Into<String>,
        results: impl IntoIterator<Item = &'a TestResult>,
    ) -> Self {
        let mut summary = Self {
            model: model.into(),
            total: 0,
            passed: 0,
            failed: 0,
            errors: 0,
            unevaluated: 0,
            tokens_in: 0,
            tokens_out: 0,
            total_cost: 0.0,
            avg_latency_ms: None,
        };
        let mut latency_total = 0u64;
        let mut latency_count = 0u64;

        for result in results {
            if result.model != summary.model {
                continue;
            }
            summary.total += 1;

            if result.error().is_some() {
                summary.errors += 1;
                continue;
            }
            match result.matched() {
                Some(true) => summary.passed += 1,
                Some(false) => summary.failed += 1,
                None => summary.unevaluated += 1,
            }

            let (tokens_in, tokens_out) = result.tokens();
            summary.tokens_in += u64::from(tokens_in.unwrap_or(0));
            summary.tokens_out += u64::from(tokens_out.unwrap_or(0));
            summary.total_cost += result.cost().unwrap_or(0.0);
            if let Some(latency) = result.latency_ms() {
                latency_total += latency;
                latency_count += 1;
            }
        }

        if latency_count > 0 {
            summary.avg_latency_ms = Some(latency_total as f64 / latency_count as f64);
        }
        summary
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub config_hash: String,
    pub models: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub summaries: Vec<ModelSummary>,
    pub results: Vec<TestResult>,
}

impl RunReport {
    pub fn new(config: &PromptConfig, models: &[String], results: Vec<TestResult>) -> Self {
        let summaries = models
            .iter()
            .map(|model| ModelSummary::from_results(model.as_str(), &results))
            .collect();

        Self {
            name: config.name.clone(),
            config_hash: config.config_hash(models),
            models: models.to_vec(),
            generated_at: Utc::now(),
            summaries,
            results,
        }
    }

    /// True when some unit errored or its response did not match.
    pub fn has_failures(&self) -> bool {
        self.summaries
            .iter()
            .any(|summary| summary.errors > 0 || summary.failed > 0)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
