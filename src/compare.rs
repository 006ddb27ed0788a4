//! Side-by-side comparison of two saved runs.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    result::TestResult,
    storage::{RunRecord, Storage, StorageError},
};

/// How one (test case, model) unit changed between two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Added,
    Removed,
    StillPassing,
    StillFailing,
    Regressed,
    Improved,
}

impl Change {
    fn between(before: Option<&TestResult>, after: Option<&TestResult>) -> Self {
        match (before.map(passed), after.map(passed)) {
            (None, _) => Change::Added,
            (_, None) => Change::Removed,
            (Some(true), Some(true)) => Change::StillPassing,
            (Some(false), Some(false)) => Change::StillFailing,
            (Some(true), Some(false)) => Change::Regressed,
            (Some(false), Some(true)) => Change::Improved,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Change::Added => "+",
            Change::Removed => "-",
            Change::StillPassing => "✓✓",
            Change::StillFailing => "✗✗",
            Change::Regressed => "✓→✗",
            Change::Improved => "✗→✓",
        }
    }
}

fn passed(result: &TestResult) -> bool {
    result.matched() == Some(true)
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultDiff {
    pub test_case_idx: usize,
    pub model: String,
    pub before: Option<TestResult>,
    pub after: Option<TestResult>,
    pub change: Change,
}

impl ResultDiff {
    pub fn cost_delta(&self) -> Option<f64> {
        let before = self.before.as_ref().and_then(TestResult::cost);
        let after = self.after.as_ref().and_then(TestResult::cost);
        match (before, after) {
            (None, None) => None,
            (before, after) => Some(after.unwrap_or(0.0) - before.unwrap_or(0.0)),
        }
    }

    pub fn latency_delta_ms(&self) -> Option<i64> {
        let before = self.before.as_ref().and_then(TestResult::latency_ms)?;
        let after = self.after.as_ref().and_then(TestResult::latency_ms)?;
        Some(after as i64 - before as i64)
    }
}

/// Totals over one run's results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub passed: usize,
    pub total_cost: f64,
    pub total_tokens: u64,
    /// Mean over units that reported a non-zero latency.
    pub avg_latency_ms: Option<f64>,
}

impl RunStats {
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut stats = RunStats {
            total: results.len(),
            ..Default::default()
        };
        let mut latencies = Vec::new();

        for result in results {
            if passed(result) {
                stats.passed += 1;
            }
            stats.total_cost += result.cost().unwrap_or(0.0);
            let (tokens_in, tokens_out) = result.tokens();
            stats.total_tokens +=
                u64::from(tokens_in.unwrap_or(0)) + u64::from(tokens_out.unwrap_or(0));
            if let Some(ms) = result.latency_ms().filter(|ms| *ms > 0) {
                latencies.push(ms as f64);
            }
        }

        if !latencies.is_empty() {
            stats.avg_latency_ms = Some(latencies.iter().sum::<f64>() / latencies.len() as f64);
        }
        stats
    }

    /// Percentage of units that matched.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunComparison {
    pub before: RunRecord,
    pub after: RunRecord,
    pub before_stats: RunStats,
    pub after_stats: RunStats,
    pub diffs: Vec<ResultDiff>,
}

impl RunComparison {
    /// Pairs results by test case and model; diffs come out sorted on that key.
    pub fn new(
        before: RunRecord,
        before_results: Vec<TestResult>,
        after: RunRecord,
        after_results: Vec<TestResult>,
    ) -> Self {
        let before_stats = RunStats::from_results(&before_results);
        let after_stats = RunStats::from_results(&after_results);

        let mut pairs: BTreeMap<(usize, String), (Option<TestResult>, Option<TestResult>)> =
            BTreeMap::new();
        for result in before_results {
            let key = (result.test_case_idx, result.model.clone());
            pairs.entry(key).or_default().0 = Some(result);
        }
        for result in after_results {
            let key = (result.test_case_idx, result.model.clone());
            pairs.entry(key).or_default().1 = Some(result);
        }

        let diffs = pairs
            .into_iter()
            .map(|((test_case_idx, model), (before, after))| ResultDiff {
                test_case_idx,
                model,
                change: Change::between(before.as_ref(), after.as_ref()),
                before,
                after,
            })
            .collect();

        Self {
            before,
            after,
            before_stats,
            after_stats,
            diffs,
        }
    }

    pub fn load(storage: &Storage, before_id: &str, after_id: &str) -> Result<Self, StorageError> {
        let before = storage.require_run(before_id)?;
        let after = storage.require_run(after_id)?;
        let before_results = storage.get_results(&before.id)?;
        let after_results = storage.get_results(&after.id)?;
        Ok(Self::new(before, before_results, after, after_results))
    }

    pub fn regressions(&self) -> impl Iterator<Item = &ResultDiff> {
        self.diffs
            .iter()
            .filter(|diff| diff.change == Change::Regressed)
    }
}
