use serde::{Deserialize, Serialize};

use crate::{matching::MatchResult, types::Parameters};

/// Outcome of one (test case, model) unit. A unit either produced a response
/// or failed with an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Completed {
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_in: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_out: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
        latency_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_result: Option<MatchResult>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case_idx: usize,
    pub model: String,
    pub inputs: Parameters,
    pub expected: String,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

impl TestResult {
    pub fn failed(
        test_case_idx: usize,
        model: impl Into<String>,
        inputs: Parameters,
        expected: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            test_case_idx,
            model: model.into(),
            inputs,
            expected: expected.into(),
            outcome: UnitOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn response(&self) -> Option<&str> {
        match &self.outcome {
            UnitOutcome::Completed { response, .. } => Some(response),
            UnitOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            UnitOutcome::Completed { .. } => None,
            UnitOutcome::Failed { error } => Some(error),
        }
    }

    pub fn match_result(&self) -> Option<&MatchResult> {
        match &self.outcome {
            UnitOutcome::Completed { match_result, .. } => match_result.as_ref(),
            UnitOutcome::Failed { .. } => None,
        }
    }

    /// `None` when the unit failed or no match evaluation was performed.
    pub fn matched(&self) -> Option<bool> {
        self.match_result().map(|result| result.matched)
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match &self.outcome {
            UnitOutcome::Completed { latency_ms, .. } => Some(*latency_ms),
            UnitOutcome::Failed { .. } => None,
        }
    }

    pub fn cost(&self) -> Option<f64> {
        match &self.outcome {
            UnitOutcome::Completed { cost, .. } => *cost,
            UnitOutcome::Failed { .. } => None,
        }
    }

    pub fn tokens(&self) -> (Option<u32>, Option<u32>) {
        match &self.outcome {
            UnitOutcome::Completed {
                tokens_in,
                tokens_out,
                ..
            } => (*tokens_in, *tokens_out),
            UnitOutcome::Failed { .. } => (None, None),
        }
    }
}
