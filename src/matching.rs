//! Strategies for deciding whether a model response satisfies an expected value.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest},
};

/// Judge used by semantic matching when no model is given.
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("Unknown match mode: {0}")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Exact,
    Contains,
    StartsWith,
    Regex,
    Semantic,
}

impl MatchMode {
    pub const ALL: [MatchMode; 5] = [
        MatchMode::Exact,
        MatchMode::Contains,
        MatchMode::StartsWith,
        MatchMode::Regex,
        MatchMode::Semantic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::Exact => "exact",
            MatchMode::Contains => "contains",
            MatchMode::StartsWith => "starts_with",
            MatchMode::Regex => "regex",
            MatchMode::Semantic => "semantic",
        }
    }

    /// Every mode except `semantic` is decided locally without I/O.
    pub fn needs_judge(self) -> bool {
        matches!(self, MatchMode::Semantic)
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMode {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| MatchError::UnknownMode(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub mode: MatchMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl MatchResult {
    pub fn new(matched: bool, mode: MatchMode) -> Self {
        Self {
            matched,
            mode,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Evaluate one of the local modes. `semantic` needs a [`SemanticJudge`] and
/// reports a non-match here.
pub fn check_match(response: &str, expected: &str, mode: MatchMode) -> MatchResult {
    match mode {
        MatchMode::Exact => MatchResult::new(normalize(response) == normalize(expected), mode),
        MatchMode::Contains => {
            MatchResult::new(normalize(response).contains(&normalize(expected)), mode)
        }
        MatchMode::StartsWith => {
            MatchResult::new(normalize(response).starts_with(&normalize(expected)), mode)
        }
        MatchMode::Regex => check_regex(response, expected),
        MatchMode::Semantic => {
            MatchResult::new(false, mode).with_detail("semantic matching requires a judge")
        }
    }
}

fn check_regex(response: &str, pattern: &str) -> MatchResult {
    let regex = match RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
    {
        Ok(regex) => regex,
        Err(err) => {
            return MatchResult::new(false, MatchMode::Regex)
                .with_detail(format!("Invalid regex pattern: {err}"))
        }
    };

    match regex.find(response) {
        Some(found) => MatchResult::new(true, MatchMode::Regex)
            .with_detail(format!("Matched: '{}'", found.as_str())),
        None => MatchResult::new(false, MatchMode::Regex).with_detail("No match found"),
    }
}

pub fn judgment_prompt(expected: &str, response: &str) -> String {
    format!(
        "Compare these two responses and determine if they convey the same meaning or intent.\n\
         \n\
         Expected: {expected}\n\
         Actual: {response}\n\
         \n\
         Respond with only \"YES\" if they match semantically, or \"NO\" if they don't match. Consider:\n\
         - Similar meanings expressed differently\n\
         - Equivalent information presented in different formats\n\
         - Minor variations in wording that don't change the core intent\n\
         \n\
         Answer: "
    )
}

/// Asks a judge model whether a response means the same as the expected value.
///
/// Never fails: provider errors become a negative match with the error in the detail.
#[derive(Clone)]
pub struct SemanticJudge {
    provider: Option<Arc<dyn LLMProvider>>,
    default_model: String,
    timeout: Option<Duration>,
}

impl fmt::Debug for SemanticJudge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemanticJudge")
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .field("default_model", &self.default_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SemanticJudge {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider: Some(provider),
            default_model: DEFAULT_JUDGE_MODEL.to_string(),
            timeout: None,
        }
    }

    /// A judge with no backend; every semantic check is a non-match.
    pub fn unavailable() -> Self {
        Self {
            provider: None,
            default_model: DEFAULT_JUDGE_MODEL.to_string(),
            timeout: None,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn judge(&self, response: &str, expected: &str, model: Option<&str>) -> MatchResult {
        let Some(provider) = &self.provider else {
            return MatchResult::new(false, MatchMode::Semantic)
                .with_detail("no judge provider available");
        };
        let model = model.unwrap_or(&self.default_model);

        let mut request = CompletionRequest::new(
            model,
            vec![ChatMessage::user(judgment_prompt(expected, response))],
        )
        .with_max_tokens(10)
        .with_temperature(0.0);
        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }

        match provider.complete(request).await {
            Ok(completion) => {
                let verdict = completion.text().trim().to_uppercase();
                MatchResult::new(verdict == "YES", MatchMode::Semantic)
                    .with_detail(format!("LLM evaluation ({model}): {verdict}"))
            }
            Err(err) => {
                tracing::debug!(%model, error = %err, "semantic judge call failed");
                MatchResult::new(false, MatchMode::Semantic)
                    .with_detail(format!("Error in semantic matching: {err}"))
            }
        }
    }
}

/// Full evaluation entry point covering all five modes.
#[derive(Debug, Clone)]
pub struct Matcher {
    judge: SemanticJudge,
}

impl Matcher {
    pub fn new(judge: SemanticJudge) -> Self {
        Self { judge }
    }

    /// Matcher without a judge backend, for purely local evaluation.
    pub fn local() -> Self {
        Self::new(SemanticJudge::unavailable())
    }

    pub fn judge(&self) -> &SemanticJudge {
        &self.judge
    }

    /// Parse `mode` and evaluate. Only an unrecognized mode is an error.
    pub async fn evaluate(
        &self,
        response: &str,
        expected: &str,
        mode: &str,
        model: Option<&str>,
    ) -> Result<MatchResult, MatchError> {
        let mode: MatchMode = mode.parse()?;
        Ok(self.evaluate_mode(response, expected, mode, model).await)
    }

    pub async fn evaluate_mode(
        &self,
        response: &str,
        expected: &str,
        mode: MatchMode,
        model: Option<&str>,
    ) -> MatchResult {
        if mode.needs_judge() {
            self.judge.judge(response, expected, model).await
        } else {
            check_match(response, expected, mode)
        }
    }
}
