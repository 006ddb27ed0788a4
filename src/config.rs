//! Prompt test files: loading, validation and hashing.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{matching::MatchMode, template, types::Parameters};

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_match() -> String {
    MatchMode::Exact.as_str().to_string()
}

/// Accept any YAML scalar for `expected` so `expected: 42` reads as `"42"`.
fn scalar_to_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(_) | Value::Object(_) => Err(serde::de::Error::custom(
            "expected a string or scalar value",
        )),
        Value::Null => Ok(String::new()),
        other => Ok(template::stringify(&other)),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("prompt file not found: {0}")]
    NotFound(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse prompt YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("at least one test case is required")]
    NoTestCases,
    #[error("test case {requested} not found, valid range: 1-{available}")]
    TestCaseOutOfRange { requested: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestCase {
    pub inputs: Parameters,
    #[serde(deserialize_with = "scalar_to_string")]
    #[schemars(with = "String")]
    pub expected: String,
    /// Overrides the file-level match mode for this case.
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_mode: Option<String>,
    /// Merged over the file-level parameters; keys here win.
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
}

impl TestCase {
    pub fn new(inputs: Parameters, expected: impl Into<String>) -> Self {
        Self {
            inputs,
            expected: expected.into(),
            match_mode: None,
            parameters: Parameters::new(),
        }
    }

    pub fn with_match(mut self, mode: impl Into<String>) -> Self {
        self.match_mode = Some(mode.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PromptConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Model used when none is given on the command line.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    #[serde(rename = "match", default = "default_match")]
    pub match_mode: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
    pub test_cases: Vec<TestCase>,
}

impl PromptConfig {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, test_cases: Vec<TestCase>) -> Self {
        Self {
            name: name.into(),
            description: None,
            model: default_model(),
            system: None,
            prompt: prompt.into(),
            match_mode: default_match(),
            parameters: Parameters::new(),
            test_cases,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_match(mut self, mode: impl Into<String>) -> Self {
        self.match_mode = mode.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let config: PromptConfig = serde_yaml::from_str(input)?;
        if config.test_cases.is_empty() {
            return Err(ConfigError::NoTestCases);
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Global parameters overlaid with the test case's own, as a fresh map.
    pub fn effective_parameters(&self, test_case: &TestCase) -> Parameters {
        let mut merged = self.parameters.clone();
        merged.extend(
            test_case
                .parameters
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        merged
    }

    pub fn effective_match<'a>(&'a self, test_case: &'a TestCase) -> &'a str {
        test_case.match_mode.as_deref().unwrap_or(&self.match_mode)
    }

    /// Copy of this config restricted to the 1-based test case `number`.
    pub fn select_test_case(&self, number: usize) -> Result<Self, ConfigError> {
        if number == 0 || number > self.test_cases.len() {
            return Err(ConfigError::TestCaseOutOfRange {
                requested: number,
                available: self.test_cases.len(),
            });
        }
        let mut selected = self.clone();
        selected.test_cases = vec![self.test_cases[number - 1].clone()];
        Ok(selected)
    }

    /// Short fingerprint of the config and model list, stable across key order.
    pub fn config_hash(&self, models: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}",
            self.name,
            self.prompt,
            self.system.as_deref().unwrap_or_default(),
            self.match_mode,
            canonical_json(&self.parameters),
            models.join(","),
        ));
        for case in &self.test_cases {
            hasher.update(format!(
                "|{}|{}|{}|{}",
                canonical_json(&case.inputs),
                case.expected,
                case.match_mode.as_deref().unwrap_or_default(),
                canonical_json(&case.parameters),
            ));
        }

        hasher
            .finalize()
            .iter()
            .take(4)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

fn canonical_json(map: &Parameters) -> String {
    let sorted: BTreeMap<&String, &Value> = map.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn valid_modes() -> String {
    let mut modes: Vec<&str> = MatchMode::ALL.iter().map(|mode| mode.as_str()).collect();
    modes.sort_unstable();
    modes.join(", ")
}

fn is_valid_mode(value: &serde_yaml::Value) -> bool {
    value
        .as_str()
        .map_or(false, |mode| mode.parse::<MatchMode>().is_ok())
}

fn describe(value: &serde_yaml::Value) -> String {
    match value.as_str() {
        Some(text) => text.to_string(),
        None => serde_yaml::to_string(value)
            .map(|text| text.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Check a prompt file's YAML without running it. An empty list means valid.
pub fn validate_prompt_str(input: &str) -> Vec<String> {
    let mut issues = Vec::new();

    let data: serde_yaml::Value = match serde_yaml::from_str(input) {
        Ok(data) => data,
        Err(err) => {
            issues.push(format!("Invalid YAML: {err}"));
            return issues;
        }
    };

    let Some(root) = data.as_mapping() else {
        issues.push("File must contain a YAML mapping at the top level".to_string());
        return issues;
    };

    for field in ["name", "prompt", "test_cases"] {
        if !root.contains_key(field) {
            issues.push(format!("Missing required field: {field}"));
        }
    }
    if !issues.is_empty() {
        return issues;
    }

    if let Some(global) = root.get("match") {
        if !is_valid_mode(global) {
            issues.push(format!(
                "Invalid global match mode '{}'. Must be one of: {}",
                describe(global),
                valid_modes()
            ));
        }
    }

    let template_vars = root
        .get("prompt")
        .and_then(serde_yaml::Value::as_str)
        .map(template::placeholders)
        .unwrap_or_default();

    let test_cases = match root.get("test_cases").and_then(serde_yaml::Value::as_sequence) {
        Some(cases) if !cases.is_empty() => cases,
        _ => {
            issues.push("test_cases must be a non-empty list".to_string());
            return issues;
        }
    };

    for (idx, case) in test_cases.iter().enumerate() {
        let number = idx + 1;
        let Some(case) = case.as_mapping() else {
            issues.push(format!("Test case {number}: must be a mapping"));
            continue;
        };

        if !case.contains_key("inputs") {
            issues.push(format!("Test case {number}: missing 'inputs' field"));
        }
        if !case.contains_key("expected") {
            issues.push(format!("Test case {number}: missing 'expected' field"));
        }

        if let Some(inputs) = case.get("inputs").and_then(serde_yaml::Value::as_mapping) {
            let mut missing: Vec<&String> = template_vars
                .iter()
                .filter(|var| !inputs.contains_key(var.as_str()))
                .collect();
            missing.sort();
            for var in missing {
                issues.push(format!(
                    "Test case {number}: missing input variable '{var}' (required by prompt template)"
                ));
            }
        }

        if let Some(mode) = case.get("match") {
            if !is_valid_mode(mode) {
                issues.push(format!(
                    "Test case {number}: invalid match mode '{}'. Must be one of: {}",
                    describe(mode),
                    valid_modes()
                ));
            }
        }
    }

    issues
}

pub fn validate_prompt_file(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    Ok(validate_prompt_str(&fs::read_to_string(path)?))
}

/// Starter prompt file written by `promptlab init`.
pub fn starter_template(name: &str) -> String {
    format!(
        r#"name: {name}
description: Description of what this prompt does
model: gpt-4o
match: exact  # Match mode: exact, contains, starts_with, regex, or semantic
parameters:   # Global model parameters
  temperature: 0.0
  max_tokens: 100
system: You are a helpful assistant.

prompt: |
  Your prompt template here. Each {{{{input}}}} placeholder is filled from
  the test case inputs.

test_cases:
  - inputs:
      input: "Example input text"
    expected: "Expected output"
    # match: exact           # Override global match mode for this test
    # parameters:            # Override global parameters for this test
    #   temperature: 0.5

  - inputs:
      input: "Another example"
    expected: "Another expected output"
"#
    )
}
