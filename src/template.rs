//! `{{name}}` placeholder rendering for prompt templates.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::types::Parameters;

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("missing template variable '{0}'")]
    MissingVariable(String),
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in RE_PLACEHOLDER.captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Render `template`, replacing each `{{name}}` with the stringified `inputs[name]`.
///
/// Substituted values are never re-scanned, so a value that itself contains
/// `{{...}}` is inserted verbatim.
pub fn render(template: &str, inputs: &Parameters) -> Result<String, TemplateError> {
    if let Some(missing) = placeholders(template)
        .into_iter()
        .find(|name| !inputs.contains_key(name))
    {
        return Err(TemplateError::MissingVariable(missing));
    }

    let rendered = RE_PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        inputs.get(&caps[1]).map(stringify).unwrap_or_default()
    });

    Ok(rendered.into_owned())
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
