//! Provider families recognized from model identifiers.
//!
//! Used only to produce helpful diagnostics; credentials themselves are read
//! by the concrete providers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAI,
    Anthropic,
    Google,
    Cohere,
}

const PREFIXES: &[(&str, ProviderFamily)] = &[
    ("gpt-", ProviderFamily::OpenAI),
    ("openai/", ProviderFamily::OpenAI),
    ("o1", ProviderFamily::OpenAI),
    ("o3", ProviderFamily::OpenAI),
    ("claude-", ProviderFamily::Anthropic),
    ("anthropic/", ProviderFamily::Anthropic),
    ("gemini", ProviderFamily::Google),
    ("google/", ProviderFamily::Google),
    ("command", ProviderFamily::Cohere),
    ("cohere/", ProviderFamily::Cohere),
];

const AUTH_MARKERS: &[&str] = &["authentication", "api key", "unauthorized"];

impl ProviderFamily {
    pub fn from_model(model: &str) -> Option<Self> {
        PREFIXES
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(_, family)| *family)
    }

    pub fn api_key_var(self) -> &'static str {
        match self {
            ProviderFamily::OpenAI => "OPENAI_API_KEY",
            ProviderFamily::Anthropic => "ANTHROPIC_API_KEY",
            ProviderFamily::Google => "GOOGLE_API_KEY",
            ProviderFamily::Cohere => "COHERE_API_KEY",
        }
    }
}

pub fn looks_like_auth_failure(message: &str) -> bool {
    let lowered = message.to_lowercase();
    AUTH_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Diagnostic naming the exact variable a provider read its key from.
pub fn credential_hint(api_key_var: &str, original: &str) -> String {
    format!("Authentication failed: Set {api_key_var} environment variable. Original error: {original}")
}

/// Diagnostic for an authentication failure against `model` when the provider
/// did not say which credential it used.
pub fn auth_hint(model: &str, original: &str) -> String {
    match ProviderFamily::from_model(model) {
        Some(family) => credential_hint(family.api_key_var(), original),
        None => format!(
            "Authentication failed: Check your API key for model {model}. Original error: {original}"
        ),
    }
}
