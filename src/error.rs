use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("authentication error: {message}")]
    Authentication {
        api_key_var: &'static str,
        message: String,
    },

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("no provider registered for model: {0}")]
    UnknownModel(String),
}

impl LLMError {
    /// Short error kind used as the prefix of unit diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            LLMError::Http(_) => "HttpError",
            LLMError::Serialization(_) => "SerializationError",
            LLMError::Provider(_) => "ProviderError",
            LLMError::Authentication { .. } => "AuthenticationError",
            LLMError::MissingApiKey(_) => "MissingApiKeyError",
            LLMError::InvalidResponse(_) => "InvalidResponseError",
            LLMError::Timeout(_) => "TimeoutError",
            LLMError::UnknownModel(_) => "UnknownModelError",
        }
    }

    /// Environment variable whose value the failing provider used or needed.
    pub fn credential_var(&self) -> Option<&'static str> {
        match self {
            LLMError::MissingApiKey(var) => Some(*var),
            LLMError::Authentication { api_key_var, .. } => Some(*api_key_var),
            _ => None,
        }
    }
}
