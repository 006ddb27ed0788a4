use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{
    error::LLMError,
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, Parameters, TokenUsage},
};

/// An OpenAI-compatible service and the environment variables that configure it.
#[derive(Debug, Clone, Copy)]
struct Backend {
    name: &'static str,
    api_key_var: &'static str,
    base_url_var: &'static str,
    default_base_url: &'static str,
    title: Option<&'static str>,
}

const OPENAI_BACKEND: Backend = Backend {
    name: "openai",
    api_key_var: "OPENAI_API_KEY",
    base_url_var: "OPENAI_BASE_URL",
    default_base_url: "https://api.openai.com/v1",
    title: None,
};

const OPENROUTER_BACKEND: Backend = Backend {
    name: "openrouter",
    api_key_var: "OPENROUTER_API_KEY",
    base_url_var: "OPENROUTER_BASE_URL",
    default_base_url: "https://openrouter.ai/api/v1",
    title: Some("promptlab"),
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    /// Variable the key came from, named in authentication diagnostics.
    pub api_key_var: &'static str,
    pub base_url: String,
    pub organization: Option<String>,
    pub title: Option<String>,
    pub request_timeout: Duration,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::for_backend(&OPENAI_BACKEND, api_key.into())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn for_backend(backend: &Backend, api_key: String) -> Self {
        Self {
            api_key,
            api_key_var: backend.api_key_var,
            base_url: backend.default_base_url.to_string(),
            organization: None,
            title: backend.title.map(str::to_string),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    fn from_backend_env(backend: &Backend) -> Result<Self, LLMError> {
        let api_key = env::var(backend.api_key_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(LLMError::MissingApiKey(backend.api_key_var))?;
        let mut config = Self::for_backend(backend, api_key);

        if let Ok(base_url) = env::var(backend.base_url_var) {
            config.base_url = base_url;
        }
        Ok(config)
    }
}

/// Client for any OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAI {
    client: Client,
    config: OpenAIConfig,
    name: &'static str,
}

impl OpenAI {
    /// OpenAI itself: `OPENAI_API_KEY`, optional `OPENAI_BASE_URL`,
    /// `OPENAI_ORGANIZATION` and `OPENAI_REQUEST_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, LLMError> {
        let mut config = OpenAIConfig::from_backend_env(&OPENAI_BACKEND)?;
        if let Ok(org) = env::var("OPENAI_ORGANIZATION") {
            config.organization = Some(org);
        }
        if let Some(ms) = env::var("OPENAI_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.request_timeout = Duration::from_millis(ms);
        }
        Self::build(config, OPENAI_BACKEND.name)
    }

    /// OpenRouter: `OPENROUTER_API_KEY`, optional `OPENROUTER_BASE_URL`.
    pub fn openrouter_from_env() -> Result<Self, LLMError> {
        let config = OpenAIConfig::from_backend_env(&OPENROUTER_BACKEND)?;
        Self::build(config, OPENROUTER_BACKEND.name)
    }

    pub fn from_config(config: OpenAIConfig) -> Result<Self, LLMError> {
        Self::build(config, OPENAI_BACKEND.name)
    }

    fn build(config: OpenAIConfig, name: &'static str) -> Result<Self, LLMError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            config,
            name,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder.bearer_auth(&self.config.api_key);
        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        if let Some(title) = &self.config.title {
            builder = builder.header("X-Title", title);
        }
        builder
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequestBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(flatten)]
    options: Parameters,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> LLMError {
    if err.is_timeout() {
        LLMError::Timeout(timeout)
    } else {
        LLMError::Http(err)
    }
}

#[async_trait]
impl LLMProvider for OpenAI {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let CompletionRequest {
            model,
            messages,
            options,
            timeout,
        } = request;
        let timeout = timeout.unwrap_or(self.config.request_timeout);

        tracing::debug!(provider = self.name, %model, "sending chat completion");

        let body = OpenAIRequestBody {
            model,
            messages,
            options,
        };

        let builder = self
            .authorize(self.client.post(self.chat_url()))
            .timeout(timeout)
            .json(&body);

        let response = builder
            .send()
            .await
            .map_err(|err| transport_error(err, timeout))?;
        let status = response.status();

        if !status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|err| transport_error(err, timeout))?;
            let message = match serde_json::from_str::<OpenAIErrorEnvelope>(&text) {
                Ok(envelope) => envelope.error.message,
                Err(_) => format!("unexpected status {status}: {text}"),
            };

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LLMError::Authentication {
                    api_key_var: self.config.api_key_var,
                    message,
                },
                _ => LLMError::Provider(message),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| transport_error(err, timeout))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LLMError::InvalidResponse("response did not contain any choices"))?;

        Ok(CompletionResponse {
            message: choice.message,
            usage: parsed.usage,
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
