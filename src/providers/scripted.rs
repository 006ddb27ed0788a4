use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, TokenUsage},
    LLMError,
};

/// One canned reply. A turn applies when its `model` (if set) equals the
/// requested model and its `contains` (if set) occurs in the last user message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ScriptedTurn {
    pub fn reply(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            ..Self::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn for_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn when_contains(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Some(TokenUsage::new(prompt_tokens, completion_tokens));
        self
    }

    fn applies_to(&self, request: &CompletionRequest) -> bool {
        let model_ok = self.model.as_deref().map_or(true, |m| m == request.model);
        let text_ok = self.contains.as_deref().map_or(true, |needle| {
            request
                .last_user_text()
                .map_or(false, |text| text.contains(needle))
        });
        model_ok && text_ok
    }
}

/// Offline provider replaying canned turns. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    turns: Vec<ScriptedTurn>,
    default_reply: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, serde_yaml::Error> {
        let turns: Vec<ScriptedTurn> = serde_yaml::from_str(input)?;
        Ok(Self::from_turns(turns))
    }

    pub fn with_turn(mut self, turn: ScriptedTurn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let turn = self.turns.iter().find(|turn| turn.applies_to(&request)).cloned();
        let model = request.model.clone();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let Some(turn) = turn else {
            return match &self.default_reply {
                Some(reply) => Ok(CompletionResponse {
                    message: ChatMessage::assistant(reply.clone()),
                    usage: None,
                }),
                None => Err(LLMError::Provider(format!(
                    "no scripted response for model {model}"
                ))),
            };
        };

        if let Some(ms) = turn.latency_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if let Some(error) = turn.error {
            return Err(LLMError::Provider(error));
        }

        Ok(CompletionResponse {
            message: ChatMessage::assistant(turn.response.unwrap_or_default()),
            usage: turn.usage,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
