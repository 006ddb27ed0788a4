use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    providers::LLMProvider,
    types::{CompletionRequest, CompletionResponse},
    LLMError,
};

enum Rewrite {
    Keep,
    Strip,
    Namespace(String),
}

struct Route {
    prefix: String,
    rewrite: Rewrite,
    provider: Arc<dyn LLMProvider>,
}

/// Dispatches requests to providers by model identifier prefix.
///
/// The longest matching prefix wins. Requests whose model matches no route go
/// to the fallback provider, if one is set.
#[derive(Default)]
pub struct ModelRouter {
    routes: Vec<Route>,
    fallback: Option<Arc<dyn LLMProvider>>,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routing used by the command line: OpenAI models go to `openai`, and
    /// Anthropic, Google and Cohere models are served through `openrouter`.
    ///
    /// Bare ids such as `claude-3-haiku` are sent to OpenRouter under their
    /// vendor namespace (`anthropic/claude-3-haiku`). Anything unrecognized
    /// falls back to `openai`.
    pub fn standard(openai: Arc<dyn LLMProvider>, openrouter: Arc<dyn LLMProvider>) -> Self {
        Self::new()
            .route_stripped("openrouter/", Arc::clone(&openrouter))
            .route_stripped("openai/", Arc::clone(&openai))
            .route("anthropic/", Arc::clone(&openrouter))
            .route("google/", Arc::clone(&openrouter))
            .route("cohere/", Arc::clone(&openrouter))
            .route_namespaced("claude-", "anthropic", Arc::clone(&openrouter))
            .route_namespaced("gemini", "google", Arc::clone(&openrouter))
            .route_namespaced("command", "cohere", openrouter)
            .with_fallback(openai)
    }

    /// Route `prefix*` models to `provider`, passing the model id through unchanged.
    pub fn route(mut self, prefix: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        self.routes.push(Route {
            prefix: prefix.into(),
            rewrite: Rewrite::Keep,
            provider,
        });
        self
    }

    /// Route `prefix*` models to `provider` with the prefix removed, e.g.
    /// `openrouter/anthropic/claude-3-haiku` is sent as `anthropic/claude-3-haiku`.
    pub fn route_stripped(
        mut self,
        prefix: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
    ) -> Self {
        self.routes.push(Route {
            prefix: prefix.into(),
            rewrite: Rewrite::Strip,
            provider,
        });
        self
    }

    /// Route `prefix*` models to `provider` as `namespace/<model>`.
    pub fn route_namespaced(
        mut self,
        prefix: impl Into<String>,
        namespace: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
    ) -> Self {
        self.routes.push(Route {
            prefix: prefix.into(),
            rewrite: Rewrite::Namespace(namespace.into()),
            provider,
        });
        self
    }

    pub fn with_fallback(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    fn resolve(&self, model: &str) -> Option<(Arc<dyn LLMProvider>, String)> {
        let best = self
            .routes
            .iter()
            .filter(|route| model.starts_with(&route.prefix))
            .max_by_key(|route| route.prefix.len());

        match best {
            Some(route) => {
                let model = match &route.rewrite {
                    Rewrite::Keep => model.to_string(),
                    Rewrite::Strip => model[route.prefix.len()..].to_string(),
                    Rewrite::Namespace(namespace) => format!("{namespace}/{model}"),
                };
                Some((Arc::clone(&route.provider), model))
            }
            None => self
                .fallback
                .as_ref()
                .map(|provider| (Arc::clone(provider), model.to_string())),
        }
    }
}

#[async_trait]
impl LLMProvider for ModelRouter {
    async fn complete(&self, mut request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let (provider, model) = self
            .resolve(&request.model)
            .ok_or_else(|| LLMError::UnknownModel(request.model.clone()))?;

        tracing::debug!(provider = provider.name(), from = %request.model, to = %model, "routing request");
        request.model = model;
        provider.complete(request).await
    }

    fn name(&self) -> &'static str {
        "router"
    }
}
