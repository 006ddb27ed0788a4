use std::{fmt, sync::Arc};

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use crate::{
    providers::LLMProvider,
    types::{CompletionRequest, CompletionResponse},
    LLMError,
};

type Factory = Box<dyn Fn() -> Result<Arc<dyn LLMProvider>, LLMError> + Send + Sync>;

/// Provider that builds its inner client on the first call.
///
/// Commands that never reach a model call never pay for client construction
/// or credential lookup. A failing factory is reported as that call's error
/// and attempted again on the next call.
pub struct LazyProvider {
    name: &'static str,
    factory: Factory,
    inner: OnceCell<Arc<dyn LLMProvider>>,
}

impl fmt::Debug for LazyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyProvider")
            .field("name", &self.name)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl LazyProvider {
    pub fn new<F>(name: &'static str, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn LLMProvider>, LLMError> + Send + Sync + 'static,
    {
        Self {
            name,
            factory: Box::new(factory),
            inner: OnceCell::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.get().is_some()
    }

    fn resolve(&self) -> Result<&Arc<dyn LLMProvider>, LLMError> {
        self.inner.get_or_try_init(|| {
            tracing::debug!(provider = self.name, "initializing provider");
            (self.factory)()
        })
    }
}

#[async_trait]
impl LLMProvider for LazyProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let provider = Arc::clone(self.resolve()?);
        provider.complete(request).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
