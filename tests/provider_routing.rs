use std::sync::Arc;

use promptlab::{
    providers::{lazy::LazyProvider, router::ModelRouter},
    LLMError, LLMProvider, Parameters, PromptConfig, PromptRunner, TestCase,
};

/// Command-line routing with neither API key configured.
fn unconfigured_router() -> Arc<dyn LLMProvider> {
    let openai: Arc<dyn LLMProvider> = Arc::new(LazyProvider::new("openai", || {
        Err(LLMError::MissingApiKey("OPENAI_API_KEY"))
    }));
    let openrouter: Arc<dyn LLMProvider> = Arc::new(LazyProvider::new("openrouter", || {
        Err(LLMError::MissingApiKey("OPENROUTER_API_KEY"))
    }));
    Arc::new(ModelRouter::standard(openai, openrouter))
}

#[tokio::test]
async fn missing_keys_name_the_variable_actually_read() {
    let runner = PromptRunner::new(unconfigured_router());
    let config = PromptConfig::new("keys", "hi", vec![TestCase::new(Parameters::new(), "X")]);
    let models: Vec<String> = ["claude-3-haiku", "gpt-4o", "mistral-large"]
        .iter()
        .map(|model| model.to_string())
        .collect();

    let results = runner.run_all(&config, &models).await.expect("run");

    assert_eq!(
        results[0].error(),
        Some(
            "Authentication failed: Set OPENROUTER_API_KEY environment variable. \
             Original error: missing API key: set the OPENROUTER_API_KEY environment variable"
        )
    );
    assert_eq!(
        results[1].error(),
        Some(
            "Authentication failed: Set OPENAI_API_KEY environment variable. \
             Original error: missing API key: set the OPENAI_API_KEY environment variable"
        )
    );
    assert!(results[2]
        .error()
        .unwrap_or_default()
        .starts_with("Authentication failed: Set OPENAI_API_KEY"));
    assert!(results.iter().all(|result| !result.error().unwrap_or_default().contains("ANTHROPIC")));
}
