//! Concurrent execution of every (model, test case) pair of a prompt config.

use std::{env, sync::Arc, time::Duration};

use futures_util::future::join_all;
use thiserror::Error;
use tokio::{
    sync::Semaphore,
    time::{self, Instant},
};

use crate::{
    config::{PromptConfig, TestCase},
    cost::CostEstimator,
    matching::{check_match, MatchError, MatchMode, MatchResult, Matcher, SemanticJudge},
    providers::{
        credentials::{auth_hint, credential_hint, looks_like_auth_failure},
        LLMProvider,
    },
    result::{TestResult, UnitOutcome},
    template::{self, TemplateError},
    types::{ChatMessage, CompletionRequest, TokenUsage},
    LLMError,
};

const DEFAULT_MAX_CONCURRENT: usize = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BACKSTOP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Upper bound on in-flight units.
    pub max_concurrent: usize,
    /// Per-call timeout handed to the provider.
    pub timeout: Duration,
    /// Extra time on top of `timeout` before a unit is declared timed out.
    pub backstop: Duration,
    /// Judge for semantic matches; the model under test when unset.
    pub judge_model: Option<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: DEFAULT_TIMEOUT,
            backstop: DEFAULT_BACKSTOP,
            judge_model: None,
        }
    }
}

impl RunnerSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(value) = env::var("PROMPTLAB_MAX_CONCURRENT") {
            if let Ok(max) = value.parse::<usize>() {
                settings = settings.with_max_concurrent(max);
            }
        }
        if let Ok(value) = env::var("PROMPTLAB_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                settings.timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(model) = env::var("PROMPTLAB_JUDGE_MODEL") {
            if !model.trim().is_empty() {
                settings.judge_model = Some(model);
            }
        }

        settings
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.clamp(1, Semaphore::MAX_PERMITS);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backstop(mut self, backstop: Duration) -> Self {
        self.backstop = backstop;
        self
    }

    pub fn with_judge_model(mut self, model: impl Into<String>) -> Self {
        self.judge_model = Some(model.into());
        self
    }

    fn deadline(&self) -> Duration {
        self.timeout.saturating_add(self.backstop)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("test case {}: {source}", .test_case_idx + 1)]
    UnknownMatchMode {
        test_case_idx: usize,
        #[source]
        source: MatchError,
    },
}

/// Why a single unit produced no response.
#[derive(Debug)]
enum UnitFailure {
    Template(TemplateError),
    Timeout,
    Invocation(LLMError),
    PermitPoolClosed,
}

impl From<TemplateError> for UnitFailure {
    fn from(err: TemplateError) -> Self {
        UnitFailure::Template(err)
    }
}

impl From<LLMError> for UnitFailure {
    fn from(err: LLMError) -> Self {
        UnitFailure::Invocation(err)
    }
}

impl UnitFailure {
    fn describe(&self, model: &str) -> String {
        match self {
            UnitFailure::Template(err) => format!("TemplateError: {err}"),
            UnitFailure::Timeout => "Timeout".to_string(),
            UnitFailure::Invocation(err) => {
                let message = err.to_string();
                match err.credential_var() {
                    Some(var) => credential_hint(var, &message),
                    None if looks_like_auth_failure(&message) => auth_hint(model, &message),
                    None => format!("{}: {message}", err.kind()),
                }
            }
            UnitFailure::PermitPoolClosed => "ConcurrencyError: permit pool closed".to_string(),
        }
    }
}

#[derive(Debug)]
struct UnitSuccess {
    response: String,
    usage: Option<TokenUsage>,
    cost: Option<f64>,
    latency_ms: u64,
    match_result: MatchResult,
}

/// Runs prompt configs across models with bounded concurrency.
///
/// Units are multiplexed on the calling task and gated by one permit pool.
/// A unit keeps its permit through match evaluation, so semantic judge calls
/// count against the same limit as model calls.
pub struct PromptRunner {
    provider: Arc<dyn LLMProvider>,
    matcher: Matcher,
    cost: Option<Arc<dyn CostEstimator>>,
    settings: RunnerSettings,
    permits: Semaphore,
}

impl PromptRunner {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self::with_settings(provider, RunnerSettings::default())
    }

    pub fn with_settings(provider: Arc<dyn LLMProvider>, settings: RunnerSettings) -> Self {
        let judge = SemanticJudge::new(Arc::clone(&provider)).with_timeout(settings.timeout);
        Self {
            provider,
            matcher: Matcher::new(judge),
            cost: None,
            permits: Semaphore::new(settings.max_concurrent.clamp(1, Semaphore::MAX_PERMITS)),
            settings,
        }
    }

    /// Send semantic judgments to `provider` instead of the model provider.
    pub fn with_judge(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.matcher =
            Matcher::new(SemanticJudge::new(provider).with_timeout(self.settings.timeout));
        self
    }

    pub fn with_cost_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.cost = Some(estimator);
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run every test case against every model.
    ///
    /// Returns one result per (model, test case) pair, model-major and
    /// test-index-minor, whatever order the calls finish in. Unit failures
    /// are reported in their results; only an unrecognized match mode
    /// fails the whole run, before anything is dispatched.
    pub async fn run_all(
        &self,
        config: &PromptConfig,
        models: &[String],
    ) -> Result<Vec<TestResult>, RunError> {
        let modes = config
            .test_cases
            .iter()
            .enumerate()
            .map(|(idx, case)| {
                config
                    .effective_match(case)
                    .parse::<MatchMode>()
                    .map_err(|source| RunError::UnknownMatchMode {
                        test_case_idx: idx,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            prompt = %config.name,
            models = models.len(),
            test_cases = config.test_cases.len(),
            max_concurrent = self.settings.max_concurrent,
            "starting run"
        );

        let modes = &modes;
        let units = models.iter().flat_map(|model| {
            config
                .test_cases
                .iter()
                .enumerate()
                .map(move |(idx, case)| self.run_unit(config, model, idx, case, modes[idx]))
        });
        let results = join_all(units).await;

        let failed = results.iter().filter(|result| result.error().is_some()).count();
        tracing::info!(
            prompt = %config.name,
            total = results.len(),
            failed,
            "run finished"
        );

        Ok(results)
    }

    async fn run_unit(
        &self,
        config: &PromptConfig,
        model: &str,
        idx: usize,
        case: &TestCase,
        mode: MatchMode,
    ) -> TestResult {
        tracing::debug!(%model, test_case = idx, %mode, "dispatching unit");

        match self.execute_unit(config, model, case, mode).await {
            Ok(success) => {
                tracing::debug!(
                    %model,
                    test_case = idx,
                    latency_ms = success.latency_ms,
                    matched = success.match_result.matched,
                    "unit completed"
                );
                TestResult {
                    test_case_idx: idx,
                    model: model.to_string(),
                    inputs: case.inputs.clone(),
                    expected: case.expected.clone(),
                    outcome: UnitOutcome::Completed {
                        response: success.response,
                        tokens_in: success.usage.as_ref().map(|usage| usage.prompt_tokens),
                        tokens_out: success.usage.as_ref().map(|usage| usage.completion_tokens),
                        cost: success.cost,
                        latency_ms: success.latency_ms,
                        match_result: Some(success.match_result),
                    },
                }
            }
            Err(failure) => {
                let error = failure.describe(model);
                tracing::warn!(%model, test_case = idx, %error, "unit failed");
                TestResult::failed(
                    idx,
                    model,
                    case.inputs.clone(),
                    case.expected.clone(),
                    error,
                )
            }
        }
    }

    async fn execute_unit(
        &self,
        config: &PromptConfig,
        model: &str,
        case: &TestCase,
        mode: MatchMode,
    ) -> Result<UnitSuccess, UnitFailure> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| UnitFailure::PermitPoolClosed)?;
        let started = Instant::now();

        let prompt = template::render(&config.prompt, &case.inputs)?;
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &config.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let request = CompletionRequest::new(model, messages)
            .with_options(config.effective_parameters(case))
            .with_timeout(self.settings.timeout);

        let completion = time::timeout(self.settings.deadline(), self.provider.complete(request))
            .await
            .map_err(|_| UnitFailure::Timeout)??;

        let latency_ms = started.elapsed().as_millis() as u64;
        let response = completion.text().to_string();
        let cost = self.estimate_cost(model, completion.usage.as_ref());
        let match_result = self.evaluate(&response, &case.expected, mode, model).await;

        Ok(UnitSuccess {
            response,
            usage: completion.usage,
            cost,
            latency_ms,
            match_result,
        })
    }

    fn estimate_cost(&self, model: &str, usage: Option<&TokenUsage>) -> Option<f64> {
        let estimator = self.cost.as_ref()?;
        match estimator.estimate(model, usage) {
            Ok(cost) => Some(cost),
            Err(err) => {
                tracing::debug!(%model, error = %err, "cost unavailable");
                None
            }
        }
    }

    /// Local modes run inline; semantic judgments run on their own task so a
    /// slow judge never stalls the units sharing this one.
    async fn evaluate(
        &self,
        response: &str,
        expected: &str,
        mode: MatchMode,
        model: &str,
    ) -> MatchResult {
        if !mode.needs_judge() {
            return check_match(response, expected, mode);
        }

        let judge = self.matcher.judge().clone();
        let judge_model = self
            .settings
            .judge_model
            .clone()
            .unwrap_or_else(|| model.to_string());
        let response = response.to_string();
        let expected = expected.to_string();

        let mut handle = tokio::spawn(async move {
            judge.judge(&response, &expected, Some(judge_model.as_str())).await
        });

        match time::timeout(self.settings.deadline(), &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => MatchResult::new(false, MatchMode::Semantic)
                .with_detail(format!("Error in semantic matching: {err}")),
            Err(_) => {
                handle.abort();
                tracing::warn!(%model, "semantic judge timed out");
                MatchResult::new(false, MatchMode::Semantic)
                    .with_detail("Error in semantic matching: Timeout")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        config::TestCase,
        cost::PricingTable,
        providers::scripted::{ScriptedProvider, ScriptedTurn},
        types::{CompletionResponse, Parameters},
    };

    fn inputs(value: serde_json::Value) -> Parameters {
        value.as_object().cloned().expect("object")
    }

    fn two_case_config() -> PromptConfig {
        PromptConfig::new(
            "letters",
            "Map {{input}}",
            vec![
                TestCase::new(inputs(json!({"input": "alpha"})), "X"),
                TestCase::new(inputs(json!({"input": "beta"})), "Y"),
            ],
        )
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    /// Tracks peak concurrency while sleeping for each call.
    struct GaugeProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    impl GaugeProvider {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for GaugeProvider {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.model.clone());
            Ok(CompletionResponse {
                message: ChatMessage::assistant("ok"),
                usage: None,
            })
        }

        fn name(&self) -> &'static str {
            "gauge"
        }
    }

    #[tokio::test]
    async fn end_to_end_two_by_two_with_one_failure() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_turn(ScriptedTurn::reply("x").for_model("m1").when_contains("alpha"))
                .with_turn(ScriptedTurn::reply("nope").for_model("m1").when_contains("beta"))
                .with_turn(ScriptedTurn::reply("X").for_model("m2").when_contains("alpha"))
                .with_turn(ScriptedTurn::fail("upstream exploded").for_model("m2")),
        );
        let runner = PromptRunner::new(provider);

        let results = runner
            .run_all(&two_case_config(), &models(&["m1", "m2"]))
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        let order: Vec<(&str, usize)> = results
            .iter()
            .map(|r| (r.model.as_str(), r.test_case_idx))
            .collect();
        assert_eq!(order, vec![("m1", 0), ("m1", 1), ("m2", 0), ("m2", 1)]);

        assert_eq!(results.iter().filter(|r| r.response().is_some()).count(), 3);
        assert_eq!(results[0].matched(), Some(true));
        assert_eq!(results[1].matched(), Some(false));
        assert_eq!(results[2].matched(), Some(true));
        assert_eq!(
            results[3].error(),
            Some("ProviderError: provider error: upstream exploded")
        );
        assert_eq!(results[3].matched(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn result_order_ignores_completion_order() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_turn(
                    ScriptedTurn::reply("slow")
                        .for_model("A")
                        .when_contains("alpha")
                        .with_latency(Duration::from_millis(500)),
                )
                .with_default_reply("fast"),
        );
        let runner = PromptRunner::new(provider.clone());

        let results = runner
            .run_all(&two_case_config(), &models(&["A", "B"]))
            .await
            .unwrap();

        let order: Vec<(&str, usize)> = results
            .iter()
            .map(|r| (r.model.as_str(), r.test_case_idx))
            .collect();
        assert_eq!(order, vec![("A", 0), ("A", 1), ("B", 0), ("B", 1)]);
        assert_eq!(results[0].response(), Some("slow"));
        assert_eq!(results[0].latency_ms(), Some(500));
        assert_eq!(provider.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_becomes_timeout_result() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_turn(
                    ScriptedTurn::reply("too late")
                        .when_contains("alpha")
                        .with_latency(Duration::from_secs(600)),
                )
                .with_default_reply("Y"),
        );
        let settings = RunnerSettings::default().with_timeout(Duration::from_secs(1));
        let runner = PromptRunner::with_settings(provider, settings);

        let results = runner
            .run_all(&two_case_config(), &models(&["m"]))
            .await
            .unwrap();

        assert_eq!(results[0].error(), Some("Timeout"));
        assert_eq!(results[0].response(), None);
        assert_eq!(results[0].match_result(), None);
        assert_eq!(results[1].matched(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(100)));
        let settings = RunnerSettings::default().with_max_concurrent(2);
        let runner = PromptRunner::with_settings(provider.clone(), settings);
        let cases = (0..3)
            .map(|i| TestCase::new(inputs(json!({"input": i})), "ok"))
            .collect();
        let config = PromptConfig::new("gauge", "{{input}}", cases);

        let results = runner
            .run_all(&config, &models(&["m1", "m2"]))
            .await
            .unwrap();

        assert_eq!(results.len(), 6);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 2);
        assert_eq!(provider.seen.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn request_carries_system_and_merged_parameters() {
        let provider = Arc::new(ScriptedProvider::new().with_default_reply("X"));
        let runner = PromptRunner::new(provider.clone());
        let config = PromptConfig::new(
            "params",
            "Map {{input}}",
            vec![TestCase::new(inputs(json!({"input": "alpha"})), "X")
                .with_parameters(inputs(json!({"temperature": 0.9})))],
        )
        .with_system("You map letters.")
        .with_parameters(inputs(json!({"temperature": 0.0, "max_tokens": 5})));

        runner.run_all(&config, &models(&["m"])).await.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0], ChatMessage::system("You map letters."));
        assert_eq!(request.messages[1], ChatMessage::user("Map alpha"));
        assert_eq!(request.options, inputs(json!({"temperature": 0.9, "max_tokens": 5})));
        assert_eq!(request.timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(config.parameters.get("temperature"), Some(&json!(0.0)));
    }

    #[tokio::test]
    async fn template_errors_are_unit_failures() {
        let provider = Arc::new(ScriptedProvider::new().with_default_reply("X"));
        let runner = PromptRunner::new(provider.clone());
        let config = PromptConfig::new(
            "broken",
            "Hello {{name}}, you are {{age}} years old.",
            vec![TestCase::new(inputs(json!({"name": "Charlie"})), "X")],
        );

        let results = runner.run_all(&config, &models(&["m"])).await.unwrap();
        assert_eq!(
            results[0].error(),
            Some("TemplateError: missing template variable 'age'")
        );
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_mode_fails_the_run_before_dispatch() {
        let provider = Arc::new(ScriptedProvider::new().with_default_reply("X"));
        let runner = PromptRunner::new(provider.clone());
        let mut config = two_case_config();
        config.test_cases[1].match_mode = Some("fuzzy".into());

        let err = runner.run_all(&config, &models(&["m"])).await.unwrap_err();
        assert!(matches!(
            &err,
            RunError::UnknownMatchMode { test_case_idx: 1, source: MatchError::UnknownMode(mode) } if mode == "fuzzy"
        ));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn auth_failures_name_the_credential() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_turn(ScriptedTurn::fail("Incorrect API key provided").for_model("gpt-4o"))
                .with_turn(ScriptedTurn::fail("401 Unauthorized").for_model("local-llm")),
        );
        let runner = PromptRunner::new(provider);
        let config = PromptConfig::new(
            "auth",
            "hi",
            vec![TestCase::new(Parameters::new(), "X")],
        );

        let results = runner
            .run_all(&config, &models(&["gpt-4o", "local-llm"]))
            .await
            .unwrap();

        let first = results[0].error().unwrap();
        assert!(first.starts_with("Authentication failed: Set OPENAI_API_KEY environment variable."));
        let second = results[1].error().unwrap();
        assert!(second.starts_with("Authentication failed: Check your API key for model local-llm."));
    }

    #[tokio::test]
    async fn usage_and_cost_are_recorded_best_effort() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_turn(ScriptedTurn::reply("X").for_model("priced").with_usage(1_000_000, 0))
                .with_turn(ScriptedTurn::reply("X").for_model("unpriced").with_usage(10, 1)),
        );
        let mut table = PricingTable::empty();
        table.set_price("priced", 2.0, 4.0);
        let runner = PromptRunner::new(provider).with_cost_estimator(Arc::new(table));
        let config = PromptConfig::new(
            "cost",
            "hi",
            vec![TestCase::new(Parameters::new(), "X")],
        );

        let results = runner
            .run_all(&config, &models(&["priced", "unpriced"]))
            .await
            .unwrap();

        assert_eq!(results[0].tokens(), (Some(1_000_000), Some(0)));
        assert_eq!(results[0].cost(), Some(2.0));
        assert_eq!(results[1].tokens(), (Some(10), Some(1)));
        assert_eq!(results[1].cost(), None);
        assert_eq!(results[1].matched(), Some(true));
    }

    #[tokio::test]
    async fn semantic_mode_uses_judge_and_survives_judge_failure() {
        let provider = Arc::new(ScriptedProvider::new().with_default_reply("It is warm outside"));
        let judge = Arc::new(
            ScriptedProvider::new()
                .with_turn(ScriptedTurn::reply("YES").for_model("judge-a"))
                .with_turn(ScriptedTurn::fail("judge offline").for_model("judge-b")),
        );
        let config = PromptConfig::new(
            "semantic",
            "Weather?",
            vec![TestCase::new(Parameters::new(), "The weather is hot")],
        )
        .with_match("semantic");

        let runner = PromptRunner::with_settings(
            provider.clone(),
            RunnerSettings::default().with_judge_model("judge-a"),
        )
        .with_judge(judge.clone());
        let results = runner.run_all(&config, &models(&["m"])).await.unwrap();
        let result = results[0].match_result().unwrap();
        assert!(result.matched);
        assert_eq!(result.mode, MatchMode::Semantic);

        let runner = PromptRunner::with_settings(
            provider,
            RunnerSettings::default().with_judge_model("judge-b"),
        )
        .with_judge(judge.clone());
        let results = runner.run_all(&config, &models(&["m"])).await.unwrap();
        assert_eq!(results[0].error(), None);
        assert_eq!(results[0].matched(), Some(false));
        assert_eq!(judge.requests().len(), 2);
    }

    #[tokio::test]
    async fn semantic_judge_defaults_to_model_under_test() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_turn(ScriptedTurn::reply("YES").when_contains("Compare these two responses"))
                .with_default_reply("sunny"),
        );
        let config = PromptConfig::new(
            "semantic",
            "Weather?",
            vec![TestCase::new(Parameters::new(), "clear skies")],
        )
        .with_match("semantic");

        let runner = PromptRunner::new(provider.clone());
        let results = runner.run_all(&config, &models(&["m"])).await.unwrap();

        assert_eq!(results[0].matched(), Some(true));
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].model, "m");
    }

    #[test]
    fn settings_clamp_concurrency() {
        let settings = RunnerSettings::default().with_max_concurrent(0);
        assert_eq!(settings.max_concurrent, 1);
        assert_eq!(settings.deadline(), Duration::from_secs(35));
    }

    #[test]
    fn extreme_settings_saturate_instead_of_panicking() {
        let settings = RunnerSettings::default()
            .with_max_concurrent(usize::MAX)
            .with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(settings.max_concurrent, Semaphore::MAX_PERMITS);
        assert_eq!(settings.deadline(), Duration::MAX);

        let mut raw = RunnerSettings::default();
        raw.max_concurrent = usize::MAX;
        let runner = PromptRunner::with_settings(Arc::new(ScriptedProvider::new()), raw);
        assert_eq!(runner.permits.available_permits(), Semaphore::MAX_PERMITS);
    }

    /// Never answers.
    struct SilentJudge;

    #[async_trait]
    impl LLMProvider for SilentJudge {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "silent"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_judge_yields_negative_match() {
        let provider = Arc::new(ScriptedProvider::new().with_default_reply("warm"));
        let settings = RunnerSettings::default().with_timeout(Duration::from_secs(1));
        let runner =
            PromptRunner::with_settings(provider, settings).with_judge(Arc::new(SilentJudge));
        let config = PromptConfig::new(
            "semantic",
            "Weather?",
            vec![TestCase::new(Parameters::new(), "hot")],
        )
        .with_match("semantic");

        let results = time::timeout(
            Duration::from_secs(3600),
            runner.run_all(&config, &models(&["m1", "m2"])),
        )
        .await
        .expect("run finishes despite a silent judge")
        .unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.error(), None);
            let verdict = result.match_result().unwrap();
            assert!(!verdict.matched);
            assert_eq!(
                verdict.detail.as_deref(),
                Some("Error in semantic matching: Timeout")
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permit_is_held_while_judging() {
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(100)));
        let settings = RunnerSettings::default().with_max_concurrent(1);
        let runner = PromptRunner::with_settings(provider.clone(), settings);
        let cases = (0..3)
            .map(|i| TestCase::new(inputs(json!({"input": i})), "ok"))
            .collect();
        let config = PromptConfig::new("held", "{{input}}", cases).with_match("semantic");

        let results = runner.run_all(&config, &models(&["m"])).await.unwrap();

        assert_eq!(results.len(), 3);
        // three model calls plus three judge calls, never two at once
        assert_eq!(provider.seen.lock().unwrap().len(), 6);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
    }
}
