pub mod compare;
pub mod config;
pub mod cost;
pub mod error;
pub mod export;
pub mod matching;
pub mod providers;
pub mod report;
pub mod result;
pub mod runner;
pub mod storage;
pub mod template;
pub mod types;

pub use compare::{Change, ResultDiff, RunComparison, RunStats};
pub use config::{validate_prompt_file, validate_prompt_str, ConfigError, PromptConfig, TestCase};
pub use cost::{CostError, CostEstimator, ModelPrice, PricingTable};
pub use error::LLMError;
pub use export::ExportError;
pub use matching::{check_match, MatchError, MatchMode, MatchResult, Matcher, SemanticJudge};
pub use providers::LLMProvider;
pub use report::{ModelSummary, RunReport};
pub use result::{TestResult, UnitOutcome};
pub use runner::{PromptRunner, RunError, RunnerSettings};
pub use storage::{RunRecord, Storage, StorageError};
pub use template::{render, TemplateError};
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, MessageRole, Parameters, TokenUsage,
};
pub use schemars::JsonSchema;
