use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use promptlab::{
    config::starter_template,
    export,
    providers::{
        lazy::LazyProvider, openai::OpenAI, router::ModelRouter, scripted::ScriptedProvider,
    },
    validate_prompt_file, Change, LLMProvider, ModelSummary, PricingTable, PromptConfig,
    PromptRunner, RunComparison, RunReport, RunStats, RunnerSettings, Storage, TestResult,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "promptlab")]
#[command(about = "Test prompt templates against language models")]
struct Cli {
    /// Run history database [default: $PROMPTLAB_DB or ~/.promptlab/results.db]
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Command {
    /// Run a prompt file's test cases against one or more models
    Run {
        /// Prompt file (YAML)
        file: PathBuf,

        /// Models to test; defaults to the file's `model`
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        /// Maximum concurrent model calls
        #[arg(short = 'c', long)]
        max_concurrent: Option<usize>,

        /// Per-call timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Run only the given test case (1-based)
        #[arg(long = "test")]
        test_case: Option<usize>,

        /// Model used to judge semantic matches
        #[arg(long)]
        judge_model: Option<String>,

        /// Replay canned responses from a YAML file instead of calling providers
        #[arg(long)]
        scripted: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Do not record the run in the history database
        #[arg(long)]
        no_save: bool,
    },
    /// List recent runs
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Only runs with this config hash
        #[arg(long)]
        hash: Option<String>,
    },
    /// Show the results of a saved run
    Show {
        run_id: String,

        #[arg(long)]
        json: bool,
    },
    /// Compare two saved runs; exits 1 when a passing test started failing
    Compare { before: String, after: String },
    /// Export a saved run
    Export {
        run_id: String,

        #[arg(short, long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a prompt file for problems without calling any model
    Validate { file: PathBuf },
    /// Write a starter prompt file
    Init {
        name: String,

        /// Directory to create the file in
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Print the JSON schema of prompt files
    Schema,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,promptlab=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let db = cli.db.unwrap_or_else(Storage::default_path);

    match cli.command {
        Command::Run {
            file,
            models,
            max_concurrent,
            timeout,
            test_case,
            judge_model,
            scripted,
            json,
            no_save,
        } => {
            let mut settings = RunnerSettings::from_env();
            if let Some(max) = max_concurrent {
                settings = settings.with_max_concurrent(max);
            }
            if let Some(secs) = timeout {
                settings = settings.with_timeout(Duration::from_secs(secs));
            }
            if let Some(model) = judge_model {
                settings = settings.with_judge_model(model);
            }
            let save_to = (!no_save).then_some(db.as_path());
            run(&file, models, test_case, settings, scripted.as_deref(), json, save_to).await
        }
        Command::History { limit, hash } => {
            let storage = Storage::open(&db)?;
            let runs = match hash {
                Some(hash) => {
                    let mut runs = storage.runs_with_hash(&hash)?;
                    runs.truncate(limit);
                    runs
                }
                None => storage.list_runs(limit)?,
            };
            if runs.is_empty() {
                println!("No runs recorded in {}", db.display());
                return Ok(ExitCode::SUCCESS);
            }
            for record in &runs {
                println!(
                    "{}  {}  {}  {}  {}",
                    record.id.bold(),
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.prompt_name.cyan(),
                    record.models.join(","),
                    format!("[{}]", record.config_hash).dimmed()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { run_id, json } => {
            let storage = Storage::open(&db)?;
            let Some(record) = storage.get_run(&run_id)? else {
                eprintln!("{} run {run_id} not found", "✗".red().bold());
                return Ok(ExitCode::FAILURE);
            };
            let results = storage.get_results(&record.id)?;
            if json {
                println!("{}", export::to_json(&record, &results)?);
                return Ok(ExitCode::SUCCESS);
            }

            println!(
                "{} {} {}",
                record.id.bold().cyan(),
                record.prompt_file,
                format!("[{}]", record.config_hash).dimmed()
            );
            println!("{}", record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("{}", "=".repeat(60));
            for result in &results {
                print_result(result);
            }
            println!();
            let summaries: Vec<ModelSummary> = record
                .models
                .iter()
                .map(|model| ModelSummary::from_results(model.as_str(), &results))
                .collect();
            print_summaries(&summaries);
            Ok(ExitCode::SUCCESS)
        }
        Command::Compare { before, after } => {
            let storage = Storage::open(&db)?;
            let comparison = RunComparison::load(&storage, &before, &after)?;
            print_comparison(&comparison);
            Ok(if comparison.regressions().next().is_some() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Export {
            run_id,
            format,
            output,
        } => {
            let storage = Storage::open(&db)?;
            let record = storage.require_run(&run_id)?;
            let results = storage.get_results(&record.id)?;
            let mut sink: Box<dyn Write> = match &output {
                Some(path) => Box::new(fs::File::create(path)?),
                None => Box::new(std::io::stdout().lock()),
            };
            match format {
                ExportFormat::Json => writeln!(sink, "{}", export::to_json(&record, &results)?)?,
                ExportFormat::Csv => export::write_csv(&results, &mut sink)?,
            }
            if let Some(path) = output {
                eprintln!("Exported {} results to {}", results.len(), path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { file } => {
            let issues = validate_prompt_file(&file)?;
            if issues.is_empty() {
                println!("{} {}", "✓".green().bold(), format!("{} is valid", file.display()));
                return Ok(ExitCode::SUCCESS);
            }
            println!("{} {}", "✗".red().bold(), format!("{} has problems:", file.display()));
            for issue in &issues {
                println!("  - {issue}");
            }
            Ok(ExitCode::FAILURE)
        }
        Command::Init { name, dir } => {
            let path = dir.join(format!("{name}.yaml"));
            if path.exists() {
                return Err(format!("{} already exists", path.display()).into());
            }
            fs::write(&path, starter_template(&name))?;
            println!("Created {}", path.display().to_string().bold());
            Ok(ExitCode::SUCCESS)
        }
        Command::Schema => {
            let schema = schemars::schema_for!(PromptConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    file: &Path,
    models: Vec<String>,
    test_case: Option<usize>,
    settings: RunnerSettings,
    scripted: Option<&Path>,
    json: bool,
    save_to: Option<&Path>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = PromptConfig::load(file)?;
    if let Some(number) = test_case {
        config = config.select_test_case(number)?;
    }
    let models = if models.is_empty() {
        vec![config.model.clone()]
    } else {
        models
    };

    let provider = build_provider(scripted)?;
    let runner = PromptRunner::with_settings(provider, settings)
        .with_cost_estimator(Arc::new(PricingTable::with_defaults()));

    let results = runner.run_all(&config, &models).await?;
    let report = RunReport::new(&config, &models, results);

    if json {
        println!("{}", report.to_json_pretty()?);
    } else {
        print_report(&report);
    }

    if let Some(path) = save_to {
        let mut storage = Storage::open(path)?;
        let record = storage.save_run(&file.display().to_string(), &report)?;
        if !json {
            println!("\nRun ID: {}", record.id.bold());
        }
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Clients are only built when a model first needs them.
fn build_provider(scripted: Option<&Path>) -> Result<Arc<dyn LLMProvider>, Box<dyn std::error::Error>> {
    if let Some(path) = scripted {
        let script = fs::read_to_string(path)?;
        return Ok(Arc::new(ScriptedProvider::from_yaml_str(&script)?));
    }

    let openai: Arc<dyn LLMProvider> = Arc::new(LazyProvider::new("openai", || {
        Ok(Arc::new(OpenAI::from_env()?) as Arc<dyn LLMProvider>)
    }));
    let openrouter: Arc<dyn LLMProvider> = Arc::new(LazyProvider::new("openrouter", || {
        Ok(Arc::new(OpenAI::openrouter_from_env()?) as Arc<dyn LLMProvider>)
    }));

    Ok(Arc::new(ModelRouter::standard(openai, openrouter)))
}

fn print_report(report: &RunReport) {
    println!(
        "{} {}",
        report.name.bold().cyan(),
        format!("[{}]", report.config_hash).dimmed()
    );
    println!("{}", "=".repeat(60));

    for result in &report.results {
        print_result(result);
    }

    println!();
    print_summaries(&report.summaries);
}

fn print_summaries(summaries: &[ModelSummary]) {
    for summary in summaries {
        let latency = summary
            .avg_latency_ms
            .map(|ms| format!("{ms:.0}ms avg"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {}/{} passed  {} failed  {} errors  {}  ${:.4}",
            summary.model.bold(),
            summary.passed.to_string().green(),
            summary.total,
            summary.failed.to_string().yellow(),
            summary.errors.to_string().red(),
            latency,
            summary.total_cost
        );
    }
}

fn print_comparison(comparison: &RunComparison) {
    println!(
        "{} {} {}",
        comparison.before.id.bold(),
        "→".dimmed(),
        comparison.after.id.bold()
    );
    println!("{}", "=".repeat(60));

    for diff in &comparison.diffs {
        let symbol = match diff.change {
            Change::Regressed => diff.change.symbol().red().bold(),
            Change::Improved => diff.change.symbol().green().bold(),
            Change::StillFailing => diff.change.symbol().yellow(),
            _ => diff.change.symbol().normal(),
        };
        let cost = match diff.cost_delta() {
            Some(delta) if delta.abs() >= 0.0001 => format!("${delta:+.4}"),
            _ => "─".to_string(),
        };
        let latency = diff
            .latency_delta_ms()
            .map(|delta| format!("{delta:+}ms"))
            .unwrap_or_else(|| "─".to_string());
        println!(
            "{:<5} #{:<3} {:<30} {:>10} {:>9}",
            symbol,
            diff.test_case_idx + 1,
            diff.model,
            cost,
            latency
        );
    }

    println!();
    print_stats_delta("accuracy", &comparison.before_stats, &comparison.after_stats, |s| {
        (format!("{:.1}%", s.accuracy()), s.accuracy())
    });
    print_stats_delta("cost", &comparison.before_stats, &comparison.after_stats, |s| {
        (format!("${:.4}", s.total_cost), s.total_cost)
    });
    print_stats_delta("avg latency", &comparison.before_stats, &comparison.after_stats, |s| {
        let ms = s.avg_latency_ms.unwrap_or(0.0);
        (format!("{ms:.0}ms"), ms)
    });
    print_stats_delta("tokens", &comparison.before_stats, &comparison.after_stats, |s| {
        (s.total_tokens.to_string(), s.total_tokens as f64)
    });
}

fn print_stats_delta(
    label: &str,
    before: &RunStats,
    after: &RunStats,
    value: impl Fn(&RunStats) -> (String, f64),
) {
    let (before_text, before_value) = value(before);
    let (after_text, after_value) = value(after);
    let delta = after_value - before_value;
    println!("{label:<12} {before_text:>10} → {after_text:<10} ({delta:+.2})");
}

fn print_result(result: &TestResult) {
    let status = match (result.error(), result.matched()) {
        (Some(_), _) => "ERROR".red().bold(),
        (None, Some(true)) => "PASS".green().bold(),
        (None, Some(false)) => "FAIL".yellow().bold(),
        (None, None) => "DONE".normal(),
    };
    let detail = result
        .error()
        .or_else(|| result.response())
        .map(|text| truncate(text, 60))
        .unwrap_or_default();

    println!(
        "{:<5} {} #{} {}",
        status,
        result.model.dimmed(),
        result.test_case_idx + 1,
        detail
    );
    if let (None, Some(false)) = (result.error(), result.matched()) {
        println!("      expected: {}", truncate(&result.expected, 60));
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let cut: String = single_line.chars().take(max_chars).collect();
    format!("{cut}...")
}
