//! SQLite history of past runs.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    matching::{MatchMode, MatchResult},
    report::RunReport,
    result::{TestResult, UnitOutcome},
    types::Parameters,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    prompt_file TEXT NOT NULL,
    prompt_name TEXT NOT NULL,
    models TEXT NOT NULL,
    config_hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS results (
    run_id TEXT NOT NULL REFERENCES runs (id),
    position INTEGER NOT NULL,
    test_case_idx INTEGER NOT NULL,
    model TEXT NOT NULL,
    inputs TEXT NOT NULL,
    expected TEXT NOT NULL,
    response TEXT,
    error TEXT,
    tokens_in INTEGER,
    tokens_out INTEGER,
    cost REAL,
    latency_ms INTEGER,
    matched INTEGER,
    match_mode TEXT,
    match_detail TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON runs (timestamp);
CREATE INDEX IF NOT EXISTS idx_runs_config_hash ON runs (config_hash);
CREATE INDEX IF NOT EXISTS idx_results_run_id ON results (run_id);
";

const RUN_COLUMNS: &str = "id, timestamp, prompt_file, prompt_name, models, config_hash";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("run {0} not found")]
    RunNotFound(String),
}

/// Metadata of one saved run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt_file: String,
    pub prompt_name: String,
    pub models: Vec<String>,
    pub config_hash: String,
}

/// Result row as stored, before its outcome is rebuilt.
struct StoredResult {
    test_case_idx: i64,
    model: String,
    inputs: String,
    expected: String,
    response: Option<String>,
    error: Option<String>,
    tokens_in: Option<u32>,
    tokens_out: Option<u32>,
    cost: Option<f64>,
    latency_ms: Option<i64>,
    matched: Option<bool>,
    match_mode: Option<String>,
    match_detail: Option<String>,
}

impl StoredResult {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            test_case_idx: row.get(0)?,
            model: row.get(1)?,
            inputs: row.get(2)?,
            expected: row.get(3)?,
            response: row.get(4)?,
            error: row.get(5)?,
            tokens_in: row.get(6)?,
            tokens_out: row.get(7)?,
            cost: row.get(8)?,
            latency_ms: row.get(9)?,
            matched: row.get(10)?,
            match_mode: row.get(11)?,
            match_detail: row.get(12)?,
        })
    }

    fn into_test_result(self) -> Result<TestResult, StorageError> {
        let inputs: Parameters = serde_json::from_str(&self.inputs)?;
        let outcome = match self.error {
            Some(error) => UnitOutcome::Failed { error },
            None => {
                let match_result = match (self.matched, self.match_mode.as_deref()) {
                    (Some(matched), Some(mode)) => mode.parse::<MatchMode>().ok().map(|mode| {
                        MatchResult {
                            matched,
                            mode,
                            detail: self.match_detail,
                        }
                    }),
                    _ => None,
                };
                UnitOutcome::Completed {
                    response: self.response.unwrap_or_default(),
                    tokens_in: self.tokens_in,
                    tokens_out: self.tokens_out,
                    cost: self.cost,
                    latency_ms: self
                        .latency_ms
                        .and_then(|ms| u64::try_from(ms).ok())
                        .unwrap_or(0),
                    match_result,
                }
            }
        };

        Ok(TestResult {
            test_case_idx: usize::try_from(self.test_case_idx).unwrap_or_default(),
            model: self.model,
            inputs,
            expected: self.expected,
            outcome,
        })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let seconds: i64 = row.get(1)?;
    let models: String = row.get(4)?;
    Ok(RunRecord {
        id: row.get(0)?,
        timestamp: DateTime::from_timestamp(seconds, 0).unwrap_or_default(),
        prompt_file: row.get(2)?,
        prompt_name: row.get(3)?,
        models: models.split(',').map(str::to_string).collect(),
        config_hash: row.get(5)?,
    })
}

/// `20240501-142233-a1f3`: run start plus a short random suffix.
fn new_run_id(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", at.format("%Y%m%d-%H%M%S"), &suffix[..4])
}

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// `PROMPTLAB_DB`, else `~/.promptlab/results.db`.
    pub fn default_path() -> PathBuf {
        match env::var("PROMPTLAB_DB") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => dirs::home_dir()
                .unwrap_or_default()
                .join(".promptlab")
                .join("results.db"),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened run history");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Persist a finished run and all of its results in one transaction.
    pub fn save_run(
        &mut self,
        prompt_file: &str,
        report: &RunReport,
    ) -> Result<RunRecord, StorageError> {
        let record = RunRecord {
            id: new_run_id(report.generated_at),
            timestamp: report.generated_at,
            prompt_file: prompt_file.to_string(),
            prompt_name: report.name.clone(),
            models: report.models.clone(),
            config_hash: report.config_hash.clone(),
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (id, timestamp, prompt_file, prompt_name, models, config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.timestamp.timestamp(),
                record.prompt_file,
                record.prompt_name,
                record.models.join(","),
                record.config_hash,
            ],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO results (run_id, position, test_case_idx, model, inputs, expected,
                     response, error, tokens_in, tokens_out, cost, latency_ms,
                     matched, match_mode, match_detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for (position, result) in report.results.iter().enumerate() {
                let (tokens_in, tokens_out) = result.tokens();
                let match_result = result.match_result();
                insert.execute(params![
                    record.id,
                    position as i64,
                    result.test_case_idx as i64,
                    result.model,
                    serde_json::to_string(&result.inputs)?,
                    result.expected,
                    result.response(),
                    result.error(),
                    tokens_in,
                    tokens_out,
                    result.cost(),
                    result.latency_ms().map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
                    match_result.map(|m| m.matched),
                    match_result.map(|m| m.mode.as_str()),
                    match_result.and_then(|m| m.detail.as_deref()),
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(run_id = %record.id, results = report.results.len(), "saved run");
        Ok(record)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<RunRecord>, StorageError> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    pub fn require_run(&self, id: &str) -> Result<RunRecord, StorageError> {
        self.get_run(id)?
            .ok_or_else(|| StorageError::RunNotFound(id.to_string()))
    }

    /// Results of a run in the order they were produced.
    pub fn get_results(&self, run_id: &str) -> Result<Vec<TestResult>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT test_case_idx, model, inputs, expected, response, error, tokens_in,
                    tokens_out, cost, latency_ms, matched, match_mode, match_detail
             FROM results WHERE run_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![run_id], StoredResult::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(StoredResult::into_test_result).collect()
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY timestamp DESC, rowid DESC LIMIT ?1"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let runs = stmt
            .query_map(params![limit], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Earlier runs of the same prompt and model list, most recent first.
    pub fn runs_with_hash(&self, config_hash: &str) -> Result<Vec<RunRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE config_hash = ?1
             ORDER BY timestamp DESC, rowid DESC"
        ))?;
        let runs = stmt
            .query_map(params![config_hash], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::{PromptConfig, TestCase};

    fn config() -> PromptConfig {
        PromptConfig::new(
            "letters",
            "Map {{input}}",
            vec![
                TestCase::new(json!({"input": "a"}).as_object().cloned().unwrap(), "X"),
                TestCase::new(json!({"input": "b"}).as_object().cloned().unwrap(), "Y"),
            ],
        )
    }

    fn report() -> RunReport {
        let config = config();
        let results = vec![
            TestResult {
                test_case_idx: 0,
                model: "gpt-4o".into(),
                inputs: config.test_cases[0].inputs.clone(),
                expected: "X".into(),
                outcome: UnitOutcome::Completed {
                    response: "x".into(),
                    tokens_in: Some(12),
                    tokens_out: Some(1),
                    cost: Some(0.00004),
                    latency_ms: 310,
                    match_result: Some(
                        MatchResult::new(true, MatchMode::Regex).with_detail("Matched: 'x'"),
                    ),
                },
            },
            TestResult::failed(
                1,
                "gpt-4o",
                config.test_cases[1].inputs.clone(),
                "Y",
                "Timeout",
            ),
        ];
        RunReport::new(&config, &["gpt-4o".to_string()], results)
    }

    #[test]
    fn saved_run_reads_back_unchanged() {
        let mut storage = Storage::open_in_memory().unwrap();
        let report = report();

        let record = storage.save_run("prompts/letters.yaml", &report).unwrap();
        assert_eq!(record.config_hash, report.config_hash);

        let loaded = storage.require_run(&record.id).unwrap();
        assert_eq!(loaded.prompt_file, "prompts/letters.yaml");
        assert_eq!(loaded.prompt_name, "letters");
        assert_eq!(loaded.models, vec!["gpt-4o"]);
        assert_eq!(loaded.timestamp.timestamp(), report.generated_at.timestamp());

        let results = storage.get_results(&record.id).unwrap();
        assert_eq!(results, report.results);
    }

    #[test]
    fn unknown_runs_are_reported() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.get_run("nope").unwrap().is_none());
        assert!(matches!(
            storage.require_run("nope"),
            Err(StorageError::RunNotFound(id)) if id == "nope"
        ));
        assert!(storage.get_results("nope").unwrap().is_empty());
    }

    #[test]
    fn history_is_newest_first_and_filterable_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.db");
        let mut storage = Storage::open(&path).unwrap();

        let first = storage.save_run("a.yaml", &report()).unwrap();
        let second = storage.save_run("a.yaml", &report()).unwrap();
        let mut other = report();
        other.config_hash = "deadbeef".into();
        let third = storage.save_run("b.yaml", &other).unwrap();

        let ids: Vec<String> = storage.list_runs(10).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third.id.clone(), second.id.clone(), first.id.clone()]);
        assert_eq!(storage.list_runs(1).unwrap().len(), 1);

        let same: Vec<String> = storage
            .runs_with_hash(&first.config_hash)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(same, vec![second.id, first.id]);

        drop(storage);
        let reopened = Storage::open(&path).unwrap();
        assert_eq!(reopened.list_runs(10).unwrap().len(), 3);
    }

    #[test]
    fn run_ids_carry_the_start_time() {
        let at = DateTime::from_timestamp(1_714_572_153, 0).unwrap();
        let id = new_run_id(at);
        assert!(id.starts_with("20240501-140233-"), "{id}");
        assert_eq!(id.len(), "20240501-140233-".len() + 4);
    }
}
