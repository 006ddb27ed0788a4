//! JSON and CSV renderings of a saved run.

use std::io::Write;

use serde::Serialize;
use thiserror::Error;

use crate::{result::TestResult, storage::RunRecord};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ExportedRun<'a> {
    run: &'a RunRecord,
    results: &'a [TestResult],
}

/// `{"run": {...}, "results": [...]}`, pretty printed.
pub fn to_json(run: &RunRecord, results: &[TestResult]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&ExportedRun { run, results })?)
}

#[derive(Serialize)]
struct CsvRow<'a> {
    test_case_idx: usize,
    model: &'a str,
    expected: &'a str,
    response: Option<&'a str>,
    matched: Option<bool>,
    tokens_in: Option<u32>,
    tokens_out: Option<u32>,
    cost: Option<f64>,
    latency_ms: Option<u64>,
    error: Option<&'a str>,
    inputs: String,
}

/// One row per result; absent values are left empty.
pub fn write_csv<W: Write>(results: &[TestResult], writer: W) -> Result<(), ExportError> {
    let mut csv = csv::Writer::from_writer(writer);
    for result in results {
        let (tokens_in, tokens_out) = result.tokens();
        csv.serialize(CsvRow {
            test_case_idx: result.test_case_idx,
            model: &result.model,
            expected: &result.expected,
            response: result.response(),
            matched: result.matched(),
            tokens_in,
            tokens_out,
            cost: result.cost(),
            latency_ms: result.latency_ms(),
            error: result.error(),
            inputs: serde_json::to_string(&result.inputs)?,
        })?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::{
        matching::{MatchMode, MatchResult},
        result::UnitOutcome,
    };

    fn results() -> Vec<TestResult> {
        let inputs = json!({"city": "Paris, France"}).as_object().cloned().unwrap();
        vec![
            TestResult {
                test_case_idx: 0,
                model: "gpt-4o".into(),
                inputs: inputs.clone(),
                expected: "Europe".into(),
                outcome: UnitOutcome::Completed {
                    response: "It is in Europe".into(),
                    tokens_in: Some(9),
                    tokens_out: Some(4),
                    cost: Some(0.5),
                    latency_ms: 120,
                    match_result: Some(MatchResult::new(true, MatchMode::Contains)),
                },
            },
            TestResult::failed(1, "gpt-4o", inputs, "Asia", "Timeout"),
        ]
    }

    #[test]
    fn csv_has_header_and_one_row_per_result() {
        let mut buffer = Vec::new();
        write_csv(&results(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "test_case_idx,model,expected,response,matched,tokens_in,tokens_out,cost,latency_ms,error,inputs"
        );
        assert_eq!(
            lines[1],
            r#"0,gpt-4o,Europe,It is in Europe,true,9,4,0.5,120,,"{""city"":""Paris, France""}""#
        );
        assert_eq!(
            lines[2],
            r#"1,gpt-4o,Asia,,,,,,,Timeout,"{""city"":""Paris, France""}""#
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn json_wraps_run_and_results() {
        let run = RunRecord {
            id: "20240501-140233-abcd".into(),
            timestamp: Utc::now(),
            prompt_file: "geo.yaml".into(),
            prompt_name: "geo".into(),
            models: vec!["gpt-4o".into()],
            config_hash: "0123456789abcdef".into(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&to_json(&run, &results()).unwrap()).unwrap();

        assert_eq!(value["run"]["id"], "20240501-140233-abcd");
        assert_eq!(value["run"]["models"], json!(["gpt-4o"]));
        assert_eq!(value["results"].as_array().unwrap().len(), 2);
        assert_eq!(value["results"][1]["status"], "failed");
        assert_eq!(value["results"][1]["error"], "Timeout");
    }
}
