//! Summaries over the per-table logs written by the aggregator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::runner::StatusRecord;
use crate::storage::{basename, join, read_json, Storage};
use crate::validators::TestResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableSummary {
    pub table: String,
    pub total: usize,
    pub failed: usize,
    pub failure_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FailedFile {
    pub table: String,
    pub original_path: String,
    pub archived_path: Option<String>,
}

/// Pass/fail counts across every logged file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LintSummary {
    pub valid: bool,
    pub total: usize,
    pub failed: usize,
    pub failure_percentage: f64,
    pub tables: Vec<TableSummary>,
    pub failed_files: Vec<FailedFile>,
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl LintSummary {
    pub fn from_records(records: &[StatusRecord]) -> Self {
        let mut per_table: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let mut failed_files = Vec::new();
        for record in records {
            let counts = per_table.entry(record.table_name.as_str()).or_default();
            counts.0 += 1;
            if !record.valid {
                counts.1 += 1;
                failed_files.push(FailedFile {
                    table: record.table_name.clone(),
                    original_path: record.original_path.clone(),
                    archived_path: record.archived_path.clone(),
                });
            }
        }

        let tables = per_table
            .into_iter()
            .map(|(table, (total, failed))| TableSummary {
                table: table.to_string(),
                total,
                failed,
                failure_percentage: percentage(failed, total),
            })
            .collect();
        let failed = failed_files.len();

        Self {
            valid: failed == 0,
            total: records.len(),
            failed,
            failure_percentage: percentage(failed, records.len()),
            tables,
            failed_files,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_markdown(&self) -> String {
        self.to_string()
    }
}

/// Renders the summary as Markdown.
impl fmt::Display for LintSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.valid { "PASSED" } else { "FAILED" };
        writeln!(f, "# Data linter summary: {verdict}\n")?;
        writeln!(
            f,
            "{} of {} files failed ({:.1}%)\n",
            self.failed, self.total, self.failure_percentage
        )?;

        writeln!(f, "| table | files | failed | failed % |")?;
        writeln!(f, "|---|---|---|---|")?;
        for table in &self.tables {
            writeln!(
                f,
                "| {} | {} | {} | {:.1} |",
                table.table, table.total, table.failed, table.failure_percentage
            )?;
        }

        if !self.failed_files.is_empty() {
            writeln!(f, "\n## Failed files\n")?;
            for file in &self.failed_files {
                let archived = file.archived_path.as_deref().unwrap_or("not archived");
                writeln!(f, "- `{}` ({}) -> `{}`", file.original_path, file.table, archived)?;
            }
        }
        Ok(())
    }
}

/// A failing table or column test from one logged run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestFailure {
    /// `None` for table-level tests.
    pub column: Option<String>,
    pub test: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub test_inputs: Value,
    pub percentage_of_column_is_error: Option<f64>,
    pub traceback: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl TestFailure {
    fn new(column: Option<&str>, test: &str, result: &TestResult) -> Self {
        Self {
            column: column.map(str::to_string),
            test: test.to_string(),
            test_inputs: result.test_inputs.clone(),
            percentage_of_column_is_error: result.percentage_of_column_is_error,
            traceback: result.traceback.clone(),
            details: result.details.clone(),
        }
    }
}

/// One logged run of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileRun {
    pub log_path: String,
    /// Run timestamp taken from the log name.
    pub timestamp: Option<i64>,
    pub table: String,
    pub valid: bool,
    pub archived_path: Option<String>,
    pub failures: Vec<TestFailure>,
}

impl FileRun {
    fn from_record(log_path: String, record: &StatusRecord) -> Self {
        let response = &record.response;
        let mut failures: Vec<TestFailure> = response
            .table_tests
            .iter()
            .filter(|(_, test)| !test.valid)
            .map(|(name, test)| TestFailure::new(None, name, test))
            .collect();
        for (column, outcome) in &response.columns {
            failures.extend(
                outcome
                    .tests
                    .iter()
                    .filter(|(_, test)| !test.valid)
                    .map(|(name, test)| TestFailure::new(Some(column.as_str()), name, test)),
            );
        }

        Self {
            timestamp: log_timestamp(&log_path),
            log_path,
            table: record.table_name.clone(),
            valid: record.valid,
            archived_path: record.archived_path.clone(),
            failures,
        }
    }
}

/// Every logged run of one landed file, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileErrors {
    pub original_path: String,
    pub runs: Vec<FileRun>,
}

impl FileErrors {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_markdown(&self) -> String {
        self.to_string()
    }
}

/// Escapes text for a Markdown table cell.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', "<br>")
}

impl fmt::Display for FileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Errors for `{}`\n", self.original_path)?;
        if self.runs.is_empty() {
            return writeln!(f, "No logs found for this file.");
        }
        if self.runs.len() > 1 {
            writeln!(f, "{} logged runs, most recent first.\n", self.runs.len())?;
        }

        for run in &self.runs {
            let verdict = if run.valid { "PASSED" } else { "FAILED" };
            let timestamp = run
                .timestamp
                .map_or_else(|| "unknown".to_string(), |ts| ts.to_string());
            writeln!(f, "## Run {timestamp} ({}): {verdict}\n", run.table)?;
            let archived = run.archived_path.as_deref().unwrap_or("not archived");
            writeln!(f, "Archived to `{archived}`\n")?;
            if run.failures.is_empty() {
                writeln!(f, "No failing tests.\n")?;
                continue;
            }

            writeln!(f, "| column | test | inputs | failed % | traceback/details |")?;
            writeln!(f, "|---|---|---|---|---|")?;
            for failure in &run.failures {
                let percentage = failure
                    .percentage_of_column_is_error
                    .map_or_else(|| "n/a".to_string(), |p| format!("{p:.1}"));
                let explanation = match (&failure.traceback, &failure.details) {
                    (Some(traceback), _) => traceback.clone(),
                    (None, Value::Null) => "n/a".to_string(),
                    (None, details) => details.to_string(),
                };
                let inputs = if failure.test_inputs.is_null() {
                    "n/a".to_string()
                } else {
                    failure.test_inputs.to_string()
                };
                writeln!(
                    f,
                    "| {} | {} | {} | {percentage} | {} |",
                    failure.column.as_deref().unwrap_or("(table)"),
                    failure.test,
                    cell(&inputs),
                    cell(&explanation)
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Run timestamp of a per-file log named `log-<table>-<index>-<ts>.json`.
fn log_timestamp(log_path: &str) -> Option<i64> {
    basename(log_path)
        .strip_suffix(".json")?
        .rsplit_once('-')?
        .1
        .parse()
        .ok()
}

async fn load_logs(storage: &dyn Storage, prefix: &str) -> Result<Vec<(String, StatusRecord)>> {
    let mut logs = Vec::new();
    for path in storage.list(prefix).await? {
        if path.ends_with(".json") {
            let record = read_json(storage, &path).await?;
            logs.push((path, record));
        }
    }
    debug!(prefix = %prefix, records = logs.len(), "Loaded table logs");
    Ok(logs)
}

/// Reads every per-table log under `<log-base>/tables/`, optionally for one table.
pub async fn load_table_logs(
    storage: &dyn Storage,
    log_base_path: &str,
    table: Option<&str>,
) -> Result<Vec<StatusRecord>> {
    let prefix = match table {
        Some(table) => join(log_base_path, &format!("tables/{table}")),
        None => join(log_base_path, "tables"),
    };
    let logs = load_logs(storage, &prefix).await?;
    Ok(logs.into_iter().map(|(_, record)| record).collect())
}

pub async fn summarize(
    storage: &dyn Storage,
    log_base_path: &str,
    table: Option<&str>,
) -> Result<LintSummary> {
    let records = load_table_logs(storage, log_base_path, table).await?;
    Ok(LintSummary::from_records(&records))
}

/// Collects the failing tests of every logged run of `original_path`.
pub async fn errors_for_file(
    storage: &dyn Storage,
    log_base_path: &str,
    original_path: &str,
) -> Result<FileErrors> {
    let logs = load_logs(storage, &join(log_base_path, "tables")).await?;
    let mut runs: Vec<FileRun> = logs
        .into_iter()
        .filter(|(_, record)| record.original_path == original_path)
        .map(|(log_path, record)| FileRun::from_record(log_path, &record))
        .collect();
    runs.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.log_path.cmp(&b.log_path))
    });
    if runs.len() > 1 {
        debug!(path = %original_path, runs = runs.len(), "File logged by more than one run");
    }

    Ok(FileErrors {
        original_path: original_path.to_string(),
        runs,
    })
}
