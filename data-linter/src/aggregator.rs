//! Collects staged status records, routes files and writes per-table logs.
//!
//! Routing depends only on the set of records, never on the order they were
//! staged in. Records are processed in `(table, file-index, path)` order.

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::LinterConfig;
use crate::context::RunContext;
use crate::error::{LinterError, Result};
use crate::runner::StatusRecord;
use crate::staging::Staging;
use crate::storage::{basename, join, write_json};

/// Global outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    AllPassed,
    /// Files are routed on their own verdict.
    SomeFailedButIndependent,
    /// Every file goes to the fail destination and the run fails.
    SomeFailedAllMustPass,
}

impl RunOutcome {
    pub fn decide(failed: usize, all_must_pass: bool) -> Self {
        match (failed, all_must_pass) {
            (0, _) => Self::AllPassed,
            (_, true) => Self::SomeFailedAllMustPass,
            (_, false) => Self::SomeFailedButIndependent,
        }
    }
}

/// Where a file is archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Destination {
    Pass,
    Fail,
    /// Failing file with no fail destination configured.
    Unarchived,
}

/// Routing decision for every record of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivalPlan {
    pub outcome: RunOutcome,
    pub failed: usize,
    pub entries: Vec<(StatusRecord, Destination)>,
}

impl ArchivalPlan {
    pub fn total(&self) -> usize {
        self.entries.len()
    }
}

/// Summary of a finished aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AggregateReport {
    pub outcome: RunOutcome,
    pub total: usize,
    pub failed: usize,
    pub records: Vec<StatusRecord>,
}

/// Deterministic archive location of a landed file.
///
/// `<base>/<table>/[<partition>=<ts>/]<stem>-<index>-<ts>[.<ext>][.gz]`, where
/// stem and extension split the basename at its first `.`. `.gz` is added when
/// compressing a file whose name does not already end in `.gz`.
pub fn archive_path(
    base: &str,
    table: &str,
    original_path: &str,
    file_index: usize,
    timestamp: i64,
    partition_name: Option<&str>,
    compress: bool,
) -> String {
    let name = basename(original_path);
    let (stem, ext) = match name.split_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name, None),
    };

    let mut file_name = format!("{stem}-{file_index}-{timestamp}");
    if let Some(ext) = ext {
        file_name.push('.');
        file_name.push_str(ext);
    }
    if compress && !name.ends_with(".gz") {
        file_name.push_str(".gz");
    }

    let mut relative = format!("{table}/");
    if let Some(partition) = partition_name {
        relative.push_str(&format!("{partition}={timestamp}/"));
    }
    relative.push_str(&file_name);
    join(base, &relative)
}

/// Per-file log location under the log base path.
pub fn table_log_path(log_base_path: &str, table: &str, file_index: usize, timestamp: i64) -> String {
    join(
        log_base_path,
        &format!("tables/{table}/log-{table}-{file_index}-{timestamp}.json"),
    )
}

/// Computes the outcome and every file's destination.
pub fn plan_archival(config: &LinterConfig, mut records: Vec<StatusRecord>) -> ArchivalPlan {
    records.sort_by(|a, b| {
        (&a.table_name, a.file_index, &a.original_path).cmp(&(
            &b.table_name,
            b.file_index,
            &b.original_path,
        ))
    });
    let failed = records.iter().filter(|r| !r.valid).count();
    let outcome = RunOutcome::decide(failed, config.all_must_pass);
    let fail_destination = if config.fail_base_path.is_some() {
        Destination::Fail
    } else {
        Destination::Unarchived
    };

    let entries = records
        .into_iter()
        .map(|record| {
            let destination = match outcome {
                RunOutcome::AllPassed => Destination::Pass,
                RunOutcome::SomeFailedAllMustPass => fail_destination,
                RunOutcome::SomeFailedButIndependent if record.valid => Destination::Pass,
                RunOutcome::SomeFailedButIndependent => fail_destination,
            };
            (record, destination)
        })
        .collect();

    ArchivalPlan {
        outcome,
        failed,
        entries,
    }
}

/// Reads every staged record, archives files and writes their logs.
///
/// Staged records (and shards, when `clear_shards` is set) are removed once
/// every file has been handled. Returns [`LinterError::LinterFailed`] after
/// that when `all-must-pass` was violated.
#[instrument(skip(ctx, config), fields(timestamp = ctx.timestamp))]
pub async fn aggregate(
    ctx: &RunContext,
    config: &LinterConfig,
    clear_shards: bool,
) -> Result<AggregateReport> {
    let storage = ctx.storage();
    let staging = Staging::new(storage, &config.log_base_path);
    let records = staging.statuses().load_all().await?;
    info!(records = records.len(), "Collected status records");

    let plan = plan_archival(config, records);
    let mut archived = Vec::with_capacity(plan.total());
    for (mut record, destination) in plan.entries {
        let base = match destination {
            Destination::Pass => Some(config.pass_base_path.as_str()),
            Destination::Fail => config.fail_base_path.as_deref(),
            Destination::Unarchived => None,
        };

        if let Some(base) = base {
            let target = archive_path(
                base,
                &record.table_name,
                &record.original_path,
                record.file_index,
                ctx.timestamp,
                config.timestamp_partition_name.as_deref(),
                config.compress_data,
            );
            storage
                .archive(&record.original_path, &target, config.compress_data)
                .await?;
            info!(
                table = %record.table_name,
                from = %record.original_path,
                to = %target,
                destination = ?destination,
                "Archived file"
            );
            record.archived_path = Some(target);

            if destination == Destination::Pass && config.remove_tables_on_pass {
                storage.delete(&record.original_path).await?;
                info!(path = %record.original_path, "Removed file from land");
            }
        } else {
            warn!(
                table = %record.table_name,
                path = %record.original_path,
                "Failed file left unarchived, no fail-base-path configured"
            );
        }

        let log_path = table_log_path(
            &config.log_base_path,
            &record.table_name,
            record.file_index,
            ctx.timestamp,
        );
        write_json(storage, &log_path, &record).await?;
        archived.push(record);
    }

    staging.statuses().clear().await?;
    if clear_shards {
        staging.shards().clear().await?;
    }

    let report = AggregateReport {
        outcome: plan.outcome,
        total: archived.len(),
        failed: plan.failed,
        records: archived,
    };
    match report.outcome {
        RunOutcome::AllPassed => info!(total = report.total, "All files passed"),
        RunOutcome::SomeFailedButIndependent => warn!(
            failed = report.failed,
            total = report.total,
            "Some files failed"
        ),
        RunOutcome::SomeFailedAllMustPass => {
            error!(
                failed = report.failed,
                total = report.total,
                "Files failed with all-must-pass set, every file routed to fail"
            );
            return Err(LinterError::LinterFailed {
                failed: report.failed,
                total: report.total,
            });
        }
    }
    Ok(report)
}
