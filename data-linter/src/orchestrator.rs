//! Entry points for inline and parallel runs.
//!
//! Inline: match, validate every file, aggregate, upload the run log.
//!
//! Parallel, driven by an external scheduler:
//!
//! 1. [`para_run_init`] once: match, bin-pack, stage shards.
//! 2. [`para_run_validation`] once per shard index, on any machine.
//! 3. [`para_collect_all_status`] once, after every shard has finished.
//! 4. [`para_collect_all_logs`] once, to merge the captured worker logs.
//!
//! Nothing here waits for the shards to finish. Collecting status early
//! under-counts silently.

use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::{aggregate, AggregateReport};
use crate::config::LinterConfig;
use crate::context::RunContext;
use crate::error::Result;
use crate::matcher::discover_and_match;
use crate::partitioner::{partition, WorkShard};
use crate::runner::{Runner, StatusRecord};
use crate::staging::{main_log_path, Staging};

/// Runs the whole pipeline in this process.
///
/// The captured run log is uploaded to
/// `<log-base>/data-linter-main-logs/data-linter-<ts>.log` whether or not the
/// run succeeds.
pub async fn run_validation(ctx: &RunContext, config: &LinterConfig) -> Result<AggregateReport> {
    let result = run_inline(ctx, config).await;
    if let Err(e) = &result {
        error!(error = %e.chain(), "Data linter run failed");
    }

    let log_path = main_log_path(&config.log_base_path, ctx.timestamp);
    match ctx
        .storage()
        .write_text(&log_path, ctx.log.contents())
        .await
    {
        Ok(()) => debug!(path = %log_path, "Uploaded run log"),
        Err(e) if result.is_err() => warn!(error = %e, "Could not upload run log"),
        Err(e) => return Err(e),
    }
    result
}

#[instrument(skip_all, fields(land = %config.land_base_path))]
async fn run_inline(ctx: &RunContext, config: &LinterConfig) -> Result<AggregateReport> {
    info!(engine = %config.validator_engine, "Starting data linter");
    let staging = Staging::new(ctx.storage(), &config.log_base_path);
    staging.statuses().clear().await?;

    let matched = discover_and_match(ctx.storage(), config).await?;
    let records = Runner::new(ctx, config).run_tables(&matched.tables).await?;
    info!(files = records.len(), "Validated files");

    aggregate(ctx, config, true).await
}

/// Logs a step's error and stages its captured log before returning the result.
///
/// The run log is drained, so steps sharing one [`RunContext`] each stage only
/// their own lines.
async fn finish_step<T>(
    ctx: &RunContext,
    config: &LinterConfig,
    step: &str,
    result: Result<T>,
) -> Result<T> {
    if let Err(e) = &result {
        error!(step, error = %e.chain(), "Step failed");
    }
    let staging = Staging::new(ctx.storage(), &config.log_base_path);
    let text = ctx.log.take();
    match staging.write_log_fragment(step, text.clone()).await {
        Ok(location) => debug!(step, location = %location, "Staged step log"),
        Err(e) => {
            // keep the lines for the next step or the final upload
            ctx.log.append(&text);
            if result.is_err() {
                warn!(step, error = %e, "Could not stage step log");
            } else {
                return Err(e);
            }
        }
    }
    result
}

/// Matches files and stages `workers` balanced shards.
///
/// Clears the whole staging area first. Fails for a local land path.
pub async fn para_run_init(
    ctx: &RunContext,
    config: &LinterConfig,
    workers: usize,
) -> Result<Vec<WorkShard>> {
    let result = init_shards(ctx, config, workers).await;
    finish_step(ctx, config, "init", result).await
}

/// Validates the files of shard `shard_index`.
///
/// A shard index with no staged shard (more workers than files) does nothing.
pub async fn para_run_validation(
    ctx: &RunContext,
    config: &LinterConfig,
    shard_index: usize,
) -> Result<Vec<StatusRecord>> {
    let result = validate_shard(ctx, config, shard_index).await;
    finish_step(ctx, config, &format!("validate-shard-{shard_index}"), result).await
}

async fn init_shards(
    ctx: &RunContext,
    config: &LinterConfig,
    workers: usize,
) -> Result<Vec<WorkShard>> {
    Staging::new(ctx.storage(), &config.log_base_path)
        .clear_all()
        .await?;
    let matched = discover_and_match(ctx.storage(), config).await?;
    let shards = partition(ctx, config, &matched, workers).await?;
    info!(workers, shards = shards.len(), "Initialised parallel run");
    Ok(shards)
}

async fn validate_shard(
    ctx: &RunContext,
    config: &LinterConfig,
    shard_index: usize,
) -> Result<Vec<StatusRecord>> {
    let staging = Staging::new(ctx.storage(), &config.log_base_path);
    let Some(shard) = staging.read_shard(shard_index).await? else {
        info!(shard = shard_index, "No work shard staged, nothing to validate");
        return Ok(Vec::new());
    };
    info!(shard = shard_index, files = shard.file_count(), "Validating shard");
    Runner::new(ctx, &shard.config).run_tables(&shard.tables).await
}

/// Aggregates every staged status record. Shards are kept.
pub async fn para_collect_all_status(
    ctx: &RunContext,
    config: &LinterConfig,
) -> Result<AggregateReport> {
    let result = aggregate(ctx, config, false).await;
    finish_step(ctx, config, "collect-status", result).await
}

/// Merges every staged step log into the run log. Returns its location.
pub async fn para_collect_all_logs(ctx: &RunContext, config: &LinterConfig) -> Result<String> {
    let staging = Staging::new(ctx.storage(), &config.log_base_path);
    let fragments = staging.read_log_fragments().await?;
    info!(fragments = fragments.len(), "Merging step logs");

    let mut merged = String::new();
    for (_, text) in &fragments {
        merged.push_str(text);
        if !text.is_empty() && !text.ends_with('\n') {
            merged.push('\n');
        }
    }
    merged.push_str(&ctx.log.take());

    let log_path = main_log_path(&config.log_base_path, ctx.timestamp);
    ctx.storage().write_text(&log_path, merged).await?;
    staging.clear_logs().await?;
    Ok(log_path)
}
