//! Splits matched files into balanced work shards.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::LinterConfig;
use crate::context::RunContext;
use crate::error::{LinterError, Result};
use crate::matcher::{MatchResult, MatchedFile};
use crate::staging::Staging;

/// Size lookups in flight at once while partitioning.
const MAX_CONCURRENT_HEADS: usize = 16;

/// The configuration restricted to one worker's files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkShard {
    pub config: LinterConfig,
    pub tables: BTreeMap<String, Vec<MatchedFile>>,
}

impl WorkShard {
    pub fn file_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.tables
            .values()
            .flatten()
            .map(|f| f.size.unwrap_or(0))
            .sum()
    }
}

/// Largest-first greedy bin packing.
///
/// Files are sorted by size, descending and stable. Bin `i` is filled until its
/// size exceeds `total / workers`; the last bin takes whatever remains. Always
/// returns exactly `workers` bins, trailing ones possibly empty.
pub fn bin_pack(
    files: Vec<(String, MatchedFile)>,
    workers: usize,
) -> Result<Vec<Vec<(String, MatchedFile)>>> {
    if workers == 0 {
        return Err(LinterError::ConfigInvalid(
            "worker count must be at least 1".to_string(),
        ));
    }

    let size = |file: &MatchedFile| u128::from(file.size.unwrap_or(0));
    let total: u128 = files.iter().map(|(_, f)| size(f)).sum();
    let mut sorted = files;
    sorted.sort_by(|(_, a), (_, b)| size(b).cmp(&size(a)));

    let mut bins: Vec<Vec<(String, MatchedFile)>> = vec![Vec::new(); workers];
    let mut current = 0;
    let mut accumulated: u128 = 0;
    for (table, file) in sorted {
        accumulated += size(&file);
        bins[current].push((table, file));
        // compare acc > total / workers without integer division
        if current + 1 < workers && accumulated * workers as u128 > total {
            current += 1;
            accumulated = 0;
        }
    }
    Ok(bins)
}

/// Fetches sizes, packs files into `workers` shards and stages the non-empty ones.
///
/// Stale shards from a previous run are removed first.
#[instrument(skip(ctx, config, matched))]
pub async fn partition(
    ctx: &RunContext,
    config: &LinterConfig,
    matched: &MatchResult,
    workers: usize,
) -> Result<Vec<WorkShard>> {
    if !ctx.storage().is_remote(&config.land_base_path) {
        return Err(LinterError::UnsupportedLocalParallelism {
            land_path: config.land_base_path.clone(),
        });
    }

    let storage = ctx.storage();
    let files: Vec<(String, MatchedFile)> = stream::iter(
        matched
            .tables
            .iter()
            .flat_map(|(table, files)| files.iter().map(move |file| (table, file))),
    )
    .map(|(table, file)| async move {
        let size = storage.head_size(&file.path).await?;
        Ok::<_, LinterError>((
            table.clone(),
            MatchedFile {
                size: Some(size),
                ..file.clone()
            },
        ))
    })
    .buffered(MAX_CONCURRENT_HEADS)
    .try_collect()
    .await?;
    debug!(files = files.len(), "Fetched file sizes");

    let bins = bin_pack(files, workers)?;
    let staging = Staging::new(ctx.storage(), &config.log_base_path);
    let removed = staging.shards().clear().await?;
    if removed > 0 {
        debug!(removed, "Cleared stale shards");
    }

    let mut shards = Vec::new();
    for (index, bin) in bins.into_iter().enumerate().filter(|(_, b)| !b.is_empty()) {
        let mut tables: BTreeMap<String, Vec<MatchedFile>> = BTreeMap::new();
        for (table, file) in bin {
            tables.entry(table).or_default().push(file);
        }
        for files in tables.values_mut() {
            files.sort_by_key(|f| f.file_index);
        }
        let shard = WorkShard {
            config: config.clone(),
            tables,
        };
        staging.write_shard(index, &shard).await?;
        info!(
            shard = index,
            files = shard.file_count(),
            bytes = shard.total_size(),
            "Wrote work shard"
        );
        shards.push(shard);
    }
    Ok(shards)
}
