//! # Data Linter - a batch data-quality gate
//!
//! Data Linter matches files landing in an object store to declared tables,
//! validates every file against the table's metadata and routes it to a pass
//! or fail destination. With `all-must-pass` set, a single failing file sends
//! the whole batch to the fail destination and fails the run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use data_linter::prelude::*;
//!
//! # async fn example() -> data_linter::Result<()> {
//! let ctx = RunContext::from_env();
//! let config = load_and_validate_config(ctx.storage(), "config.yaml").await?;
//!
//! let report = run_validation(&ctx, &config).await?;
//! println!("{} of {} files failed", report.failed, report.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Parallel runs
//!
//! Large batches are split into shards by size and validated by independent
//! workers. Workers communicate only through the staging area under the log
//! base path:
//!
//! ```rust,no_run
//! use data_linter::prelude::*;
//!
//! # async fn example(ctx: RunContext, config: LinterConfig) -> data_linter::Result<()> {
//! let shards = para_run_init(&ctx, &config, 4).await?;
//! for index in 0..shards.len() {
//!     // usually one process per shard
//!     para_run_validation(&ctx, &config, index).await?;
//! }
//! para_collect_all_status(&ctx, &config).await?;
//! para_collect_all_logs(&ctx, &config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`matcher`**: file-to-table matching and its invariants
//! - **`validators`**: the `pandas`, `parquet` and `frictionless` strategies
//! - **`runner`**: validates files and stages one status record per file
//! - **`partitioner`**: largest-first bin packing into work shards
//! - **`aggregator`**: routing, archival and per-table logs
//! - **`orchestrator`**: inline and parallel entry points
//! - **`storage`**: object store and local filesystem access
//! - **`summary`**: reports over the per-table logs

pub mod aggregator;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod metadata;
pub mod orchestrator;
pub mod partitioner;
pub mod prelude;
pub mod reader;
pub mod runner;
pub mod staging;
pub mod storage;
pub mod summary;
pub mod validators;

pub use error::{LinterError, Result};
