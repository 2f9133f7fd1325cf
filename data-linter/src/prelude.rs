//! Prelude for commonly used types and functions in data-linter.

pub use crate::aggregator::{AggregateReport, RunOutcome};
pub use crate::config::{load_and_validate_config, LinterConfig, TableConfig, ValidatorEngine};
pub use crate::context::RunContext;
pub use crate::error::{LinterError, Result};
pub use crate::logging::{init_logging, LoggingConfig, RunLog};
pub use crate::orchestrator::{
    para_collect_all_logs, para_collect_all_status, para_run_init, para_run_validation,
    run_validation,
};
pub use crate::runner::StatusRecord;
pub use crate::storage::{ObjectStorage, Storage};
pub use crate::summary::{errors_for_file, summarize, FileErrors, LintSummary};
