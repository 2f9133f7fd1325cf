//! Run configuration.
//!
//! The configuration is parsed once at the start of a run and never mutated.
//! Matching produces a separate [`MatchResult`](crate::matcher::MatchResult).

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{LinterError, Result};
use crate::storage::Storage;

/// Default metadata location for a table without an explicit `metadata` entry.
pub fn default_metadata_path(table: &str) -> String {
    format!("meta_data/{table}.json")
}

fn default_true() -> bool {
    true
}

/// Top-level run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LinterConfig {
    pub land_base_path: String,
    pub pass_base_path: String,
    pub log_base_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_base_path: Option<String>,
    #[serde(default)]
    pub compress_data: bool,
    #[serde(default)]
    pub remove_tables_on_pass: bool,
    #[serde(default)]
    pub all_must_pass: bool,
    #[serde(default)]
    pub fail_no_files: bool,
    /// When present, unmatched files fail the run unless listed as exceptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_unknown_files: Option<UnknownFilesPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_partition_name: Option<String>,
    #[serde(default)]
    pub validator_engine: ValidatorEngine,
    #[serde(default)]
    pub validator_engine_params: EngineParams,
    pub tables: BTreeMap<String, TableConfig>,
}

/// Exceptions to the unknown-file check. Entries are exact paths or glob patterns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnknownFilesPolicy {
    #[serde(default)]
    pub exceptions: Vec<String>,
}

impl UnknownFilesPolicy {
    /// Returns true if `path` is listed, either verbatim or through a glob.
    pub fn is_exception(&self, path: &str) -> bool {
        self.exceptions.iter().any(|exception| {
            exception == path
                || glob::Pattern::new(exception)
                    .map(|pattern| pattern.matches(path))
                    .unwrap_or(false)
        })
    }
}

/// Which validation strategy to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidatorEngine {
    /// Column-level tests on every value.
    #[default]
    Pandas,
    /// Parquet schema comparison only.
    Parquet,
    /// Row-wise format checks producing a per-cell error list.
    Frictionless,
}

impl std::fmt::Display for ValidatorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pandas => "pandas",
            Self::Parquet => "parquet",
            Self::Frictionless => "frictionless",
        };
        f.write_str(name)
    }
}

/// Options shared by every validator strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineParams {
    /// Missing columns no longer fail the header test. Extra columns still do.
    #[serde(default)]
    pub ignore_missing_cols: bool,
}

/// Per-table configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableConfig {
    /// Regex matched against the landed path with the land prefix stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default = "default_true")]
    pub expect_header: bool,
    #[serde(default)]
    pub headers_ignore_case: bool,
    #[serde(default)]
    pub only_test_cols_in_metadata: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<usize>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            pattern: None,
            required: false,
            metadata: None,
            expect_header: true,
            headers_ignore_case: false,
            only_test_cols_in_metadata: false,
            row_limit: None,
        }
    }
}

impl TableConfig {
    /// Metadata location, falling back to `meta_data/<table>.json`.
    pub fn metadata_path(&self, table: &str) -> String {
        self.metadata
            .clone()
            .unwrap_or_else(|| default_metadata_path(table))
    }

    /// Compiles the table pattern, anchored at the start of the path.
    pub fn compiled_pattern(&self) -> Result<Option<Regex>> {
        self.pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
                    LinterError::ConfigInvalid(format!("invalid pattern '{pattern}': {e}"))
                })
            })
            .transpose()
    }
}

impl LinterConfig {
    /// Parses a YAML document and validates it.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| LinterError::ConfigInvalid(format!("could not parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("land-base-path", &self.land_base_path),
            ("pass-base-path", &self.pass_base_path),
            ("log-base-path", &self.log_base_path),
        ] {
            if value.trim().is_empty() {
                return Err(LinterError::ConfigInvalid(format!("'{key}' must not be empty")));
            }
        }

        if let Some(fail) = &self.fail_base_path {
            if fail.trim_end_matches('/') == self.pass_base_path.trim_end_matches('/') {
                return Err(LinterError::ConfigInvalid(
                    "'fail-base-path' must differ from 'pass-base-path'".to_string(),
                ));
            }
        }

        if self.tables.is_empty() {
            return Err(LinterError::ConfigInvalid(
                "at least one table must be configured".to_string(),
            ));
        }

        for (name, table) in &self.tables {
            if name.trim().is_empty() {
                return Err(LinterError::ConfigInvalid(
                    "table names must not be empty".to_string(),
                ));
            }
            table.compiled_pattern()?;
            if table.row_limit == Some(0) {
                return Err(LinterError::ConfigInvalid(format!(
                    "table '{name}': 'row-limit' must be greater than zero"
                )));
            }
        }

        if let Some(policy) = &self.fail_unknown_files {
            for exception in &policy.exceptions {
                glob::Pattern::new(exception).map_err(|e| {
                    LinterError::ConfigInvalid(format!("invalid exception '{exception}': {e}"))
                })?;
            }
        }

        Ok(())
    }
}

/// Loads the configuration through `storage`.
///
/// A missing `.yaml` file falls back to the same path spelled `.yml`.
#[instrument(skip(storage))]
pub async fn load_and_validate_config(storage: &dyn Storage, path: &str) -> Result<LinterConfig> {
    let path = if storage.exists(path).await? {
        path.to_string()
    } else {
        let alternative = path.replace("yaml", "yml");
        if alternative == path || !storage.exists(&alternative).await? {
            return Err(LinterError::ConfigInvalid(format!(
                "expecting a config file at '{path}'"
            )));
        }
        debug!(path = %alternative, "Falling back to .yml config");
        alternative
    };

    let bytes = storage.read_all(&path).await?;
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|e| LinterError::ConfigInvalid(format!("config is not UTF-8: {e}")))?;
    let config = LinterConfig::from_yaml(&text)?;

    info!(
        path = %path,
        tables = config.tables.len(),
        engine = %config.validator_engine,
        "Loaded config"
    );
    Ok(config)
}
