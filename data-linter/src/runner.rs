//! Validates matched files and stages one status record per file.
//!
//! A single bad file never aborts a shard: read errors, metadata errors and
//! validator panics all become failing records with the error chain attached.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{LinterConfig, TableConfig};
use crate::context::RunContext;
use crate::error::{LinterError, Result};
use crate::matcher::MatchedFile;
use crate::metadata::{load_metadata, TableMetadata};
use crate::staging::Staging;
use crate::validators::{TableValidator, ValidationInput, ValidationResult, Validator};

/// Durable outcome of validating one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusRecord {
    pub valid: bool,
    pub response: ValidationResult,
    pub original_path: String,
    pub table_name: String,
    #[serde(default)]
    pub file_index: usize,
    /// Set by the aggregator once the file has been archived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_path: Option<String>,
}

impl StatusRecord {
    pub fn new(response: ValidationResult, file_index: usize) -> Self {
        Self {
            valid: response.valid,
            original_path: response.original_path.clone(),
            table_name: response.table_name.clone(),
            response,
            file_index,
            archived_path: None,
        }
    }
}

/// Validates files of one configuration with one strategy.
#[derive(Debug)]
pub struct Runner<'a> {
    ctx: &'a RunContext,
    config: &'a LinterConfig,
    validator: Validator,
}

impl<'a> Runner<'a> {
    pub fn new(ctx: &'a RunContext, config: &'a LinterConfig) -> Self {
        Self {
            ctx,
            config,
            validator: Validator::from_engine(
                config.validator_engine,
                &config.validator_engine_params,
            ),
        }
    }

    fn staging(&self) -> Staging<'_> {
        Staging::new(self.ctx.storage(), &self.config.log_base_path)
    }

    /// Validates every file of every table, in table then file order.
    ///
    /// Only staging write failures are returned as errors.
    pub async fn run_tables(
        &self,
        tables: &BTreeMap<String, Vec<MatchedFile>>,
    ) -> Result<Vec<StatusRecord>> {
        let mut records = Vec::new();
        for (table_name, files) in tables {
            if files.is_empty() {
                continue;
            }
            let Some(table) = self.config.tables.get(table_name) else {
                warn!(table = %table_name, "Table is not configured, skipping its files");
                continue;
            };
            let metadata = load_metadata(
                self.ctx.storage(),
                table_name,
                &table.metadata_path(table_name),
            )
            .await
            .map(Arc::new);
            if let Err(e) = &metadata {
                warn!(table = %table_name, error = %e, "Could not load metadata");
            }
            for file in files {
                records.push(self.run_file(table_name, table, &metadata, file).await?);
            }
        }
        Ok(records)
    }

    /// Validates one file and stages its record before returning it.
    #[instrument(skip(self, table, metadata, file), fields(path = %file.path))]
    pub async fn run_file(
        &self,
        table_name: &str,
        table: &TableConfig,
        metadata: &Result<Arc<TableMetadata>>,
        file: &MatchedFile,
    ) -> Result<StatusRecord> {
        let response = match metadata {
            Ok(metadata) => self.validate_file(table_name, table, metadata, file).await,
            Err(e) => {
                let fault = LinterError::FileValidationFault {
                    path: file.path.clone(),
                    message: e.chain(),
                    source: None,
                };
                ValidationResult::fault(table_name, &file.path, &fault)
            }
        };

        if response.valid {
            info!(table = %table_name, path = %file.path, "passed");
        } else {
            warn!(table = %table_name, path = %file.path, "failed");
            for line in self.validator.explain_failures(&response) {
                debug!(table = %table_name, path = %file.path, "{line}");
            }
        }

        let record = StatusRecord::new(response, file.file_index);
        self.staging().write_status(&record).await?;
        Ok(record)
    }

    async fn validate_file(
        &self,
        table_name: &str,
        table: &TableConfig,
        metadata: &Arc<TableMetadata>,
        file: &MatchedFile,
    ) -> ValidationResult {
        let data = match self.ctx.storage().read_all(&file.path).await {
            Ok(data) => data,
            Err(e) => {
                let fault = LinterError::file_fault(&file.path, Box::new(e));
                return ValidationResult::fault(table_name, &file.path, &fault);
            }
        };

        let input = ValidationInput {
            table_name: table_name.to_string(),
            path: file.path.clone(),
            table_config: table.clone(),
            metadata: Arc::clone(metadata),
            data,
        };
        let validator = self.validator.clone();
        // decoding is CPU bound; a panic surfaces as a JoinError
        match tokio::task::spawn_blocking(move || validator.validate(&input)).await {
            Ok(result) => result,
            Err(join_error) => {
                let fault = LinterError::file_fault(&file.path, Box::new(join_error));
                ValidationResult::fault(table_name, &file.path, &fault)
            }
        }
    }
}
