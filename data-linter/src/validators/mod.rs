//! Pluggable validation strategies.
//!
//! Every strategy implements [`TableValidator`] and produces the same
//! [`ValidationResult`]. The configured strategy is selected through the
//! [`Validator`] tagged union.
//!
//! Strategies never fail for a bad file: a file that cannot be decoded is
//! recorded as a failing `read-data` table test by [`TableValidator::validate`].

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use crate::config::{EngineParams, TableConfig, ValidatorEngine};
use crate::error::Result;
use crate::logging::{truncate_field, MAX_FIELD_LENGTH};
use crate::metadata::TableMetadata;

mod format;
mod result;
mod schema;

pub use column_tests::{
    ColumnTestValidator, DATETIME_FORMAT_TEST, DATE_FORMAT_TEST, ENUM_TEST, MIN_MAX_LENGTH_TEST,
    MIN_MAX_TEST, NULLABLE_TEST, PATTERN_TEST, TYPE_CONVERSION_TEST, UNIQUE_TEST,
};
pub use format::{FormatError, FormatValidator, FORMAT_TEST};
pub use result::{
    ColumnResult, TestResult, ValidationResult, FILE_FAULT_TEST, MAX_UNEXPECTED_SAMPLES,
    READ_DATA_TEST,
};
pub use schema::{SchemaValidator, SCHEMA_TEST, SCHEMA_TYPE_TEST};

/// Table test comparing the file's columns with the metadata.
pub const HEADER_TEST: &str = "validator-table-test-header";

/// Everything a strategy needs to validate one file.
#[derive(Debug, Clone)]
pub struct ValidationInput {
    pub table_name: String,
    pub path: String,
    pub table_config: TableConfig,
    pub metadata: Arc<TableMetadata>,
    pub data: Bytes,
}

impl ValidationInput {
    /// Metadata as the strategy should see it, honouring `headers-ignore-case`.
    pub fn effective_metadata(&self) -> TableMetadata {
        if self.table_config.headers_ignore_case {
            self.metadata.lowercased()
        } else {
            (*self.metadata).clone()
        }
    }
}

/// A validation strategy.
pub trait TableValidator: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Runs the checks. An error means the file could not be read at all.
    fn run_checks(&self, input: &ValidationInput) -> Result<ValidationResult>;

    /// Validates one file, recording decode failures as a failing table test.
    fn validate(&self, input: &ValidationInput) -> ValidationResult {
        match self.run_checks(input) {
            Ok(result) => result,
            Err(e) => ValidationResult::unreadable(&input.table_name, &input.path, &e),
        }
    }

    /// Human readable explanation of every failing test.
    fn explain_failures(&self, result: &ValidationResult) -> Vec<String> {
        let mut lines = Vec::new();
        for (name, test) in result.table_tests.iter().filter(|(_, t)| !t.valid) {
            if test.details.is_null() {
                lines.push(format!("table test '{name}' failed"));
            } else {
                lines.push(format!("table test '{name}' failed: {}", test.details));
            }
        }
        for (column, outcome) in result.columns.iter().filter(|(_, c)| !c.valid) {
            let failed: Vec<&str> = outcome
                .tests
                .iter()
                .filter(|(_, t)| !t.valid)
                .map(|(name, _)| name.as_str())
                .collect();
            lines.push(format!(
                "column '{column}' failed tests: {}",
                failed.join(", ")
            ));
        }
        lines
    }
}

/// The configured strategy.
#[derive(Debug, Clone)]
pub enum Validator {
    ColumnTests(ColumnTestValidator),
    Schema(SchemaValidator),
    Format(FormatValidator),
}

impl Validator {
    pub fn from_engine(engine: ValidatorEngine, params: &EngineParams) -> Self {
        match engine {
            ValidatorEngine::Pandas => Self::ColumnTests(ColumnTestValidator::new(params)),
            ValidatorEngine::Parquet => Self::Schema(SchemaValidator::new(params)),
            ValidatorEngine::Frictionless => Self::Format(FormatValidator::new(params)),
        }
    }

    fn inner(&self) -> &dyn TableValidator {
        match self {
            Self::ColumnTests(v) => v,
            Self::Schema(v) => v,
            Self::Format(v) => v,
        }
    }
}

impl TableValidator for Validator {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn run_checks(&self, input: &ValidationInput) -> Result<ValidationResult> {
        self.inner().run_checks(input)
    }

    /// Explanations with each line cut to [`MAX_FIELD_LENGTH`].
    fn explain_failures(&self, result: &ValidationResult) -> Vec<String> {
        self.inner()
            .explain_failures(result)
            .into_iter()
            .map(|line| truncate_field(&line, MAX_FIELD_LENGTH))
            .collect()
    }
}

/// Compares the file's columns against the expected ones.
///
/// Order does not matter. Missing and extra columns are reported separately;
/// `ignore_missing` only relaxes the missing-column requirement.
pub fn check_headers(
    expected: &[String],
    actual: &[String],
    ignore_case: bool,
    ignore_missing: bool,
) -> TestResult {
    let normalize = |names: &[String]| -> BTreeSet<String> {
        names
            .iter()
            .map(|name| {
                if ignore_case {
                    name.to_lowercase()
                } else {
                    name.clone()
                }
            })
            .collect()
    };
    let expected_set = normalize(expected);
    let actual_set = normalize(actual);

    let missing: Vec<&String> = expected_set.difference(&actual_set).collect();
    let extra: Vec<&String> = actual_set.difference(&expected_set).collect();
    let valid = extra.is_empty() && (ignore_missing || missing.is_empty());

    let inputs = json!({
        "expected-columns": expected,
        "headers-ignore-case": ignore_case,
        "ignore-missing-cols": ignore_missing,
    });
    let details = json!({ "missing": missing, "extra": extra });

    if valid {
        TestResult::passed(inputs).with_details(details)
    } else {
        TestResult::failed(inputs).with_details(details)
    }
}
