//! Schema-only validation of Parquet files.

use std::collections::BTreeMap;

use serde_json::json;

use super::{TableValidator, TestResult, ValidationInput, ValidationResult};
use crate::config::EngineParams;
use crate::error::{LinterError, Result};
use crate::metadata::FileFormat;
use crate::reader::read_parquet_schema;

pub const SCHEMA_TEST: &str = "check-schema-conforms";
pub const SCHEMA_TYPE_TEST: &str = "schema-type-matches";

/// Compares the Parquet footer schema with the metadata. Values are not read.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    ignore_missing_cols: bool,
}

impl SchemaValidator {
    pub fn new(params: &EngineParams) -> Self {
        Self {
            ignore_missing_cols: params.ignore_missing_cols,
        }
    }
}

impl TableValidator for SchemaValidator {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn run_checks(&self, input: &ValidationInput) -> Result<ValidationResult> {
        let metadata = input.effective_metadata();
        if metadata.format()? != FileFormat::Parquet {
            return Err(LinterError::Parse(format!(
                "schema validation reads parquet files only, table format is '{}'",
                metadata.file_format
            )));
        }

        let file_schema = read_parquet_schema(input.data.clone())?;
        let meta_schema = metadata.arrow_schema()?;
        let normalize = |name: &str| {
            if input.table_config.headers_ignore_case {
                name.to_lowercase()
            } else {
                name.to_string()
            }
        };

        let file_fields: BTreeMap<String, String> = file_schema
            .fields()
            .iter()
            .map(|f| (normalize(f.name()), f.data_type().to_string()))
            .collect();
        let meta_fields: BTreeMap<String, String> = meta_schema
            .fields()
            .iter()
            .map(|f| (normalize(f.name()), f.data_type().to_string()))
            .collect();

        let missing: Vec<&String> = meta_fields
            .keys()
            .filter(|name| !file_fields.contains_key(*name))
            .collect();
        let extra: Vec<&String> = file_fields
            .keys()
            .filter(|name| !meta_fields.contains_key(*name))
            .collect();
        let different: BTreeMap<&String, (&String, &String)> = meta_fields
            .iter()
            .filter_map(|(name, meta_type)| {
                let file_type = file_fields.get(name)?;
                (file_type != meta_type).then_some((name, (meta_type, file_type)))
            })
            .collect();

        let valid = extra.is_empty()
            && different.is_empty()
            && (self.ignore_missing_cols || missing.is_empty());

        let details = json!({
            "cols-in-meta-not-in-file": missing,
            "cols-in-file-not-in-meta": extra,
            "cols-with-different-types": different
                .iter()
                .map(|(name, (meta_type, file_type))| {
                    (name.to_string(), json!({"meta-field": meta_type, "table-field": file_type}))
                })
                .collect::<serde_json::Map<_, _>>(),
        });
        let inputs = json!({"ignore-missing-cols": self.ignore_missing_cols});

        let mut result = ValidationResult::new(&input.table_name, &input.path);
        let test = if valid {
            TestResult::passed(inputs)
        } else {
            TestResult::failed(inputs)
        };
        result.add_table_test(SCHEMA_TEST, test.with_details(details));

        for (name, meta_type) in &meta_fields {
            if let Some(file_type) = file_fields.get(name) {
                let inputs = json!({"column": name, "expected-type": meta_type});
                let test = if file_type == meta_type {
                    TestResult::passed(inputs)
                } else {
                    TestResult::failed(inputs).with_details(json!({"found-type": file_type}))
                };
                result.add_column_test(name.as_str(), SCHEMA_TYPE_TEST, test);
            }
        }

        Ok(result)
    }
}
