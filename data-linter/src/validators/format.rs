//! Row-wise format checks producing a per-cell error list.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde::Serialize;
use serde_json::json;

use super::column_tests::valid_date;
use super::{check_headers, TableValidator, TestResult, ValidationInput, ValidationResult};
use super::{HEADER_TEST, MAX_UNEXPECTED_SAMPLES};
use crate::config::EngineParams;
use crate::error::Result;
use crate::metadata::{ColumnSpec, TypeCategory};
use crate::reader::{read_table, Column, ReadOptions};

pub const FORMAT_TEST: &str = "format-check";

/// One failing cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FormatError {
    /// 1-based row number in the file, counting the header row when present.
    pub row_number: usize,
    pub field_name: String,
    pub code: &'static str,
    pub message: String,
}

/// Checks every cell against its column's type and constraints.
#[derive(Debug, Clone, Default)]
pub struct FormatValidator {
    ignore_missing_cols: bool,
}

impl FormatValidator {
    pub fn new(params: &EngineParams) -> Self {
        Self {
            ignore_missing_cols: params.ignore_missing_cols,
        }
    }
}

struct CellRules<'a> {
    spec: &'a ColumnSpec,
    category: TypeCategory,
    pattern: Option<Regex>,
    members: Option<Vec<String>>,
}

impl<'a> CellRules<'a> {
    fn new(spec: &'a ColumnSpec) -> Self {
        Self {
            spec,
            category: spec.category(),
            // constraints must match the whole value
            pattern: spec
                .pattern
                .as_deref()
                .and_then(|p| Regex::new(&format!("^(?:{p})$")).ok()),
            members: spec.enum_strings(),
        }
    }

    /// Returns the error code and message for a bad cell.
    fn check(&self, value: Option<&str>, column: &Column) -> Option<(&'static str, String)> {
        let spec = self.spec;
        let Some(value) = value else {
            return (!spec.is_nullable())
                .then(|| ("constraint-error", "value is required".to_string()));
        };

        let type_ok = match self.category {
            TypeCategory::Date | TypeCategory::Timestamp if column.is_text() => {
                match &spec.datetime_format {
                    Some(format) => valid_date(value, format, self.category == TypeCategory::Date),
                    None => true,
                }
            }
            _ if column.is_text() => self.category.accepts(value),
            _ => true,
        };
        if !type_ok {
            return Some((
                "type-error",
                format!("'{value}' is not of type {}", spec.data_type),
            ));
        }

        if spec.minimum.is_some() || spec.maximum.is_some() {
            if let Ok(number) = value.trim().parse::<f64>() {
                if spec.minimum.is_some_and(|m| number < m) {
                    return Some(("constraint-error", format!("{value} is below minimum")));
                }
                if spec.maximum.is_some_and(|m| number > m) {
                    return Some(("constraint-error", format!("{value} is above maximum")));
                }
            }
        }

        let length = value.chars().count();
        if spec.min_length.is_some_and(|m| length < m) || spec.max_length.is_some_and(|m| length > m)
        {
            return Some((
                "constraint-error",
                format!("'{value}' has length {length} outside the allowed range"),
            ));
        }

        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(value) {
                return Some((
                    "constraint-error",
                    format!("'{value}' does not match pattern {}", pattern.as_str()),
                ));
            }
        }

        if let Some(members) = &self.members {
            if !members.iter().any(|member| member == value) {
                return Some(("constraint-error", format!("'{value}' is not an allowed value")));
            }
        }

        None
    }
}

impl TableValidator for FormatValidator {
    fn name(&self) -> &'static str {
        "frictionless"
    }

    fn run_checks(&self, input: &ValidationInput) -> Result<ValidationResult> {
        let metadata = input.effective_metadata();
        let options = ReadOptions::from(&input.table_config);
        let table = read_table(input.data.clone(), &metadata, &options)?;
        let header_offset = if options.expect_header { 2 } else { 1 };

        let mut result = ValidationResult::new(&input.table_name, &input.path);
        let expected: Vec<String> = metadata.data_columns().map(|c| c.name.clone()).collect();
        let headers = check_headers(
            &expected,
            &table.column_names(),
            options.headers_ignore_case,
            self.ignore_missing_cols,
        );
        let mut errors: Vec<FormatError> = Vec::new();
        for (code, key) in [("missing-header", "missing"), ("extra-header", "extra")] {
            if let Some(names) = headers.details[key].as_array() {
                for name in names.iter().filter_map(|n| n.as_str()) {
                    if code == "missing-header" && self.ignore_missing_cols {
                        continue;
                    }
                    errors.push(FormatError {
                        row_number: 1,
                        field_name: name.to_string(),
                        code,
                        message: format!("{code} '{name}'"),
                    });
                }
            }
        }
        result.add_table_test(HEADER_TEST, headers);

        let mut failing_rows: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for spec in metadata.data_columns() {
            let Some(column) = table.column(&spec.name) else {
                continue;
            };
            let rules = CellRules::new(spec);
            let mut seen = HashSet::new();
            for (index, value) in column.values.iter().enumerate() {
                let value = value.as_deref();
                let mut failure = rules.check(value, column);
                if failure.is_none() && spec.unique {
                    if let Some(v) = value {
                        if !seen.insert(v) {
                            failure = Some(("constraint-error", format!("'{v}' is not unique")));
                        }
                    }
                }
                if let Some((code, message)) = failure {
                    errors.push(FormatError {
                        row_number: index + header_offset,
                        field_name: spec.name.clone(),
                        code,
                        message,
                    });
                    failing_rows.entry(spec.name.clone()).or_default().push(index);
                }
            }
        }
        errors.sort_by_key(|e| e.row_number);

        for (name, rows) in failing_rows {
            let Some(column) = table.column(&name) else {
                continue;
            };
            let indexes: Vec<usize> = rows.iter().take(MAX_UNEXPECTED_SAMPLES).copied().collect();
            let values = indexes
                .iter()
                .map(|&i| json!(column.values[i]))
                .collect();
            let test = TestResult::failed(json!({"column": name}))
                .with_unexpected(indexes, values, rows.len(), table.row_count);
            result.add_column_test(name, FORMAT_TEST, test);
        }

        let inputs = json!({"row-limit": options.row_limit});
        let details = json!({
            "error-count": errors.len(),
            "errors": errors.iter().take(MAX_UNEXPECTED_SAMPLES).collect::<Vec<_>>(),
        });
        let test = if errors.is_empty() {
            TestResult::passed(inputs)
        } else {
            TestResult::failed(inputs)
        };
        result.add_table_test(FORMAT_TEST, test.with_details(details));

        Ok(result)
    }

    fn explain_failures(&self, result: &ValidationResult) -> Vec<String> {
        let errors = result
            .table_tests
            .get(FORMAT_TEST)
            .and_then(|test| test.details["errors"].as_array().cloned())
            .unwrap_or_default();
        errors
            .iter()
            .filter_map(|error| error["message"].as_str())
            .map(|message| message.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::metadata::TableMetadata;
    use bytes::Bytes;
    use std::sync::Arc;

    fn validate(csv: &'static str) -> ValidationResult {
        let metadata: TableMetadata = serde_json::from_value(json!({
            "name": "t",
            "file_format": "csv",
            "columns": [
                {"name": "id", "type": "int64", "nullable": false, "unique": true},
                {"name": "code", "type": "string", "pattern": "[A-Z]{2}"},
                {"name": "dob", "type": "date64", "datetime_format": "%Y-%m-%d"}
            ]
        }))
        .unwrap();
        let input = ValidationInput {
            table_name: "t".to_string(),
            path: "land/t.csv".to_string(),
            table_config: TableConfig::default(),
            metadata: Arc::new(metadata),
            data: Bytes::from_static(csv.as_bytes()),
        };
        FormatValidator::default().validate(&input)
    }

    #[test]
    fn test_clean_file_passes() {
        let result = validate("id,code,dob\n1,AB,2020-01-01\n2,CD,\n");
        assert!(result.valid, "{result:?}");
        assert_eq!(result.table_tests[FORMAT_TEST].details["error-count"], 0);
    }

    #[test]
    fn test_cell_errors_listed_with_row_numbers() {
        let result = validate("id,code,dob\nx,AB,2020-01-01\n1,ABC,2020-13-01\n1,AB,\n");
        assert!(!result.valid);
        let errors = result.table_tests[FORMAT_TEST].details["errors"]
            .as_array()
            .unwrap()
            .clone();
        let summary: Vec<(u64, &str, &str)> = errors
            .iter()
            .map(|e| {
                (
                    e["row-number"].as_u64().unwrap(),
                    e["field-name"].as_str().unwrap(),
                    e["code"].as_str().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (2, "id", "type-error"),
                (3, "code", "constraint-error"),
                (3, "dob", "type-error"),
                (4, "id", "constraint-error"),
            ]
        );
        assert!(!result.columns["id"].valid);
        assert!(!result.columns["code"].valid);
    }

    #[test]
    fn test_extra_header_is_error() {
        let result = validate("id,code,dob,notes\n1,AB,2020-01-01,x\n");
        assert!(!result.valid);
        let explained = FormatValidator::default().explain_failures(&result);
        assert_eq!(explained, vec!["extra-header 'notes'".to_string()]);
    }
}
