//! Normalized validation result shared by every validator strategy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LinterError;

/// Maximum number of failing values kept per test.
pub const MAX_UNEXPECTED_SAMPLES: usize = 100;

/// Table test recorded when reading or validating a file crashed.
pub const FILE_FAULT_TEST: &str = "file-validation-fault";

/// Table test recorded when a file could not be decoded.
pub const READ_DATA_TEST: &str = "read-data";

/// Outcome of one test, at table or column level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub test_inputs: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected_index_list: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected_list: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_of_column_is_error: Option<f64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl TestResult {
    fn with_validity(valid: bool, test_inputs: Value) -> Self {
        Self {
            valid,
            test_inputs,
            unexpected_index_list: Vec::new(),
            unexpected_list: Vec::new(),
            percentage_of_column_is_error: None,
            details: Value::Null,
            traceback: None,
        }
    }

    pub fn passed(test_inputs: Value) -> Self {
        Self::with_validity(true, test_inputs)
    }

    pub fn failed(test_inputs: Value) -> Self {
        Self::with_validity(false, test_inputs)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// Attaches failing rows. `failing_rows` counts every failure, samples may be capped.
    pub fn with_unexpected(
        mut self,
        indexes: Vec<usize>,
        values: Vec<Value>,
        failing_rows: usize,
        total_rows: usize,
    ) -> Self {
        self.unexpected_index_list = indexes;
        self.unexpected_list = values;
        if total_rows > 0 {
            self.percentage_of_column_is_error =
                Some(failing_rows as f64 / total_rows as f64 * 100.0);
        }
        self
    }
}

/// Tests run against one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnResult {
    pub valid: bool,
    pub tests: BTreeMap<String, TestResult>,
}

impl Default for ColumnResult {
    fn default() -> Self {
        Self {
            valid: true,
            tests: BTreeMap::new(),
        }
    }
}

/// Validation outcome for one file.
///
/// `valid` is the AND of every table test and every column test. It is only
/// updated through [`add_table_test`](Self::add_table_test) and
/// [`add_column_test`](Self::add_column_test).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationResult {
    pub valid: bool,
    pub table_name: String,
    pub original_path: String,
    #[serde(default)]
    pub table_tests: BTreeMap<String, TestResult>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnResult>,
}

impl ValidationResult {
    pub fn new(table_name: impl Into<String>, original_path: impl Into<String>) -> Self {
        Self {
            valid: true,
            table_name: table_name.into(),
            original_path: original_path.into(),
            table_tests: BTreeMap::new(),
            columns: BTreeMap::new(),
        }
    }

    /// Result for a file whose processing crashed before any test could run.
    pub fn fault(
        table_name: impl Into<String>,
        original_path: impl Into<String>,
        error: &LinterError,
    ) -> Self {
        let mut result = Self::new(table_name, original_path);
        result.add_table_test(
            FILE_FAULT_TEST,
            TestResult::failed(Value::Null)
                .with_details(serde_json::json!({ "error": error.to_string() }))
                .with_traceback(error.chain()),
        );
        result
    }

    /// Result for a file that could not be decoded by the validator.
    pub fn unreadable(
        table_name: impl Into<String>,
        original_path: impl Into<String>,
        error: &LinterError,
    ) -> Self {
        let mut result = Self::new(table_name, original_path);
        result.add_table_test(
            READ_DATA_TEST,
            TestResult::failed(Value::Null)
                .with_details(serde_json::json!({ "error": error.to_string() }))
                .with_traceback(error.chain()),
        );
        result
    }

    pub fn add_table_test(&mut self, name: impl Into<String>, result: TestResult) {
        self.valid &= result.valid;
        self.table_tests.insert(name.into(), result);
    }

    pub fn add_column_test(
        &mut self,
        column: impl Into<String>,
        name: impl Into<String>,
        result: TestResult,
    ) {
        self.valid &= result.valid;
        let entry = self.columns.entry(column.into()).or_default();
        entry.valid &= result.valid;
        entry.tests.insert(name.into(), result);
    }

    pub fn column_test(&self, column: &str, test: &str) -> Option<&TestResult> {
        self.columns.get(column).and_then(|c| c.tests.get(test))
    }

    pub fn failed_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, column)| !column.valid)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn failed_table_tests(&self) -> Vec<&str> {
        self.table_tests
            .iter()
            .filter(|(_, test)| !test.valid)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Recomputes the verdict from the individual tests.
    pub fn is_consistent(&self) -> bool {
        let table_ok = self.table_tests.values().all(|t| t.valid);
        let columns_ok = self.columns.values().all(|column| {
            column.valid == column.tests.values().all(|t| t.valid)
        });
        let all_columns_valid = self.columns.values().all(|column| column.valid);
        columns_ok && self.valid == (table_ok && all_columns_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_is_and_of_all_tests() {
        let mut result = ValidationResult::new("table1", "s3://land/table1_a.csv");
        assert!(result.valid);

        result.add_table_test("header", TestResult::passed(json!({})));
        result.add_column_test("age", "min-max-test", TestResult::passed(json!({})));
        assert!(result.valid);

        result.add_column_test(
            "age",
            "nullable-test",
            TestResult::failed(json!({"column": "age"})),
        );
        assert!(!result.valid);
        assert!(!result.columns["age"].valid);
        assert_eq!(result.failed_columns(), vec!["age"]);
        assert!(result.is_consistent());

        // a later passing test cannot flip the verdict back
        result.add_column_test("name", "pattern-test", TestResult::passed(json!({})));
        assert!(!result.valid);
        assert!(result.columns["name"].valid);
    }

    #[test]
    fn test_fault_result_is_failing_table_test() {
        let err = LinterError::Parse("bad bytes".into());
        let result = ValidationResult::fault("t", "p", &err);
        assert!(!result.valid);
        assert_eq!(result.failed_table_tests(), vec![FILE_FAULT_TEST]);
        let test = &result.table_tests[FILE_FAULT_TEST];
        assert!(test.traceback.as_deref().unwrap().contains("bad bytes"));
    }

    #[test]
    fn test_unexpected_percentage() {
        let test = TestResult::failed(Value::Null).with_unexpected(
            vec![1],
            vec![json!(-5)],
            1,
            4,
        );
        assert_eq!(test.percentage_of_column_is_error, Some(25.0));
        assert_eq!(test.unexpected_list, vec![json!(-5)]);
    }

    #[test]
    fn test_serialized_keys() {
        let mut result = ValidationResult::new("t", "p");
        result.add_column_test(
            "age",
            "min-max-test",
            TestResult::failed(Value::Null).with_unexpected(vec![0], vec![json!(-5)], 1, 1),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["table-name"], "t");
        assert_eq!(value["columns"]["age"]["tests"]["min-max-test"]["unexpected-list"][0], -5);
        let back: ValidationResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }
}
