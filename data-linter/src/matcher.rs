//! Matches landed files to configured tables.
//!
//! Matching is pure: the same configuration and listing always give the same
//! [`MatchResult`]. Tables are visited in name order and each table's files
//! keep the listing order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::LinterConfig;
use crate::error::{LinterError, Result};
use crate::storage::{basename, Storage};

/// A landed file assigned to a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MatchedFile {
    pub path: String,
    /// Position within the table's match list. Used in archive names.
    pub file_index: usize,
    /// Object size, filled in by the partitioner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Table name to matched files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub tables: BTreeMap<String, Vec<MatchedFile>>,
    /// Unmatched files tolerated as exceptions (or because unknown files are allowed).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched: Vec<String>,
}

impl MatchResult {
    pub fn total_files(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn files(&self, table: &str) -> &[MatchedFile] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.total_files() == 0
    }
}

/// Path relative to the land prefix, without a leading `/`.
pub fn strip_land_prefix<'a>(land_base_path: &str, path: &'a str) -> &'a str {
    let prefix = land_base_path.trim_end_matches('/');
    path.strip_prefix(prefix)
        .unwrap_or(path)
        .trim_start_matches('/')
}

/// Assigns each landed file to a table and enforces the matching invariants.
pub fn match_files(config: &LinterConfig, land_files: &[String]) -> Result<MatchResult> {
    if land_files.is_empty() && config.fail_no_files {
        return Err(LinterError::NoFilesFound {
            land_path: config.land_base_path.clone(),
        });
    }

    let mut result = MatchResult::default();
    for (table_name, table) in &config.tables {
        let pattern = table.compiled_pattern()?;
        let matched: Vec<MatchedFile> = land_files
            .iter()
            .filter(|path| {
                let relative = strip_land_prefix(&config.land_base_path, path);
                match &pattern {
                    Some(regex) => regex.is_match(relative),
                    None => relative.starts_with(table_name.as_str()),
                }
            })
            .enumerate()
            .map(|(file_index, path)| MatchedFile {
                path: path.clone(),
                file_index,
                size: None,
            })
            .collect();

        if matched.is_empty() && table.required {
            return Err(LinterError::MissingRequiredFile {
                table: table_name.clone(),
            });
        }
        result.tables.insert(table_name.clone(), matched);
    }

    let mut owners: BTreeMap<&str, usize> = BTreeMap::new();
    for file in result.tables.values().flatten() {
        *owners.entry(file.path.as_str()).or_default() += 1;
    }
    if owners.values().any(|count| *count > 1) {
        let matches = result
            .tables
            .iter()
            .map(|(table, files)| {
                (
                    table.clone(),
                    files.iter().map(|f| f.path.clone()).collect(),
                )
            })
            .collect();
        return Err(LinterError::DuplicateMatch { matches });
    }

    let unmatched: Vec<String> = land_files
        .iter()
        .filter(|path| !owners.contains_key(path.as_str()))
        .cloned()
        .collect();
    if let Some(policy) = &config.fail_unknown_files {
        let unexpected: Vec<String> = unmatched
            .iter()
            .filter(|path| !policy.is_exception(path))
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(LinterError::UnexpectedFile { files: unexpected });
        }
    }
    result.unmatched = unmatched;

    Ok(result)
}

/// Whether a listed object takes part in matching.
///
/// Hidden files (basename starting with `.`), zero-byte objects and directory
/// markers (keys ending in `/`) are ignored.
fn is_landed_file(path: &str, size: u64) -> bool {
    size > 0 && !path.ends_with('/') && !basename(path).starts_with('.')
}

/// Lists the landing area and matches it.
///
/// Only objects accepted by [`is_landed_file`] are matched, so an empty file
/// neither satisfies a required table nor fails validation.
#[instrument(skip(storage, config), fields(land = %config.land_base_path))]
pub async fn discover_and_match(storage: &dyn Storage, config: &LinterConfig) -> Result<MatchResult> {
    let mut land_files = Vec::new();
    for (path, size) in storage.list_sized(&config.land_base_path).await? {
        if is_landed_file(&path, size) {
            land_files.push(path);
        } else {
            debug!(path = %path, size, "Skipping hidden, empty or directory object");
        }
    }
    info!(count = land_files.len(), "Found files in land");

    let result = match_files(config, &land_files)?;
    for (table, files) in &result.tables {
        if files.is_empty() {
            info!(table = %table, "No files matched, skipping table");
        } else {
            info!(table = %table, files = files.len(), "Matched files");
        }
    }
    if !result.unmatched.is_empty() {
        warn!(files = ?result.unmatched, "Files in land matched no table");
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TableConfig, UnknownFilesPolicy};
    use proptest::prelude::*;

    fn config(tables: &[(&str, Option<&str>, bool)]) -> LinterConfig {
        LinterConfig {
            land_base_path: "s3://land/".to_string(),
            pass_base_path: "s3://pass/".to_string(),
            log_base_path: "s3://log/".to_string(),
            fail_base_path: Some("s3://fail/".to_string()),
            compress_data: false,
            remove_tables_on_pass: false,
            all_must_pass: false,
            fail_no_files: false,
            fail_unknown_files: None,
            timestamp_partition_name: None,
            validator_engine: Default::default(),
            validator_engine_params: Default::default(),
            tables: tables
                .iter()
                .map(|(name, pattern, required)| {
                    (
                        name.to_string(),
                        TableConfig {
                            pattern: pattern.map(str::to_string),
                            required: *required,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        }
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("s3://land/{n}")).collect()
    }

    #[test]
    fn test_prefix_and_pattern_matching() {
        let config = config(&[("table1", None, true), ("table2", Some(r"^t2_.*\.jsonl$"), false)]);
        let land = files(&["table1_a.csv", "t2_x.jsonl", "table1_b.csv", "t2_y.csv"]);
        let result = match_files(&config, &land).unwrap();

        let table1: Vec<_> = result.files("table1").iter().map(|f| f.path.as_str()).collect();
        assert_eq!(table1, vec!["s3://land/table1_a.csv", "s3://land/table1_b.csv"]);
        assert_eq!(result.files("table1")[1].file_index, 1);
        assert_eq!(result.files("table2").len(), 1);
        assert_eq!(result.unmatched, vec!["s3://land/t2_y.csv"]);
    }

    #[test]
    fn test_land_prefix_without_trailing_slash() {
        let mut config = config(&[("table1", None, true)]);
        config.land_base_path = "s3://land".to_string();
        let result = match_files(&config, &files(&["table1.csv"])).unwrap();
        assert_eq!(result.total_files(), 1);
    }

    #[test]
    fn test_missing_required_table() {
        let config = config(&[("table1", None, true), ("table2", None, true)]);
        let err = match_files(&config, &files(&["table1.csv"])).unwrap_err();
        assert!(matches!(err, LinterError::MissingRequiredFile { table } if table == "table2"));
    }

    #[test]
    fn test_duplicate_match_reports_listing() {
        let config = config(&[("table1", None, false), ("table1_extra", None, false)]);
        let err = match_files(&config, &files(&["table1_extra.csv"])).unwrap_err();
        match err {
            LinterError::DuplicateMatch { matches } => {
                assert_eq!(matches["table1"], vec!["s3://land/table1_extra.csv"]);
                assert_eq!(matches["table1_extra"], vec!["s3://land/table1_extra.csv"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_files_with_exceptions() {
        let mut config = config(&[("table1", None, false)]);
        config.fail_unknown_files = Some(UnknownFilesPolicy {
            exceptions: vec!["s3://land/README.md".to_string()],
        });
        let ok = match_files(&config, &files(&["table1.csv", "README.md"])).unwrap();
        assert_eq!(ok.unmatched, vec!["s3://land/README.md"]);

        let err = match_files(&config, &files(&["table1.csv", "other.csv"])).unwrap_err();
        assert!(matches!(err, LinterError::UnexpectedFile { files } if files == vec!["s3://land/other.csv"]));
    }

    #[test]
    fn test_no_files() {
        let mut config = config(&[("table1", None, false)]);
        assert!(match_files(&config, &[]).unwrap().is_empty());
        config.fail_no_files = true;
        assert!(matches!(
            match_files(&config, &[]),
            Err(LinterError::NoFilesFound { .. })
        ));
    }

    #[test]
    fn test_empty_hidden_and_directory_objects_skipped() {
        assert!(is_landed_file("s3://land/table1.csv", 12));
        assert!(!is_landed_file("s3://land/table1.csv", 0));
        assert!(!is_landed_file("s3://land/.keep", 4));
        assert!(!is_landed_file("s3://land/table1/", 0));
        assert!(!is_landed_file("s3://land/table1/", 3));
    }

    proptest! {
        #[test]
        fn prop_matching_is_deterministic_and_disjoint(
            names in proptest::collection::vec("(table[1-3]|misc)_[a-z]{1,4}\\.csv", 0..20)
        ) {
            let mut land: Vec<String> = names.iter().map(|n| format!("s3://land/{n}")).collect();
            land.sort();
            land.dedup();
            let config = config(&[("table1", None, false), ("table2", None, false), ("table3", Some("table3_"), false)]);

            let first = match_files(&config, &land).unwrap();
            let second = match_files(&config, &land).unwrap();
            prop_assert_eq!(&first, &second);

            let mut all: Vec<&str> = first.tables.values().flatten().map(|f| f.path.as_str()).collect();
            let matched = all.len();
            all.sort();
            all.dedup();
            prop_assert_eq!(all.len(), matched);
            prop_assert_eq!(matched + first.unmatched.len(), land.len());
        }

        #[test]
        fn prop_overlapping_tables_always_raise(suffix in "[a-z]{1,6}") {
            let config = config(&[("table", None, false), ("table_", None, false)]);
            let land = vec![format!("s3://land/table_{suffix}.csv")];
            let is_duplicate = matches!(
                match_files(&config, &land),
                Err(LinterError::DuplicateMatch { .. })
            );
            prop_assert!(is_duplicate);
        }
    }
}
