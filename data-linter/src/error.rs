//! Error types for the data linter.
//!
//! Every fallible operation in the crate returns [`LinterError`]. Per-file
//! validation faults are the one exception to propagation: the runner turns
//! them into failing status records instead of returning them.

use std::collections::BTreeMap;

use thiserror::Error;

/// The main error type for the data linter.
#[derive(Error, Debug)]
pub enum LinterError {
    /// The run configuration is malformed or internally inconsistent.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A table marked `required` matched no landed file.
    #[error("Table '{table}' is required but no matching files were found in land")]
    MissingRequiredFile {
        /// Name of the required table
        table: String,
    },

    /// At least one landed file matched more than one table.
    #[error("Files matched more than one table: {}", format_duplicates(.matches))]
    DuplicateMatch {
        /// Full table -> matched files listing at the time of detection
        matches: BTreeMap<String, Vec<String>>,
    },

    /// Landed files matched no table and are not listed as exceptions.
    #[error("Files in land matched no table: {}", .files.join(", "))]
    UnexpectedFile {
        /// Unmatched paths
        files: Vec<String>,
    },

    /// The landing area was empty and `fail-no-files` is set.
    #[error("No files found in land path '{land_path}'")]
    NoFilesFound {
        /// The landing prefix that was listed
        land_path: String,
    },

    /// Reading or validating a single file failed unexpectedly.
    #[error("Validation of '{path}' failed unexpectedly: {message}")]
    FileValidationFault {
        /// Landed file path
        path: String,
        /// Rendered cause
        message: String,
        /// Underlying error, when there is one
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The run finished and `all-must-pass` was violated.
    #[error("{failed} of {total} files failed validation and all-must-pass is set")]
    LinterFailed {
        /// Number of failing files
        failed: usize,
        /// Number of validated files
        total: usize,
    },

    /// Parallel mode was requested against a local land path.
    #[error("Parallel mode requires remote object storage; land path '{land_path}' is local")]
    UnsupportedLocalParallelism {
        /// The offending land path
        land_path: String,
    },

    /// Error from the object store backend.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        /// Location the operation was addressed to
        path: String,
        /// Backend error
        #[source]
        source: object_store::Error,
    },

    /// The table metadata could not be loaded or is unusable.
    #[error("Metadata error for table '{table}': {message}")]
    Metadata {
        /// Table the metadata belongs to
        table: String,
        /// Detailed error message
        message: String,
    },

    /// Error when decoding file contents.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A type alias for `Result<T, LinterError>`.
pub type Result<T> = std::result::Result<T, LinterError>;

fn format_duplicates(matches: &BTreeMap<String, Vec<String>>) -> String {
    matches
        .iter()
        .map(|(table, files)| format!("{table}: [{}]", files.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

impl LinterError {
    /// Creates a storage error for the given location.
    pub fn storage(path: impl Into<String>, source: object_store::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Creates a metadata error.
    pub fn metadata(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Metadata {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Wraps an arbitrary error as a per-file validation fault.
    pub fn file_fault(
        path: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::FileValidationFault {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Renders the error and its source chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

impl From<serde_json::Error> for LinterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for LinterError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for LinterError {
    fn from(err: csv::Error) -> Self {
        Self::Parse(format!("csv: {err}"))
    }
}

impl From<arrow::error::ArrowError> for LinterError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Parse(format!("arrow: {err}"))
    }
}

impl From<parquet::errors::ParquetError> for LinterError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Self::Parse(format!("parquet: {err}"))
    }
}
