//! Table metadata: the column-level contract a table's files must satisfy.

use std::str::FromStr;

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{LinterError, Result};
use crate::storage::Storage;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// On-disk file format of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    JsonLines,
    Parquet,
}

impl FromStr for FileFormat {
    type Err = LinterError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.to_lowercase();
        if value.contains("csv") {
            Ok(Self::Csv)
        } else if value.contains("json") {
            Ok(Self::JsonLines)
        } else if value.contains("parquet") {
            Ok(Self::Parquet)
        } else {
            Err(LinterError::Parse(format!("unknown file_format '{value}'")))
        }
    }
}

/// Broad type family of a column, used to pick tests and conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    String,
    Date,
    Timestamp,
    /// Nested or binary types that are not tested value by value.
    Other,
}

impl TypeCategory {
    fn from_type_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        let category = if name.starts_with("int") || name.starts_with("uint") || name == "long" {
            Self::Integer
        } else if name.starts_with("float") || name.starts_with("double") || name.starts_with("decimal")
        {
            Self::Float
        } else if name.starts_with("bool") {
            Self::Boolean
        } else if name.starts_with("date") && !name.starts_with("datetime") {
            Self::Date
        } else if name.starts_with("timestamp") || name.starts_with("datetime") {
            Self::Timestamp
        } else if name.contains("string") || name == "character" || name == "str" {
            Self::String
        } else if name.starts_with("binary")
            || name.starts_with("list")
            || name.starts_with("array")
            || name.starts_with("struct")
            || name.starts_with("map")
            || name == "null"
        {
            Self::Other
        } else {
            return None;
        };
        Some(category)
    }

    /// Whether every non-null value must parse as this type.
    pub fn needs_conversion(self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Boolean)
    }

    /// Returns true if `value` can be read as this type.
    pub fn accepts(self, value: &str) -> bool {
        let value = value.trim();
        match self {
            Self::Integer => value.parse::<i64>().is_ok() || value.parse::<u64>().is_ok(),
            Self::Float => value.parse::<f64>().is_ok(),
            Self::Boolean => parse_bool(value).is_some(),
            _ => true,
        }
    }
}

/// Parses the boolean spellings found in delimited files.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// One column of the metadata schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_format: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

impl ColumnSpec {
    /// Type family, from `type` first and `type_category` second.
    pub fn category(&self) -> TypeCategory {
        TypeCategory::from_type_name(&self.data_type)
            .or_else(|| {
                self.type_category
                    .as_deref()
                    .and_then(TypeCategory::from_type_name)
            })
            .unwrap_or(TypeCategory::String)
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable.unwrap_or(true)
    }

    /// Format used by the date and timestamp tests.
    pub fn date_format(&self) -> &str {
        match (&self.datetime_format, self.category()) {
            (Some(format), _) => format,
            (None, TypeCategory::Date) => DEFAULT_DATE_FORMAT,
            (None, _) => DEFAULT_DATETIME_FORMAT,
        }
    }

    /// Enum members rendered the way cell values are rendered.
    pub fn enum_strings(&self) -> Option<Vec<String>> {
        self.enum_values.as_ref().map(|values| {
            values
                .iter()
                .map(|value| match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
    }

    /// Arrow type equivalent of the declared type.
    pub fn arrow_type(&self) -> Result<DataType> {
        arrow_type_from_name(&self.data_type).ok_or_else(|| {
            LinterError::Parse(format!(
                "column '{}' has type '{}' with no arrow equivalent",
                self.name, self.data_type
            ))
        })
    }
}

fn arrow_type_from_name(name: &str) -> Option<DataType> {
    let name = name.trim().to_lowercase();
    let simple = match name.as_str() {
        "null" => Some(DataType::Null),
        "bool" | "boolean" => Some(DataType::Boolean),
        "int8" => Some(DataType::Int8),
        "int16" => Some(DataType::Int16),
        "int32" | "int" => Some(DataType::Int32),
        "int64" | "long" => Some(DataType::Int64),
        "uint8" => Some(DataType::UInt8),
        "uint16" => Some(DataType::UInt16),
        "uint32" => Some(DataType::UInt32),
        "uint64" => Some(DataType::UInt64),
        "float16" => Some(DataType::Float16),
        "float32" | "float" => Some(DataType::Float32),
        "float64" | "double" => Some(DataType::Float64),
        "string" | "utf8" | "character" => Some(DataType::Utf8),
        "large_string" | "large_utf8" => Some(DataType::LargeUtf8),
        "binary" => Some(DataType::Binary),
        "large_binary" => Some(DataType::LargeBinary),
        "date32" | "date" => Some(DataType::Date32),
        "date64" => Some(DataType::Date64),
        _ => None,
    };
    if simple.is_some() {
        return simple;
    }

    if let Some(inner) = name
        .strip_prefix("timestamp(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let unit = match inner.split(',').next().map(str::trim) {
            Some("s") => TimeUnit::Second,
            Some("ms") => TimeUnit::Millisecond,
            Some("us") => TimeUnit::Microsecond,
            Some("ns") => TimeUnit::Nanosecond,
            _ => return None,
        };
        return Some(DataType::Timestamp(unit, None));
    }

    if let Some(inner) = name
        .strip_prefix("decimal128(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let mut parts = inner.split(',').map(str::trim);
        let precision = parts.next()?.parse().ok()?;
        let scale = parts.next()?.parse().ok()?;
        return Some(DataType::Decimal128(precision, scale));
    }

    None
}

/// The declarative column-level contract for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_file_format", alias = "data_format")]
    pub file_format: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub partitions: Vec<String>,
}

fn default_file_format() -> String {
    "csv".to_string()
}

impl TableMetadata {
    pub fn from_json(table: &str, text: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_str(text)
            .map_err(|e| LinterError::metadata(table, format!("invalid metadata JSON: {e}")))?;
        if metadata.columns.is_empty() {
            return Err(LinterError::metadata(table, "metadata declares no columns"));
        }
        Ok(metadata)
    }

    pub fn format(&self) -> Result<FileFormat> {
        self.file_format.parse()
    }

    /// Columns that are expected inside the file, i.e. excluding partitions.
    pub fn data_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns
            .iter()
            .filter(move |column| !self.partitions.contains(&column.name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Returns a copy with every column name lower-cased.
    pub fn lowercased(&self) -> Self {
        let mut copy = self.clone();
        for column in &mut copy.columns {
            column.name = column.name.to_lowercase();
        }
        copy.partitions = copy.partitions.iter().map(|p| p.to_lowercase()).collect();
        copy
    }

    /// Arrow schema of the data columns.
    pub fn arrow_schema(&self) -> Result<Schema> {
        let fields = self
            .data_columns()
            .map(|column| {
                Ok(Field::new(
                    column.name.clone(),
                    column.arrow_type()?,
                    column.is_nullable(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields))
    }
}

/// Reads and parses a table's metadata through `storage`.
#[instrument(skip(storage))]
pub async fn load_metadata(storage: &dyn Storage, table: &str, path: &str) -> Result<TableMetadata> {
    let bytes = storage
        .read_all(path)
        .await
        .map_err(|e| LinterError::metadata(table, format!("could not read '{path}': {e}")))?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|e| LinterError::metadata(table, format!("metadata is not UTF-8: {e}")))?;
    TableMetadata::from_json(table, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEOPLE: &str = r#"{
        "name": "people",
        "file_format": "csv",
        "columns": [
            {"name": "id", "type": "int64", "type_category": "integer", "nullable": false},
            {"name": "name", "type": "string", "type_category": "string", "maxLength": 10},
            {"name": "age", "type": "int64", "type_category": "integer", "minimum": 0},
            {"name": "dob", "type": "date64", "type_category": "timestamp"},
            {"name": "colour", "type": "string", "enum": ["red", "blue"]},
            {"name": "snapshot", "type": "string"}
        ],
        "partitions": ["snapshot"]
    }"#;

    #[test]
    fn test_parse_metadata() {
        let meta = TableMetadata::from_json("people", PEOPLE).unwrap();
        assert_eq!(meta.format().unwrap(), FileFormat::Csv);
        assert_eq!(meta.columns.len(), 6);
        assert_eq!(meta.data_columns().count(), 5);
        let age = meta.column("age").unwrap();
        assert_eq!(age.minimum, Some(0.0));
        assert_eq!(age.category(), TypeCategory::Integer);
        assert!(!meta.column("id").unwrap().is_nullable());
        assert_eq!(meta.column("name").unwrap().max_length, Some(10));
    }

    #[test]
    fn test_date_category_comes_from_type() {
        let meta = TableMetadata::from_json("people", PEOPLE).unwrap();
        let dob = meta.column("dob").unwrap();
        assert_eq!(dob.category(), TypeCategory::Date);
        assert_eq!(dob.date_format(), DEFAULT_DATE_FORMAT);
    }

    #[test]
    fn test_enum_strings() {
        let meta = TableMetadata::from_json("people", PEOPLE).unwrap();
        assert_eq!(
            meta.column("colour").unwrap().enum_strings().unwrap(),
            vec!["red".to_string(), "blue".to_string()]
        );
    }

    #[test]
    fn test_arrow_schema_excludes_partitions() {
        let meta = TableMetadata::from_json("people", PEOPLE).unwrap();
        let schema = meta.arrow_schema().unwrap();
        assert_eq!(schema.fields().len(), 5);
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert!(!schema.field(0).is_nullable());
        assert_eq!(schema.field(3).data_type(), &DataType::Date64);
    }

    #[test]
    fn test_arrow_type_parsing() {
        assert_eq!(
            arrow_type_from_name("timestamp(ms)"),
            Some(DataType::Timestamp(TimeUnit::Millisecond, None))
        );
        assert_eq!(
            arrow_type_from_name("decimal128(38,2)"),
            Some(DataType::Decimal128(38, 2))
        );
        assert_eq!(arrow_type_from_name("mystery"), None);
    }

    #[test]
    fn test_type_category_accepts() {
        assert!(TypeCategory::Integer.accepts("-5"));
        assert!(!TypeCategory::Integer.accepts("five"));
        assert!(TypeCategory::Float.accepts("1.5e3"));
        assert!(TypeCategory::Boolean.accepts("True"));
        assert!(!TypeCategory::Boolean.accepts("maybe"));
        assert!(TypeCategory::String.accepts("anything"));
    }

    #[test]
    fn test_empty_columns_rejected() {
        let err = TableMetadata::from_json("t", r#"{"columns": []}"#).unwrap_err();
        assert!(matches!(err, LinterError::Metadata { .. }));
    }

    #[test]
    fn test_file_format_parse() {
        assert_eq!("jsonl".parse::<FileFormat>().unwrap(), FileFormat::JsonLines);
        assert_eq!("PARQUET".parse::<FileFormat>().unwrap(), FileFormat::Parquet);
        assert!("xlsx".parse::<FileFormat>().is_err());
    }
}
