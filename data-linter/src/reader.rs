//! Decodes landed files into a column-major table of optional strings.
//!
//! Every validator works on the same [`DataTable`], so CSV, JSON lines and
//! Parquet files go through identical checks. Parquet columns keep their
//! Arrow type in [`Column::native_type`] so type-dependent tests can tell a
//! typed value from text.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::Array;
use arrow::datatypes::{DataType, Schema};
use arrow::util::display::array_value_to_string;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value;

use crate::config::TableConfig;
use crate::error::{LinterError, Result};
use crate::metadata::{FileFormat, TableMetadata};

/// How a table's files are read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    pub expect_header: bool,
    pub headers_ignore_case: bool,
    pub only_test_cols_in_metadata: bool,
    pub row_limit: Option<usize>,
}

impl From<&TableConfig> for ReadOptions {
    fn from(config: &TableConfig) -> Self {
        Self {
            expect_header: config.expect_header,
            headers_ignore_case: config.headers_ignore_case,
            only_test_cols_in_metadata: config.only_test_cols_in_metadata,
            row_limit: config.row_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// One entry per row, `None` for missing or empty cells.
    pub values: Vec<Option<String>>,
    /// Arrow type for self-describing formats, `None` for text formats.
    pub native_type: Option<DataType>,
}

impl Column {
    /// Whether the values are text rather than typed values rendered as text.
    pub fn is_text(&self) -> bool {
        matches!(
            self.native_type,
            None | Some(DataType::Utf8) | Some(DataType::LargeUtf8) | Some(DataType::Utf8View)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub columns: Vec<Column>,
    pub row_count: usize,
}

impl DataTable {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    fn from_text_columns(names: Vec<String>, values: Vec<Vec<Option<String>>>, rows: usize) -> Self {
        let columns = names
            .into_iter()
            .zip(values)
            .map(|(name, values)| Column {
                name,
                values,
                native_type: None,
            })
            .collect();
        Self {
            columns,
            row_count: rows,
        }
    }
}

/// Reads `data` according to the metadata's file format and the table options.
pub fn read_table(
    data: Bytes,
    metadata: &TableMetadata,
    options: &ReadOptions,
) -> Result<DataTable> {
    let mut table = match metadata.format()? {
        FileFormat::Csv => read_csv(&data, metadata, options)?,
        FileFormat::JsonLines => read_json_lines(&data, options)?,
        FileFormat::Parquet => read_parquet(data, options)?,
    };

    if options.headers_ignore_case {
        for column in &mut table.columns {
            column.name = column.name.to_lowercase();
        }
    }

    if options.only_test_cols_in_metadata {
        let keep: Vec<String> = metadata
            .data_columns()
            .map(|column| {
                if options.headers_ignore_case {
                    column.name.to_lowercase()
                } else {
                    column.name.clone()
                }
            })
            .collect();
        table.columns.retain(|column| keep.contains(&column.name));
    }

    Ok(table)
}

fn limit_reached(rows: usize, options: &ReadOptions) -> bool {
    options.row_limit.is_some_and(|limit| rows >= limit)
}

fn read_csv(data: &[u8], metadata: &TableMetadata, options: &ReadOptions) -> Result<DataTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(options.expect_header)
        .flexible(true)
        .from_reader(data);

    let mut names: Vec<String> = if options.expect_header {
        reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect()
    } else {
        metadata.data_columns().map(|column| column.name.clone()).collect()
    };
    let mut values: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    let mut rows = 0;

    for record in reader.records() {
        if limit_reached(rows, options) {
            break;
        }
        let record = record?;
        // rows wider than the header get positional names
        while names.len() < record.len() {
            names.push(format!("column_{}", names.len()));
            values.push(vec![None; rows]);
        }
        for (index, column) in values.iter_mut().enumerate() {
            let cell = record
                .get(index)
                .filter(|cell| !cell.is_empty())
                .map(str::to_string);
            column.push(cell);
        }
        rows += 1;
    }

    Ok(DataTable::from_text_columns(names, values, rows))
}

fn render_json(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn read_json_lines(data: &[u8], options: &ReadOptions) -> Result<DataTable> {
    let text = std::str::from_utf8(data)
        .map_err(|e| LinterError::Parse(format!("json lines file is not UTF-8: {e}")))?;

    let mut names: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut values: Vec<Vec<Option<String>>> = Vec::new();
    let mut rows = 0;

    for (line_number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if limit_reached(rows, options) {
            break;
        }
        let object = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                return Err(LinterError::Parse(format!(
                    "line {} is not a JSON object",
                    line_number + 1
                )))
            }
            Err(e) => {
                return Err(LinterError::Parse(format!(
                    "line {}: {e}",
                    line_number + 1
                )))
            }
        };

        let mut row: Vec<Option<String>> = vec![None; names.len()];
        for (key, value) in object {
            let position = match positions.get(&key) {
                Some(position) => *position,
                None => {
                    names.push(key.clone());
                    values.push(vec![None; rows]);
                    row.push(None);
                    positions.insert(key, names.len() - 1);
                    names.len() - 1
                }
            };
            row[position] = render_json(value);
        }
        for (column, cell) in values.iter_mut().zip(row) {
            column.push(cell);
        }
        rows += 1;
    }

    Ok(DataTable::from_text_columns(names, values, rows))
}

/// Reads only the Arrow schema from a Parquet footer.
pub fn read_parquet_schema(data: Bytes) -> Result<Arc<Schema>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    Ok(Arc::clone(builder.schema()))
}

fn read_parquet(data: Bytes, options: &ReadOptions) -> Result<DataTable> {
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    if let Some(limit) = options.row_limit {
        builder = builder.with_limit(limit);
    }
    let schema = Arc::clone(builder.schema());
    let reader = builder.build()?;

    let mut columns: Vec<Column> = schema
        .fields()
        .iter()
        .map(|field| Column {
            name: field.name().clone(),
            values: Vec::new(),
            native_type: Some(field.data_type().clone()),
        })
        .collect();
    let mut rows = 0;

    for batch in reader {
        let batch = batch?;
        for (column, array) in columns.iter_mut().zip(batch.columns()) {
            for row in 0..array.len() {
                let cell = if array.is_null(row) {
                    None
                } else {
                    Some(array_value_to_string(array, row)?)
                };
                column.values.push(cell);
            }
        }
        rows += batch.num_rows();
    }

    Ok(DataTable {
        columns,
        row_count: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use arrow::datatypes::Field;
    use parquet::arrow::ArrowWriter;

    fn metadata(format: &str) -> TableMetadata {
        TableMetadata::from_json(
            "people",
            &format!(
                r#"{{"file_format": "{format}", "columns": [
                    {{"name": "id", "type": "int64"}},
                    {{"name": "Name", "type": "string"}}
                ]}}"#
            ),
        )
        .unwrap()
    }

    fn options() -> ReadOptions {
        ReadOptions {
            expect_header: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_read_csv_with_header() {
        let data = Bytes::from_static(b"id,Name\n1,alice\n2,\n");
        let table = read_table(data, &metadata("csv"), &options()).unwrap();
        assert_eq!(table.row_count, 2);
        assert_eq!(table.column_names(), vec!["id", "Name"]);
        let name = table.column("Name").unwrap();
        assert_eq!(name.values, vec![Some("alice".to_string()), None]);
        assert!(name.is_text());
    }

    #[test]
    fn test_read_csv_headerless_uses_metadata_names() {
        let data = Bytes::from_static(b"1,alice,extra\n2,bob,more\n");
        let opts = ReadOptions::default();
        let table = read_table(data, &metadata("csv"), &opts).unwrap();
        assert_eq!(table.column_names(), vec!["id", "Name", "column_2"]);
        assert_eq!(table.column("column_2").unwrap().values[1].as_deref(), Some("more"));
    }

    #[test]
    fn test_read_csv_ignore_case_and_row_limit() {
        let data = Bytes::from_static(b"ID,NAME\n1,a\n2,b\n3,c\n");
        let opts = ReadOptions {
            expect_header: true,
            headers_ignore_case: true,
            row_limit: Some(2),
            ..Default::default()
        };
        let table = read_table(data, &metadata("csv"), &opts).unwrap();
        assert_eq!(table.column_names(), vec!["id", "name"]);
        assert_eq!(table.row_count, 2);
    }

    #[test]
    fn test_only_test_cols_in_metadata() {
        let data = Bytes::from_static(b"id,Name,notes\n1,a,x\n");
        let opts = ReadOptions {
            expect_header: true,
            only_test_cols_in_metadata: true,
            ..Default::default()
        };
        let table = read_table(data, &metadata("csv"), &opts).unwrap();
        assert_eq!(table.column_names(), vec!["id", "Name"]);
    }

    #[test]
    fn test_read_json_lines() {
        let data = Bytes::from_static(
            b"{\"id\": 1, \"Name\": \"alice\"}\n\n{\"id\": 2, \"Name\": null, \"tags\": [1]}\n",
        );
        let table = read_table(data, &metadata("jsonl"), &options()).unwrap();
        assert_eq!(table.row_count, 2);
        assert_eq!(table.column("id").unwrap().values, vec![Some("1".into()), Some("2".into())]);
        assert_eq!(table.column("Name").unwrap().values, vec![Some("alice".into()), None]);
        assert_eq!(table.column("tags").unwrap().values, vec![None, Some("[1]".into())]);
    }

    #[test]
    fn test_read_json_lines_rejects_non_objects() {
        let data = Bytes::from_static(b"[1, 2]\n");
        let err = read_table(data, &metadata("jsonl"), &options()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    fn parquet_bytes() -> Bytes {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("Name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap();
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        Bytes::from(buffer)
    }

    #[test]
    fn test_read_parquet() {
        let table = read_table(parquet_bytes(), &metadata("parquet"), &options()).unwrap();
        assert_eq!(table.row_count, 3);
        let id = table.column("id").unwrap();
        assert_eq!(id.native_type, Some(DataType::Int64));
        assert!(!id.is_text());
        assert_eq!(id.values[2].as_deref(), Some("3"));
        assert_eq!(table.column("Name").unwrap().values[1], None);
    }

    #[test]
    fn test_read_parquet_schema_and_limit() {
        let schema = read_parquet_schema(parquet_bytes()).unwrap();
        assert_eq!(schema.fields().len(), 2);

        let opts = ReadOptions {
            row_limit: Some(1),
            ..Default::default()
        };
        let table = read_table(parquet_bytes(), &metadata("parquet"), &opts).unwrap();
        assert_eq!(table.row_count, 1);
    }

    #[test]
    fn test_unreadable_parquet_is_parse_error() {
        let err = read_table(Bytes::from_static(b"nope"), &metadata("parquet"), &options())
            .unwrap_err();
        assert!(matches!(err, LinterError::Parse(_)));
    }
}
