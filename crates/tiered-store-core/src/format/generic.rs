//! Whole-table serializer with no optional dependencies.
//!
//! Writes the table as an uncompressed Arrow IPC stream. A stream has no
//! footer or block index, so every read decodes the full table and column
//! selection happens afterwards.

use std::{io::BufReader, path::Path};

use arrow::{
    error::ArrowError,
    ipc::{reader::StreamReader, writer::StreamWriter},
    record_batch::RecordBatch,
};
use snafu::prelude::*;

use super::{
    ArrowSnafu, DecodeOptions, FormatResult, InvalidTableSnafu, Serializer, SerializerOptions,
    StorageFormat, StorageSnafu, project_after_read,
};
use crate::storage::{self, OutputSink};
use crate::table::Table;

const FORMAT: StorageFormat = StorageFormat::GenericBinary;

/// Serializer for [`StorageFormat::GenericBinary`].
#[derive(Debug, Clone)]
pub struct GenericSerializer {
    options: SerializerOptions,
}

impl GenericSerializer {
    /// Create a serializer with the given options.
    pub fn new(options: SerializerOptions) -> Self {
        Self { options }
    }
}

impl Serializer for GenericSerializer {
    fn format(&self) -> StorageFormat {
        FORMAT
    }

    fn is_available(&self) -> bool {
        true
    }

    fn encode(&self, table: &Table, sink: &mut OutputSink) -> FormatResult<()> {
        let path = sink.final_path().display().to_string();
        let schema = table.schema();
        let mut writer = StreamWriter::try_new(&mut *sink, &schema)
            .context(ArrowSnafu { format: FORMAT, path: &path })?;
        for batch in table.slices(self.options.batch_size) {
            writer
                .write(&batch)
                .context(ArrowSnafu { format: FORMAT, path: &path })?;
        }
        writer
            .finish()
            .context(ArrowSnafu { format: FORMAT, path: &path })
    }

    fn decode(&self, path: &Path, options: &DecodeOptions) -> FormatResult<Table> {
        let path_str = path.display().to_string();
        let file = storage::open_file(path).context(StorageSnafu { format: FORMAT })?;
        let reader = StreamReader::try_new(BufReader::new(file), None)
            .context(ArrowSnafu { format: FORMAT, path: &path_str })?;

        let schema = reader.schema();
        let batches = reader
            .collect::<Result<Vec<RecordBatch>, ArrowError>>()
            .context(ArrowSnafu { format: FORMAT, path: &path_str })?;
        let table =
            Table::from_batches(schema, &batches).context(InvalidTableSnafu { path: &path_str })?;
        project_after_read(table, path, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::storage::StorageLocation;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn round_trips_and_projects_after_read() -> TestResult {
        let dir = TempDir::new()?;
        let rows: Vec<Record> = (1..=4)
            .filter_map(|day| {
                match json!({ "timestamp": format!("2024-05-0{day}"), "a": day, "b": "x" }) {
                    Value::Object(map) => Some(map),
                    _ => None,
                }
            })
            .collect();
        let mut metadata = Record::new();
        metadata.insert("source".to_string(), json!("unit-test"));
        let table = Table::from_records(&rows, &metadata)?;

        let serializer = GenericSerializer::new(SerializerOptions {
            batch_size: 3,
            use_memory_mapping: true,
        });
        assert!(!serializer.supports_projection());
        assert!(!serializer.supports_memory_map());

        let mut sink = OutputSink::open(&StorageLocation::local(dir.path()), Path::new("t.pkl"))?;
        serializer.encode(&table, &mut sink)?;
        let path = sink.final_path().to_path_buf();
        sink.finish()?;

        let back = serializer.decode(&path, &DecodeOptions::default())?;
        assert_eq!(back, table);

        let projected = serializer.decode(
            &path,
            &DecodeOptions {
                columns: Some(vec!["b".to_string()]),
            },
        )?;
        assert_eq!(projected.column_names(), vec!["timestamp", "b"]);
        assert_eq!(projected.metadata(), metadata);
        Ok(())
    }
}
