//! Keyed container serializer.
//!
//! The table is written as an Arrow IPC file with zstd-compressed buffers.
//! The file footer records the key the table is stored under; a file without
//! the expected key is rejected on read. The footer's block index lets a
//! projected read skip the buffers of unrequested columns.

use std::path::Path;

use super::{DecodeOptions, FormatResult, Serializer, SerializerOptions, StorageFormat};
use crate::storage::OutputSink;
use crate::table::Table;

/// Key the table is stored under inside a hierarchical file.
pub const HIERARCHICAL_TABLE_KEY: &str = "data";

const FORMAT: StorageFormat = StorageFormat::Hierarchical;

/// Serializer for [`StorageFormat::Hierarchical`].
#[derive(Debug, Clone)]
pub struct HierarchicalSerializer {
    options: SerializerOptions,
}

impl HierarchicalSerializer {
    /// Create a serializer with the given options.
    pub fn new(options: SerializerOptions) -> Self {
        Self { options }
    }
}

impl Serializer for HierarchicalSerializer {
    fn format(&self) -> StorageFormat {
        FORMAT
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "hierarchical")
    }

    fn supports_projection(&self) -> bool {
        self.is_available()
    }

    fn encode(&self, table: &Table, sink: &mut OutputSink) -> FormatResult<()> {
        #[cfg(feature = "hierarchical")]
        {
            ipc_file::encode(&self.options, table, sink)
        }
        #[cfg(not(feature = "hierarchical"))]
        {
            let _ = (table, sink, &self.options);
            super::DependencyUnavailableSnafu {
                format: FORMAT,
                feature: "hierarchical",
            }
            .fail()
        }
    }

    fn decode(&self, path: &Path, options: &DecodeOptions) -> FormatResult<Table> {
        #[cfg(feature = "hierarchical")]
        {
            ipc_file::decode(path, options)
        }
        #[cfg(not(feature = "hierarchical"))]
        {
            let _ = (path, options);
            super::DependencyUnavailableSnafu {
                format: FORMAT,
                feature: "hierarchical",
            }
            .fail()
        }
    }
}

#[cfg(feature = "hierarchical")]
mod ipc_file {
    use std::{fs::File, io::BufReader, path::Path, sync::Arc};

    use arrow::{
        error::ArrowError,
        ipc::{
            CompressionType,
            reader::FileReader,
            writer::{FileWriter, IpcWriteOptions},
        },
        record_batch::RecordBatch,
    };
    use snafu::prelude::*;

    use super::{FORMAT, HIERARCHICAL_TABLE_KEY};
    use crate::format::{
        ArrowSnafu, DecodeOptions, FormatResult, InvalidTableSnafu, MissingKeySnafu,
        SerializerOptions, StorageSnafu,
    };
    use crate::storage::{self, OutputSink};
    use crate::table::Table;

    /// Footer metadata entry naming the stored table's key.
    const KEY_METADATA: &str = "tiered_store.key";

    pub(super) fn encode(
        options: &SerializerOptions,
        table: &Table,
        sink: &mut OutputSink,
    ) -> FormatResult<()> {
        let path = sink.final_path().display().to_string();
        let write_options = IpcWriteOptions::default()
            .try_with_compression(Some(CompressionType::ZSTD))
            .context(ArrowSnafu { format: FORMAT, path: &path })?;

        let schema = table.schema();
        let mut writer = FileWriter::try_new_with_options(&mut *sink, &schema, write_options)
            .context(ArrowSnafu { format: FORMAT, path: &path })?;
        writer.write_metadata(KEY_METADATA, HIERARCHICAL_TABLE_KEY);

        for batch in table.slices(options.batch_size) {
            writer
                .write(&batch)
                .context(ArrowSnafu { format: FORMAT, path: &path })?;
        }
        writer
            .finish()
            .context(ArrowSnafu { format: FORMAT, path: &path })
    }

    fn open(
        path: &Path,
        projection: Option<Vec<usize>>,
    ) -> FormatResult<FileReader<BufReader<File>>> {
        let file = storage::open_file(path).context(StorageSnafu { format: FORMAT })?;
        FileReader::try_new(BufReader::new(file), projection).context(ArrowSnafu {
            format: FORMAT,
            path: path.display().to_string(),
        })
    }

    pub(super) fn decode(path: &Path, options: &DecodeOptions) -> FormatResult<Table> {
        let path_str = path.display().to_string();
        let mut reader = open(path, None)?;

        let key = reader.custom_metadata().get(KEY_METADATA).map(String::as_str);
        ensure!(
            key == Some(HIERARCHICAL_TABLE_KEY),
            MissingKeySnafu {
                path: &path_str,
                key: HIERARCHICAL_TABLE_KEY,
            }
        );

        let full = reader.schema();
        let schema = match &options.columns {
            Some(columns) => {
                let indices = Table::projection_indices(&full, columns);
                let schema = full
                    .project(&indices)
                    .context(ArrowSnafu { format: FORMAT, path: &path_str })?;
                // The projection is fixed when the footer is parsed.
                reader = open(path, Some(indices))?;
                Arc::new(schema)
            }
            None => full,
        };

        let batches = reader
            .collect::<Result<Vec<RecordBatch>, ArrowError>>()
            .context(ArrowSnafu { format: FORMAT, path: &path_str })?;
        Table::from_batches(schema, &batches).context(InvalidTableSnafu { path: path_str })
    }
}

#[cfg(all(test, feature = "hierarchical"))]
mod tests {
    use super::*;
    use crate::format::{FormatError, GenericSerializer};
    use crate::record::Record;
    use crate::storage::StorageLocation;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample() -> Result<Table, Box<dyn std::error::Error>> {
        let days = ["2024-03-01T00:00:00Z", "2024-03-02T00:00:00Z", "2024-03-03T00:00:00Z"];
        let rows: Vec<Record> = days
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| match json!({ "timestamp": ts, "count": i, "tags": { "n": i } }) {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        Ok(Table::from_records(&rows, &Record::new())?)
    }

    fn write_with(
        serializer: &dyn Serializer,
        dir: &TempDir,
        name: &str,
        table: &Table,
    ) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
        let mut sink = OutputSink::open(&StorageLocation::local(dir.path()), Path::new(name))?;
        serializer.encode(table, &mut sink)?;
        let path = sink.final_path().to_path_buf();
        sink.finish()?;
        Ok(path)
    }

    #[test]
    fn round_trips_nested_values() -> TestResult {
        let dir = TempDir::new()?;
        let serializer = HierarchicalSerializer::new(SerializerOptions {
            batch_size: 1,
            use_memory_mapping: false,
        });
        let table = sample()?;
        let path = write_with(&serializer, &dir, "t.h5", &table)?;

        let back = serializer.decode(&path, &DecodeOptions::default())?;
        assert_eq!(back.to_records()?, table.to_records()?);
        Ok(())
    }

    #[test]
    fn projection_reads_requested_columns() -> TestResult {
        let dir = TempDir::new()?;
        let serializer = HierarchicalSerializer::new(SerializerOptions::default());
        let path = write_with(&serializer, &dir, "t.h5", &sample()?)?;

        let options = DecodeOptions {
            columns: Some(vec!["count".to_string()]),
        };
        let back = serializer.decode(&path, &options)?;
        assert_eq!(back.column_names(), vec!["timestamp", "count"]);
        assert_eq!(back.num_rows(), 3);
        Ok(())
    }

    #[test]
    fn rejects_file_without_table_key() -> TestResult {
        let dir = TempDir::new()?;
        // A plain IPC stream has no footer, let alone the key.
        let generic = GenericSerializer::new(SerializerOptions::default());
        let path = write_with(&generic, &dir, "t.h5", &sample()?)?;

        let serializer = HierarchicalSerializer::new(SerializerOptions::default());
        let err = serializer.decode(&path, &DecodeOptions::default());
        assert!(matches!(
            err,
            Err(FormatError::Arrow { .. } | FormatError::MissingKey { .. })
        ));
        Ok(())
    }
}
