//! Parquet-backed serializer.
//!
//! Rows are written in row groups of at most `batch_size` rows with Snappy
//! compression. Reads prune columns through a Parquet projection mask and,
//! when enabled, decode straight out of a memory-mapped file.

use std::path::Path;

use super::{DecodeOptions, FormatResult, Serializer, SerializerOptions, StorageFormat};
use crate::storage::OutputSink;
use crate::table::Table;

const FORMAT: StorageFormat = StorageFormat::ColumnarCompressed;

/// Serializer for [`StorageFormat::ColumnarCompressed`].
#[derive(Debug, Clone)]
pub struct ColumnarSerializer {
    options: SerializerOptions,
}

impl ColumnarSerializer {
    /// Create a serializer with the given options.
    pub fn new(options: SerializerOptions) -> Self {
        Self { options }
    }
}

impl Serializer for ColumnarSerializer {
    fn format(&self) -> StorageFormat {
        FORMAT
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "columnar")
    }

    fn supports_projection(&self) -> bool {
        self.is_available()
    }

    fn supports_memory_map(&self) -> bool {
        self.is_available()
    }

    fn encode(&self, table: &Table, sink: &mut OutputSink) -> FormatResult<()> {
        #[cfg(feature = "columnar")]
        {
            parquet_io::encode(&self.options, table, sink)
        }
        #[cfg(not(feature = "columnar"))]
        {
            let _ = (table, sink);
            super::DependencyUnavailableSnafu {
                format: FORMAT,
                feature: "columnar",
            }
            .fail()
        }
    }

    fn decode(&self, path: &Path, options: &DecodeOptions) -> FormatResult<Table> {
        #[cfg(feature = "columnar")]
        {
            parquet_io::decode(&self.options, path, options)
        }
        #[cfg(not(feature = "columnar"))]
        {
            let _ = (path, options, &self.options);
            super::DependencyUnavailableSnafu {
                format: FORMAT,
                feature: "columnar",
            }
            .fail()
        }
    }
}

#[cfg(feature = "columnar")]
mod parquet_io {
    use std::{path::Path, sync::Arc};

    use arrow::{datatypes::SchemaRef, error::ArrowError, record_batch::RecordBatch};
    use bytes::Bytes;
    use memmap2::Mmap;
    use parquet::{
        arrow::{
            ArrowWriter, ProjectionMask,
            arrow_reader::ParquetRecordBatchReaderBuilder,
        },
        basic::Compression,
        file::{properties::WriterProperties, reader::ChunkReader},
    };
    use snafu::prelude::*;

    use super::FORMAT;
    use crate::format::{
        ArrowSnafu, DecodeOptions, FormatResult, InvalidTableSnafu, SerializerOptions,
        StorageSnafu,
    };
    use crate::storage::{self, BackendError, OtherIoSnafu, OutputSink};
    use crate::table::Table;

    pub(super) fn encode(
        options: &SerializerOptions,
        table: &Table,
        sink: &mut OutputSink,
    ) -> FormatResult<()> {
        let path = sink.final_path().display().to_string();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let mut writer = ArrowWriter::try_new(&mut *sink, table.schema(), Some(props))
            .map_err(ArrowError::from)
            .context(ArrowSnafu { format: FORMAT, path: &path })?;

        // One row group per slice.
        for batch in table.slices(options.batch_size) {
            writer
                .write(&batch)
                .and_then(|()| writer.flush())
                .map_err(ArrowError::from)
                .context(ArrowSnafu { format: FORMAT, path: &path })?;
        }

        writer
            .close()
            .map_err(ArrowError::from)
            .context(ArrowSnafu { format: FORMAT, path: &path })?;
        Ok(())
    }

    pub(super) fn decode(
        options: &SerializerOptions,
        path: &Path,
        decode: &DecodeOptions,
    ) -> FormatResult<Table> {
        let file = storage::open_file(path).context(StorageSnafu { format: FORMAT })?;

        if options.use_memory_mapping {
            // SAFETY: optimized files are only ever replaced by rename, never
            // truncated or rewritten in place, so the mapping stays valid.
            let mmap = unsafe { Mmap::map(&file) }
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: path.display().to_string(),
                })
                .context(StorageSnafu { format: FORMAT })?;
            read_table(Bytes::from_owner(mmap), options, path, decode)
        } else {
            read_table(file, options, path, decode)
        }
    }

    fn read_table<R: ChunkReader + 'static>(
        reader: R,
        options: &SerializerOptions,
        path: &Path,
        decode: &DecodeOptions,
    ) -> FormatResult<Table> {
        let path_str = path.display().to_string();
        let context = || ArrowSnafu {
            format: FORMAT,
            path: path_str.clone(),
        };

        let builder = ParquetRecordBatchReaderBuilder::try_new(reader)
            .map_err(ArrowError::from)
            .with_context(|_| context())?;
        let full: SchemaRef = builder.schema().clone();

        let (schema, builder) = match &decode.columns {
            Some(columns) => {
                let indices = Table::projection_indices(&full, columns);
                let mask = ProjectionMask::roots(builder.parquet_schema(), indices.iter().copied());
                let projected = full.project(&indices).with_context(|_| context())?;
                (Arc::new(projected), builder.with_projection(mask))
            }
            None => (full, builder),
        };

        let batches = builder
            .with_batch_size(options.batch_size.max(1))
            .build()
            .map_err(ArrowError::from)
            .with_context(|_| context())?
            .collect::<Result<Vec<RecordBatch>, ArrowError>>()
            .with_context(|_| context())?;

        Table::from_batches(schema, &batches).context(InvalidTableSnafu { path: path_str.clone() })
    }
}
