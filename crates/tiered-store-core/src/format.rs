//! On-disk table encodings.
//!
//! Every encoding implements [`Serializer`]. Three are provided:
//!
//! - [`ColumnarSerializer`]: Parquet with Snappy compression. Supports
//!   column-pruned and memory-mapped reads. Requires the `columnar` feature.
//! - [`HierarchicalSerializer`]: Arrow IPC file with zstd-compressed buffers,
//!   the table stored under a single fixed key. Supports column-pruned reads.
//!   Requires the `hierarchical` feature.
//! - [`GenericSerializer`]: an Arrow IPC stream of the whole table. Always
//!   available; the fallback of last resort.
//!
//! Availability is a property of how the crate was compiled. A serializer
//! whose feature is off still exists, reports `is_available() == false`, and
//! fails every encode/decode with [`FormatError::DependencyUnavailable`]. The
//! [`selector`] module picks a working serializer once, at store construction.

mod columnar;
mod generic;
mod hierarchical;
pub mod selector;

use std::{fmt, path::Path, str::FromStr, sync::Arc};

use arrow::error::ArrowError;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

pub use columnar::ColumnarSerializer;
pub use generic::GenericSerializer;
pub use hierarchical::{HIERARCHICAL_TABLE_KEY, HierarchicalSerializer};

use crate::storage::{OutputSink, StorageError};
use crate::table::{ConversionError, Table};

/// Result type for serializer operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// The on-disk encoding of a dataset's optimized file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageFormat {
    /// Compressed columnar blocks (Parquet).
    #[default]
    #[serde(rename = "columnar")]
    ColumnarCompressed,
    /// Keyed, random-access container (Arrow IPC file).
    #[serde(rename = "hierarchical")]
    Hierarchical,
    /// Whole-table generic binary serialization (Arrow IPC stream).
    #[serde(rename = "generic")]
    GenericBinary,
}

impl StorageFormat {
    /// All formats, in preference order.
    pub const ALL: [StorageFormat; 3] = [
        StorageFormat::ColumnarCompressed,
        StorageFormat::Hierarchical,
        StorageFormat::GenericBinary,
    ];

    /// File extension used for optimized files in this format.
    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::ColumnarCompressed => "parquet",
            StorageFormat::Hierarchical => "h5",
            StorageFormat::GenericBinary => "pkl",
        }
    }

    /// Configuration name of the format.
    pub fn as_str(self) -> &'static str {
        match self {
            StorageFormat::ColumnarCompressed => "columnar",
            StorageFormat::Hierarchical => "hierarchical",
            StorageFormat::GenericBinary => "generic",
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`StorageFormat`] from a string fails.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(display("Unknown storage format '{spec}' (expected columnar, hierarchical or generic)"))]
pub struct ParseStorageFormatError {
    /// The rejected input.
    pub spec: String,
}

impl FromStr for StorageFormat {
    type Err = ParseStorageFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "columnar" | "parquet" => Ok(StorageFormat::ColumnarCompressed),
            "hierarchical" | "hdf5" | "h5" => Ok(StorageFormat::Hierarchical),
            "generic" | "pickle" | "pkl" => Ok(StorageFormat::GenericBinary),
            _ => ParseStorageFormatSnafu { spec: s }.fail(),
        }
    }
}

/// Errors from encoding or decoding a table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FormatError {
    /// The serializer's backing dependency was not compiled in.
    #[snafu(display("Storage format {format} is unavailable: {feature} feature is disabled"))]
    DependencyUnavailable {
        /// The unavailable format.
        format: StorageFormat,
        /// Cargo feature that provides it.
        feature: &'static str,
    },

    /// Opening, writing or committing the file failed.
    #[snafu(display("Storage error in {format} serializer: {source}"))]
    Storage {
        /// Format being read or written.
        format: StorageFormat,
        /// Underlying storage error.
        source: StorageError,
    },

    /// Arrow or Parquet encode/decode error.
    #[snafu(display("Encoding error in {format} serializer at {path}: {source}"))]
    Arrow {
        /// Format being read or written.
        format: StorageFormat,
        /// File involved.
        path: String,
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// A hierarchical file does not hold the expected table key.
    #[snafu(display("File {path} has no table under key '{key}'"))]
    MissingKey {
        /// File involved.
        path: String,
        /// Expected key.
        key: String,
    },

    /// The decoded data does not form a valid table.
    #[snafu(display("Decoded data at {path} is not a valid table: {source}"))]
    InvalidTable {
        /// File involved.
        path: String,
        /// Why the table was rejected.
        source: ConversionError,
    },
}

/// Per-read options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Restrict the read to these columns plus the timestamp column.
    ///
    /// Serializers without projection support read everything and project
    /// afterwards. Unknown names are ignored.
    pub columns: Option<Vec<String>>,
}

/// Settings shared by the built-in serializers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerOptions {
    /// Maximum rows per written batch and per decoded batch.
    pub batch_size: usize,
    /// Memory-map files on read where the backend supports it.
    pub use_memory_mapping: bool,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            use_memory_mapping: true,
        }
    }
}

/// Strategy for encoding a [`Table`] to, and decoding it from, one file.
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Format this serializer writes.
    fn format(&self) -> StorageFormat;

    /// Whether the serializer's backing dependency is present.
    fn is_available(&self) -> bool;

    /// Whether [`DecodeOptions::columns`] prunes columns at read time.
    fn supports_projection(&self) -> bool {
        false
    }

    /// Whether reads can be served from a memory map.
    fn supports_memory_map(&self) -> bool {
        false
    }

    /// Encode `table` into `sink`. The caller commits the sink.
    fn encode(&self, table: &Table, sink: &mut OutputSink) -> FormatResult<()>;

    /// Decode the table stored at `path`.
    fn decode(&self, path: &Path, options: &DecodeOptions) -> FormatResult<Table>;
}

/// One instance of every built-in serializer, in [`StorageFormat::ALL`] order.
pub fn default_serializers(options: SerializerOptions) -> Vec<Arc<dyn Serializer>> {
    vec![
        Arc::new(ColumnarSerializer::new(options)),
        Arc::new(HierarchicalSerializer::new(options)),
        Arc::new(GenericSerializer::new(options)),
    ]
}

/// Apply a column projection after a full read.
fn project_after_read(
    table: Table,
    path: &Path,
    options: &DecodeOptions,
) -> FormatResult<Table> {
    match &options.columns {
        Some(columns) => table.project(columns).context(InvalidTableSnafu {
            path: path.display().to_string(),
        }),
        None => Ok(table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_format_names_and_aliases() {
        assert_eq!("columnar".parse(), Ok(StorageFormat::ColumnarCompressed));
        assert_eq!("Parquet".parse(), Ok(StorageFormat::ColumnarCompressed));
        assert_eq!(" hdf5 ".parse(), Ok(StorageFormat::Hierarchical));
        assert_eq!("generic".parse(), Ok(StorageFormat::GenericBinary));
        assert!("feather".parse::<StorageFormat>().is_err());
    }

    #[test]
    fn serde_uses_config_names() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&StorageFormat::Hierarchical)?;
        assert_eq!(json, "\"hierarchical\"");
        let back: StorageFormat = serde_json::from_str("\"generic\"")?;
        assert_eq!(back, StorageFormat::GenericBinary);
        Ok(())
    }

    #[test]
    fn default_serializers_cover_every_format() {
        let formats: Vec<StorageFormat> = default_serializers(SerializerOptions::default())
            .iter()
            .map(|s| s.format())
            .collect();
        assert_eq!(formats, StorageFormat::ALL.to_vec());
    }

    #[test]
    fn generic_is_always_available() {
        assert!(GenericSerializer::new(SerializerOptions::default()).is_available());
    }
}
