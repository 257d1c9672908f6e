//! In-memory columnar materialization of a dataset.
//!
//! A [`Table`] wraps a single Arrow [`RecordBatch`] and guarantees that a
//! `timestamp` column of Arrow type `Timestamp(_, _)` is present. Dataset
//! metadata rides along as JSON in the schema metadata, so every on-disk
//! format that preserves the Arrow schema also preserves it.

mod convert;

use std::collections::HashMap;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::error::ArrowError;
use snafu::prelude::*;

use crate::record::{Metadata, Record, TIMESTAMP_FIELD};

/// Schema metadata key holding the dataset metadata as a JSON object.
pub const METADATA_SCHEMA_KEY: &str = "tiered_store.metadata";

/// Field metadata key marking a `Utf8` column whose cells are JSON documents.
pub const JSON_FIELD_KEY: &str = "tiered_store.json";

/// Errors raised while converting records into a [`Table`] or back.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConversionError {
    /// A record has no timestamp, or a null one.
    #[snafu(display("Record {row} has no `{column}` value"))]
    MissingTimestamp {
        /// Zero-based row index of the offending record.
        row: usize,
        /// Name of the timestamp field.
        column: String,
    },

    /// A record's timestamp could not be parsed into an instant.
    #[snafu(display("Record {row} has an unparseable timestamp: {value}"))]
    InvalidTimestamp {
        /// Zero-based row index of the offending record.
        row: usize,
        /// The raw value, rendered as JSON.
        value: String,
    },

    /// A table lacks the timestamp column or carries it with a non-timestamp type.
    #[snafu(display("Table timestamp column `{column}` is invalid: {detail}"))]
    TimestampColumn {
        /// Name of the timestamp column.
        column: String,
        /// What was wrong with it.
        detail: String,
    },

    /// Arrow rejected the assembled columns.
    #[snafu(display("Arrow error while building table: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Dataset metadata or a JSON cell could not be (de)serialized.
    #[snafu(display("JSON error in column {column}: {source}"))]
    Json {
        /// Column (or metadata key) being processed.
        column: String,
        /// Underlying serde_json error.
        source: serde_json::Error,
    },
}

/// An Arrow-backed table with a guaranteed timestamp column.
///
/// Cloning is cheap: column buffers are reference counted.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    batch: RecordBatch,
}

impl Table {
    /// Wrap an existing batch, validating the timestamp column.
    pub fn try_new(batch: RecordBatch) -> Result<Self, ConversionError> {
        let schema = batch.schema();
        let field = schema
            .field_with_name(TIMESTAMP_FIELD)
            .map_err(|_| ConversionError::TimestampColumn {
                column: TIMESTAMP_FIELD.to_string(),
                detail: "column is missing".to_string(),
            })?;

        match field.data_type() {
            DataType::Timestamp(_, _) => Ok(Self { batch }),
            other => TimestampColumnSnafu {
                column: TIMESTAMP_FIELD,
                detail: format!("expected a timestamp type, found {other}"),
            }
            .fail(),
        }
    }

    /// Materialize records into a table.
    ///
    /// Columns are the union of record fields in first-seen order; see the
    /// crate documentation of the `convert` rules for typing.
    pub fn from_records(records: &[Record], metadata: &Metadata) -> Result<Self, ConversionError> {
        convert::records_to_batch(records, metadata).map(|batch| Self { batch })
    }

    /// Render the table back into records, omitting null cells.
    pub fn to_records(&self) -> Result<Vec<Record>, ConversionError> {
        convert::batch_to_records(&self.batch)
    }

    /// Dataset metadata stored alongside the table. Empty if none was recorded.
    pub fn metadata(&self) -> Metadata {
        self.batch
            .schema_ref()
            .metadata()
            .get(METADATA_SCHEMA_KEY)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Number of columns, timestamp included.
    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// Arrow schema of the table.
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// Column names in table order.
    pub fn column_names(&self) -> Vec<&str> {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect()
    }

    /// Look up a column by name.
    pub fn column_by_name(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// The timestamp column.
    pub fn timestamp_column(&self) -> &ArrayRef {
        // Presence is checked by every constructor.
        let idx = self
            .batch
            .schema_ref()
            .index_of(TIMESTAMP_FIELD)
            .unwrap_or_default();
        self.batch.column(idx)
    }

    /// Borrow the underlying batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Unwrap into the underlying batch.
    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Indices of `columns` plus the timestamp column, in table order.
    ///
    /// Unknown names are ignored.
    pub fn projection_indices(schema: &Schema, columns: &[String]) -> Vec<usize> {
        schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name() == TIMESTAMP_FIELD || columns.iter().any(|c| c == f.name()))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Keep only `columns` plus the timestamp column.
    pub fn project(&self, columns: &[String]) -> Result<Self, ConversionError> {
        let indices = Self::projection_indices(self.batch.schema_ref(), columns);
        let batch = self.batch.project(&indices).context(ArrowSnafu)?;
        Ok(Self { batch })
    }

    /// Replace the row set, keeping the table's schema.
    pub(crate) fn with_batch(&self, batch: RecordBatch) -> Self {
        debug_assert_eq!(batch.schema_ref().fields(), self.batch.schema_ref().fields());
        Self { batch }
    }

    /// Split into batches of at most `rows` rows for writers.
    pub(crate) fn slices(&self, rows: usize) -> impl Iterator<Item = RecordBatch> + '_ {
        let rows = rows.max(1);
        let total = self.batch.num_rows();
        (0..total.div_ceil(rows)).map(move |i| {
            let offset = i * rows;
            self.batch.slice(offset, rows.min(total - offset))
        })
    }

    /// Reassemble a table from decoded batches sharing `schema`.
    pub(crate) fn from_batches(
        schema: SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<Self, ConversionError> {
        let batch = arrow::compute::concat_batches(&schema, batches).context(ArrowSnafu)?;
        Self::try_new(batch)
    }
}

/// Encode dataset metadata as schema metadata.
pub(crate) fn schema_metadata(
    metadata: &Metadata,
) -> Result<HashMap<String, String>, ConversionError> {
    let raw = serde_json::to_string(metadata).context(JsonSnafu {
        column: METADATA_SCHEMA_KEY,
    })?;
    Ok(HashMap::from([(METADATA_SCHEMA_KEY.to_string(), raw)]))
}
