//! The canonical store: the durable source of truth for datasets.
//!
//! Every optimized representation kept by [`crate::TieredStore`] can be
//! rebuilt from the canonical store, so writes always reach it first and a
//! failure there is the only fatal failure of a store operation.
//!
//! Two implementations are provided: [`MemoryCanonicalStore`] for tests and
//! embedding, and [`JsonCanonicalStore`], which keeps every stored version of
//! a dataset as a JSON file on disk.

mod json;
mod memory;

use serde_json::Value;
use snafu::prelude::*;

pub use json::JsonCanonicalStore;
pub use memory::MemoryCanonicalStore;

use crate::record::{Metadata, Record};
use crate::storage::StorageError;

/// Result type for canonical store operations.
pub type CanonicalResult<T> = Result<T, CanonicalError>;

/// Errors reported by a [`CanonicalStore`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CanonicalError {
    /// No dataset with this id has been stored.
    #[snafu(display("Dataset not found: {dataset_id}"))]
    NotFound {
        /// The unknown dataset id.
        dataset_id: String,
    },

    /// The requested version of a dataset does not exist.
    #[snafu(display("Dataset {dataset_id} has no version {version}"))]
    VersionNotFound {
        /// Dataset id.
        dataset_id: String,
        /// The missing version.
        version: u64,
    },

    /// The dataset exists but has no record at the requested row.
    #[snafu(display("Item not found: {item_id}"))]
    ItemNotFound {
        /// The unknown item id.
        item_id: String,
    },

    /// An item id is not of the form `{dataset_id}/{row}`.
    #[snafu(display("Invalid item id '{item_id}': expected <dataset_id>/<row>"))]
    InvalidItemId {
        /// The malformed item id.
        item_id: String,
    },

    /// The dataset id cannot be used as a storage name.
    #[snafu(display("Invalid dataset id '{dataset_id}': {reason}"))]
    InvalidDatasetId {
        /// The rejected id.
        dataset_id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A dataset's `CURRENT` pointer does not name a version.
    #[snafu(display("Dataset {dataset_id} has a corrupt CURRENT pointer: {contents:?}"))]
    InvalidPointer {
        /// Dataset id.
        dataset_id: String,
        /// What the pointer file holds.
        contents: String,
    },

    /// Reading or writing the backing files failed.
    #[snafu(display("Canonical storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// A stored document could not be encoded or decoded.
    #[snafu(display("Canonical JSON error at {path}: {source}"))]
    Json {
        /// File being processed.
        path: String,
        /// Underlying serde_json error.
        source: serde_json::Error,
    },

    /// Failure reported by a custom implementation.
    #[snafu(display("Canonical backend error: {message}"))]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// Durable dataset storage consumed by [`crate::TieredStore`].
///
/// Implementations must be safe to call from many threads at once; batch
/// retrieval calls [`CanonicalStore::retrieve_item`] from a worker pool.
pub trait CanonicalStore: Send + Sync {
    /// Persist `records` and `metadata` under `dataset_id`, replacing what
    /// [`CanonicalStore::retrieve`] returns for it. Returns the dataset id.
    fn store(
        &self,
        dataset_id: &str,
        records: &[Record],
        metadata: &Metadata,
    ) -> CanonicalResult<String>;

    /// The latest records and metadata stored under `dataset_id`.
    fn retrieve(&self, dataset_id: &str) -> CanonicalResult<(Vec<Record>, Metadata)>;

    /// A single record addressed as `{dataset_id}/{row}`, as a JSON object.
    fn retrieve_item(&self, item_id: &str) -> CanonicalResult<Value> {
        let (dataset_id, row) = parse_item_id(item_id)?;
        let (mut records, _) = self.retrieve(dataset_id)?;
        if row >= records.len() {
            return ItemNotFoundSnafu { item_id }.fail();
        }
        Ok(Value::Object(records.swap_remove(row)))
    }
}

/// Item id of row `row` of `dataset_id`.
pub fn item_id(dataset_id: &str, row: usize) -> String {
    format!("{dataset_id}/{row}")
}

/// Split an item id into its dataset id and zero-based row.
pub fn parse_item_id(item_id: &str) -> CanonicalResult<(&str, usize)> {
    let parsed = item_id
        .rsplit_once('/')
        .filter(|(dataset_id, _)| !dataset_id.is_empty())
        .and_then(|(dataset_id, row)| row.parse().ok().map(|row| (dataset_id, row)));
    parsed.context(InvalidItemIdSnafu { item_id })
}

/// Reject ids that cannot be used as a file or directory name.
pub(crate) fn check_dataset_id(dataset_id: &str) -> CanonicalResult<()> {
    crate::record::validate_dataset_id(dataset_id)
        .map_err(|reason| CanonicalError::InvalidDatasetId {
            dataset_id: dataset_id.to_string(),
            reason,
        })
}
