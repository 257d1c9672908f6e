//! Error type of the public [`crate::TieredStore`] API.
//!
//! Only failures that leave the caller without an answer surface here.
//! Optimized-tier problems (encode/decode, file I/O, conversion during a
//! store) are logged and absorbed by the facade.

use snafu::prelude::*;

use crate::{
    canonical::CanonicalError, config::ConfigError, query::QueryError, table::ConversionError,
};

/// Result alias for [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by [`crate::TieredStore`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The configuration was rejected at construction.
    #[snafu(display("Invalid store configuration: {source}"))]
    Configuration {
        /// Underlying validation error.
        source: ConfigError,
    },

    /// The dataset id cannot name a file.
    #[snafu(display("Invalid dataset id '{dataset_id}': {reason}"))]
    InvalidDatasetId {
        /// The rejected id.
        dataset_id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// No tier knows the dataset.
    #[snafu(display("Dataset not found: {dataset_id}"))]
    NotFound {
        /// The unknown dataset id.
        dataset_id: String,
    },

    /// The canonical store failed. Always fatal to the call.
    #[snafu(display("Canonical store error: {source}"))]
    Canonical {
        /// Underlying canonical store error.
        source: CanonicalError,
    },

    /// Canonical records could not be materialized into a table on read.
    #[snafu(display("Dataset {dataset_id} cannot be converted to a table: {source}"))]
    Conversion {
        /// Dataset being read.
        dataset_id: String,
        /// Underlying conversion error.
        source: ConversionError,
    },

    /// Applying the query to the resolved table failed.
    #[snafu(display("Query on dataset {dataset_id} failed: {source}"))]
    Query {
        /// Dataset being queried.
        dataset_id: String,
        /// Underlying query error.
        source: QueryError,
    },

    /// The batch worker pool could not be started.
    #[snafu(display("Failed to build batch worker pool: {source}"))]
    WorkerPool {
        /// Underlying rayon error.
        source: rayon::ThreadPoolBuildError,
    },
}
