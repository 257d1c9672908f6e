//! Store configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration:
//!
//! ```
//! use tiered_store_core::{StorageFormat, StoreConfig};
//!
//! let config = StoreConfig::from_json_str(r#"{ "storage_format": "generic", "cache_size": 8 }"#)?;
//! assert_eq!(config.storage_format, StorageFormat::GenericBinary);
//! assert_eq!(config.batch_size, 1000);
//! # Ok::<(), tiered_store_core::ConfigError>(())
//! ```

use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::batch::default_max_workers;
use crate::format::{SerializerOptions, StorageFormat};

/// Errors produced while loading or validating a [`StoreConfig`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// A numeric setting is out of range.
    #[snafu(display("Invalid configuration value for {field}: {reason}"))]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The base path cannot host a store.
    #[snafu(display("Invalid base path {}: {reason}", path.display()))]
    BasePath {
        /// The configured base path.
        path: PathBuf,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The configuration file could not be read.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    Read {
        /// The file that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration document is not valid.
    #[snafu(display("Failed to parse configuration: {source}"))]
    Parse {
        /// Underlying serde_json error.
        source: serde_json::Error,
    },
}

/// Settings for a [`crate::TieredStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Preferred on-disk format. Falls back to generic if unavailable.
    pub storage_format: StorageFormat,
    /// Maximum number of tables held in memory.
    pub cache_size: usize,
    /// Rows per written row group and per decoded batch.
    pub batch_size: usize,
    /// Worker threads for batch retrieval.
    pub max_workers: usize,
    /// Memory-map optimized files on read (columnar format only).
    pub use_memory_mapping: bool,
    /// Root directory of the store.
    pub base_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_format: StorageFormat::default(),
            cache_size: 128,
            batch_size: 1000,
            max_workers: default_max_workers(),
            use_memory_mapping: true,
            base_path: PathBuf::from("./data"),
        }
    }
}

impl StoreConfig {
    /// Defaults rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Set the preferred storage format.
    pub fn with_storage_format(mut self, format: StorageFormat) -> Self {
        self.storage_format = format;
        self
    }

    /// Set the cache capacity.
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the batch retrieval worker count.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Enable or disable memory-mapped reads.
    pub fn with_memory_mapping(mut self, enabled: bool) -> Self {
        self.use_memory_mapping = enabled;
        self
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).context(ParseSnafu)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).context(ReadSnafu { path })?;
        Self::from_json_str(&raw)
    }

    /// Check every constraint a store relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache_capacity()?;
        non_zero("batch_size", self.batch_size)?;
        self.worker_count()?;

        ensure!(
            !self.base_path.as_os_str().is_empty(),
            BasePathSnafu {
                path: &self.base_path,
                reason: "path is empty",
            }
        );
        ensure!(
            !self.base_path.is_file(),
            BasePathSnafu {
                path: &self.base_path,
                reason: "path is an existing regular file",
            }
        );
        Ok(())
    }

    /// `cache_size` as a non-zero capacity.
    pub fn cache_capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        non_zero("cache_size", self.cache_size)
    }

    /// `max_workers` as a non-zero thread count.
    pub fn worker_count(&self) -> Result<NonZeroUsize, ConfigError> {
        non_zero("max_workers", self.max_workers)
    }

    /// Options handed to the built-in serializers.
    pub fn serializer_options(&self) -> SerializerOptions {
        SerializerOptions {
            batch_size: self.batch_size,
            use_memory_mapping: self.use_memory_mapping,
        }
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<NonZeroUsize, ConfigError> {
    NonZeroUsize::new(value).context(InvalidValueSnafu {
        field,
        reason: "must be greater than zero",
    })
}
