//! The tiered store facade.
//!
//! A [`TieredStore`] layers three representations of each dataset:
//!
//! 1. the canonical store (durable, authoritative, owned by the caller),
//! 2. one optimized file per dataset under `<base_path>/optimized/`,
//! 3. an in-memory LRU cache of decoded tables.
//!
//! Writes reach the canonical store first; its failure is the only failure a
//! store call reports. The optimized file and cache entry are then refreshed
//! best-effort. Reads walk the tiers top-down (cache, optimized file,
//! canonical store) and populate every tier they missed on the way back.
//!
//! Optimized-tier failures never fail a call. They are logged at `warn`
//! level and the stale optimized state for the dataset is dropped, so a
//! later read rebuilds it from the canonical store instead of serving an
//! outdated copy.

mod error;

use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use log::{debug, info, warn};
use snafu::prelude::*;

pub use error::{StoreError, StoreResult};

use crate::{
    batch::{BatchCoordinator, BatchItem},
    cache::{CacheStats, TableCache},
    canonical::{CanonicalError, CanonicalStore},
    config::StoreConfig,
    format::{
        DecodeOptions, Serializer, StorageFormat, default_serializers,
        selector::{Resolution, resolve_format},
    },
    query::{self, Query},
    record::{Metadata, Record, validate_dataset_id},
    storage::{OptimizedStore, StorageLocation},
    table::Table,
};
use error::{
    CanonicalSnafu, ConfigurationSnafu, ConversionSnafu, NotFoundSnafu, QuerySnafu,
    WorkerPoolSnafu,
};

/// Tiered dataset store. Share it between threads with an [`Arc`].
pub struct TieredStore {
    config: StoreConfig,
    resolution: Resolution,
    canonical: Arc<dyn CanonicalStore>,
    optimized: OptimizedStore,
    cache: TableCache,
    batch: BatchCoordinator,
}

impl fmt::Debug for TieredStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredStore")
            .field("config", &self.config)
            .field("format", &self.format())
            .field("cache", &self.cache)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

impl TieredStore {
    /// Build a store over `canonical` with the built-in serializers.
    pub fn new(config: StoreConfig, canonical: Arc<dyn CanonicalStore>) -> StoreResult<Self> {
        let serializers = default_serializers(config.serializer_options());
        Self::with_serializers(config, canonical, serializers)
    }

    /// Build a store choosing its serializer from `serializers`.
    ///
    /// The configured format is used if one of `serializers` provides it and
    /// is available; otherwise the store falls back to the generic format.
    pub fn with_serializers(
        config: StoreConfig,
        canonical: Arc<dyn CanonicalStore>,
        serializers: Vec<Arc<dyn Serializer>>,
    ) -> StoreResult<Self> {
        config.validate().context(ConfigurationSnafu)?;
        let capacity = config.cache_capacity().context(ConfigurationSnafu)?;
        let workers = config.worker_count().context(ConfigurationSnafu)?;

        let resolution = resolve_format(
            config.storage_format,
            &serializers,
            config.serializer_options(),
        );
        let optimized = OptimizedStore::new(
            StorageLocation::local(&config.base_path),
            Arc::clone(&resolution.serializer),
        );
        let batch =
            BatchCoordinator::new(workers, Arc::clone(&canonical)).context(WorkerPoolSnafu)?;

        info!(
            "Opened tiered store at {} (format {}, cache {} tables, {} batch workers)",
            config.base_path.display(),
            resolution.resolved(),
            capacity,
            workers
        );

        Ok(Self {
            config,
            resolution,
            canonical,
            optimized,
            cache: TableCache::new(capacity),
            batch,
        })
    }

    /// Persist a dataset and refresh its optimized representations.
    ///
    /// Returns the dataset id once the canonical store has accepted the
    /// records, even if the optimized file or cache could not be updated.
    pub fn store_dataset_optimized(
        &self,
        dataset_id: &str,
        records: &[Record],
        metadata: &Metadata,
    ) -> StoreResult<String> {
        check_dataset_id(dataset_id)?;
        let stored_id = self
            .canonical
            .store(dataset_id, records, metadata)
            .context(CanonicalSnafu)?;

        match Table::from_records(records, metadata) {
            Ok(table) => self.promote(&stored_id, table),
            Err(e) => {
                warn!(
                    "Failed to convert dataset {stored_id} to a table: {e}. \
                     Stored in the canonical store only."
                );
                self.invalidate(&stored_id);
            }
        }
        Ok(stored_id)
    }

    /// Retrieve a dataset, filtered by `query`.
    pub fn retrieve_dataset_optimized(
        &self,
        dataset_id: &str,
        query: &Query,
    ) -> StoreResult<Table> {
        let table = self.resolve(dataset_id)?;
        query::filter(&table, query).context(QuerySnafu { dataset_id })
    }

    /// Retrieve a whole dataset and hand it to `predicate`.
    pub fn retrieve_filtered_dataset<F>(&self, dataset_id: &str, predicate: F) -> StoreResult<Table>
    where
        F: FnOnce(Table) -> Table,
    {
        self.resolve(dataset_id).map(predicate)
    }

    /// Fetch individual items (`{dataset_id}/{row}`) from the canonical store
    /// in parallel. Every distinct id gets its own result.
    pub fn batch_retrieve<S: AsRef<str>>(&self, item_ids: &[S]) -> HashMap<String, BatchItem> {
        self.batch.retrieve(item_ids)
    }

    /// The configuration the store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The format optimized files are written in.
    pub fn format(&self) -> StorageFormat {
        self.resolution.resolved()
    }

    /// Whether the configured format was unavailable and replaced.
    pub fn format_fell_back(&self) -> bool {
        self.resolution.fell_back()
    }

    /// Cache hit, miss and eviction counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Whether `dataset_id` is currently cached. Does not affect recency.
    pub fn is_cached(&self, dataset_id: &str) -> bool {
        self.cache.contains(dataset_id)
    }

    /// Where the optimized file for `dataset_id` lives.
    pub fn optimized_path(&self, dataset_id: &str) -> PathBuf {
        self.optimized.path_for(dataset_id)
    }

    /// Resolve the full table for `dataset_id` through the tiers.
    fn resolve(&self, dataset_id: &str) -> StoreResult<Table> {
        check_dataset_id(dataset_id)?;

        if let Some(table) = self.cache.get(dataset_id) {
            debug!("Dataset {dataset_id} served from cache");
            return Ok(table);
        }

        match self.optimized.read(dataset_id, &DecodeOptions::default()) {
            Ok(Some(table)) => {
                debug!("Dataset {dataset_id} served from optimized file");
                self.cache.put(dataset_id, table.clone());
                return Ok(table);
            }
            Ok(None) => debug!("Dataset {dataset_id} has no optimized file"),
            Err(e) => warn!(
                "Failed to read optimized file for dataset {dataset_id}: {e}. \
                 Falling back to the canonical store."
            ),
        }

        let (records, metadata) = match self.canonical.retrieve(dataset_id) {
            Ok(found) => found,
            Err(CanonicalError::NotFound { .. }) => return NotFoundSnafu { dataset_id }.fail(),
            Err(source) => return Err(StoreError::Canonical { source }),
        };
        debug!("Dataset {dataset_id} served from canonical store");

        let table =
            Table::from_records(&records, &metadata).context(ConversionSnafu { dataset_id })?;
        self.promote(dataset_id, table.clone());
        Ok(table)
    }

    /// Write the optimized file and cache entry for `dataset_id`.
    fn promote(&self, dataset_id: &str, table: Table) {
        if let Err(e) = self.optimized.write(dataset_id, &table) {
            warn!(
                "Failed to write optimized file for dataset {dataset_id}: {e}. \
                 Reads will fall back to the canonical store."
            );
            self.remove_optimized_file(dataset_id);
        }
        self.cache.put(dataset_id, table);
    }

    /// Drop every optimized representation of `dataset_id`.
    fn invalidate(&self, dataset_id: &str) {
        self.cache.remove(dataset_id);
        self.remove_optimized_file(dataset_id);
    }

    fn remove_optimized_file(&self, dataset_id: &str) {
        if let Err(e) = self.optimized.remove(dataset_id) {
            warn!("Failed to remove stale optimized file for dataset {dataset_id}: {e}");
        }
    }
}

fn check_dataset_id(dataset_id: &str) -> StoreResult<()> {
    validate_dataset_id(dataset_id).map_err(|reason| StoreError::InvalidDatasetId {
        dataset_id: dataset_id.to_string(),
        reason,
    })
}
