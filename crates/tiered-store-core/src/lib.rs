//! Tiered storage for timestamped datasets.
//!
//! This crate puts a caching and multi-format persistence layer in front of a
//! simpler canonical dataset store:
//!
//! - A canonical store (`canonical` module) that owns durability. Every write
//!   lands there first and every optimized tier can be rebuilt from it.
//! - Interchangeable on-disk serializers (`format` module) for Parquet, Arrow
//!   IPC file and Arrow IPC stream encodings, resolved once against the
//!   features compiled into the crate.
//! - One optimized file per dataset (`storage` module), written with
//!   temp-file-then-rename semantics.
//! - A bounded LRU cache of materialized tables (`cache` module).
//! - Vectorized, day-aligned time range filtering and column projection
//!   (`query` module).
//! - A bounded worker pool for per-item batch fetches with per-item failure
//!   isolation (`batch` module).
//!
//! [`TieredStore`] wires these together and is the entry point most callers
//! need.
#![deny(missing_docs)]

pub mod batch;
pub mod cache;
pub mod canonical;
pub mod config;
pub mod format;
pub mod query;
pub mod record;
pub mod storage;
pub mod store;
pub mod table;

pub use batch::{BatchItem, ItemFetchError};
pub use cache::CacheStats;
pub use canonical::{CanonicalError, CanonicalStore, JsonCanonicalStore, MemoryCanonicalStore};
pub use config::{ConfigError, StoreConfig};
pub use format::{FormatError, Serializer, StorageFormat};
pub use query::{Query, QueryError};
pub use record::{Metadata, Record, TIMESTAMP_FIELD};
pub use store::{StoreError, StoreResult, TieredStore};
pub use table::{ConversionError, Table};
