//! Parallel retrieval of individual items from the canonical store.
//!
//! A [`BatchCoordinator`] owns a fixed-size rayon pool built once at store
//! construction. Each distinct item id becomes one task; a task's error or
//! panic is recorded against that id alone and never affects its siblings.

use std::{
    any::Any,
    collections::{BTreeSet, HashMap},
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use rayon::prelude::*;
use serde_json::Value;
use snafu::prelude::*;

use crate::canonical::{CanonicalError, CanonicalStore};

/// Upper bound on the default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 32;

/// Outcome of fetching one item.
pub type BatchItem = Result<Value, ItemFetchError>;

/// Why a single item of a batch could not be returned.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ItemFetchError {
    /// The canonical store reported an error for this item.
    #[snafu(display("Failed to fetch item {item_id}: {source}"))]
    Fetch {
        /// The item that failed.
        item_id: String,
        /// Error reported by the canonical store.
        source: CanonicalError,
    },

    /// The fetch panicked.
    #[snafu(display("Fetching item {item_id} panicked: {message}"))]
    Panicked {
        /// The item that failed.
        item_id: String,
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// `min(32, available parallelism)`, and at least 1.
pub fn default_max_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

/// Fans item fetches out over a bounded worker pool.
pub struct BatchCoordinator {
    pool: rayon::ThreadPool,
    canonical: Arc<dyn CanonicalStore>,
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("workers", &self.workers())
            .finish_non_exhaustive()
    }
}

impl BatchCoordinator {
    /// Build a coordinator with a pool of `max_workers` threads.
    pub fn new(
        max_workers: NonZeroUsize,
        canonical: Arc<dyn CanonicalStore>,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers.get())
            .thread_name(|i| format!("tiered-store-batch-{i}"))
            .build()?;
        Ok(Self { pool, canonical })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Fetch every id in `item_ids`, blocking until all have finished.
    ///
    /// The result has exactly one entry per distinct requested id.
    pub fn retrieve<S: AsRef<str>>(&self, item_ids: &[S]) -> HashMap<String, BatchItem> {
        let unique: BTreeSet<&str> = item_ids.iter().map(AsRef::as_ref).collect();
        let canonical = &self.canonical;

        self.pool.install(|| {
            unique
                .into_par_iter()
                .map(|item_id| (item_id.to_string(), fetch_one(&**canonical, item_id)))
                .collect()
        })
    }
}

fn fetch_one(canonical: &dyn CanonicalStore, item_id: &str) -> BatchItem {
    match panic::catch_unwind(AssertUnwindSafe(|| canonical.retrieve_item(item_id))) {
        Ok(result) => result.context(FetchSnafu { item_id }),
        Err(payload) => PanickedSnafu {
            item_id,
            message: panic_message(payload.as_ref()),
        }
        .fail(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::MemoryCanonicalStore;
    use crate::record::{Metadata, Record};
    use serde_json::json;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// Panics for one dataset, delegates everything else.
    struct Flaky(MemoryCanonicalStore);

    impl CanonicalStore for Flaky {
        fn store(
            &self,
            id: &str,
            records: &[Record],
            metadata: &Metadata,
        ) -> Result<String, CanonicalError> {
            self.0.store(id, records, metadata)
        }

        fn retrieve(&self, id: &str) -> Result<(Vec<Record>, Metadata), CanonicalError> {
            if id == "boom" {
                panic!("backend exploded");
            }
            self.0.retrieve(id)
        }
    }

    fn coordinator(
        store: impl CanonicalStore + 'static,
    ) -> Result<BatchCoordinator, Box<dyn std::error::Error>> {
        let workers = NonZeroUsize::new(4).ok_or("zero workers")?;
        Ok(BatchCoordinator::new(workers, Arc::new(store))?)
    }

    fn seeded() -> Result<MemoryCanonicalStore, CanonicalError> {
        let store = MemoryCanonicalStore::new();
        let rows: Vec<Record> = (0..3)
            .filter_map(|i| json!({ "timestamp": "2024-01-01", "i": i }).as_object().cloned())
            .collect();
        store.store("ds", &rows, &Metadata::new())?;
        Ok(store)
    }

    #[test]
    fn partial_failure_is_isolated() -> TestResult {
        let batch = coordinator(seeded()?)?;
        let out = batch.retrieve(&["ds/1", "missing/0", "ds/1", "ds/9", "not-an-id"]);

        assert_eq!(out.len(), 4);
        assert_eq!(
            out.get("ds/1").and_then(|r| r.as_ref().ok()),
            Some(&json!({ "timestamp": "2024-01-01", "i": 1 }))
        );
        assert!(matches!(
            out.get("missing/0"),
            Some(Err(ItemFetchError::Fetch { source: CanonicalError::NotFound { .. }, .. }))
        ));
        assert!(matches!(
            out.get("ds/9"),
            Some(Err(ItemFetchError::Fetch { source: CanonicalError::ItemNotFound { .. }, .. }))
        ));
        assert!(matches!(
            out.get("not-an-id"),
            Some(Err(ItemFetchError::Fetch { source: CanonicalError::InvalidItemId { .. }, .. }))
        ));
        Ok(())
    }

    #[test]
    fn panics_are_captured_per_item() -> TestResult {
        let batch = coordinator(Flaky(seeded()?))?;
        let out = batch.retrieve(&["boom/0".to_string(), "ds/0".to_string()]);

        assert!(out.get("ds/0").is_some_and(Result::is_ok));
        match out.get("boom/0") {
            Some(Err(ItemFetchError::Panicked { message, .. })) => {
                assert_eq!(message, "backend exploded");
            }
            other => return Err(format!("expected a captured panic, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn empty_batch_is_empty() -> TestResult {
        let batch = coordinator(MemoryCanonicalStore::new())?;
        assert!(batch.retrieve::<&str>(&[]).is_empty());
        assert_eq!(batch.workers(), 4);
        Ok(())
    }

    #[test]
    fn default_workers_is_bounded() {
        let workers = default_max_workers();
        assert!((1..=MAX_DEFAULT_WORKERS).contains(&workers));
    }
}
