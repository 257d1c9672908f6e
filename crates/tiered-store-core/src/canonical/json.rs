//! Versioned JSON files on the local filesystem.
//!
//! Layout under the store root:
//!
//! ```text
//! canonical/<dataset_id>/0000000001.json
//! canonical/<dataset_id>/0000000002.json
//! canonical/<dataset_id>/CURRENT          -> "2"
//! ```
//!
//! Version files are created with create-new semantics and never modified.
//! `CURRENT` is replaced atomically after the version file is durable, so a
//! reader that follows it always finds a complete document.
//!
//! Because version files are immutable, parsed documents are kept in a small
//! LRU keyed by `(dataset_id, version)`. Item lookups from one batch then
//! parse each version once; only the `CURRENT` pointer is re-read per call.

use std::{num::NonZeroUsize, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;

use super::{
    CanonicalError, CanonicalResult, CanonicalStore, InvalidPointerSnafu, ItemNotFoundSnafu,
    JsonSnafu, NotFoundSnafu, StorageSnafu, VersionNotFoundSnafu, check_dataset_id,
    parse_item_id,
};
use crate::record::{Metadata, Record};
use crate::storage::{self, StorageError, StorageLocation, layout};

/// On-disk document for one stored version.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDataset {
    version: u64,
    stored_at: DateTime<Utc>,
    metadata: Metadata,
    records: Vec<Record>,
}

/// Parsed version documents kept in memory.
const DOCUMENT_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(16) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

type DocumentKey = (String, u64);

/// Canonical store keeping every version of a dataset as a JSON file.
#[derive(Debug)]
pub struct JsonCanonicalStore {
    location: StorageLocation,
    // Serializes version allocation between writers in this process.
    write_lock: Mutex<()>,
    documents: Mutex<LruCache<DocumentKey, Arc<StoredDataset>>>,
}

impl JsonCanonicalStore {
    /// Create a store rooted at `root`. Nothing is touched until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            location: StorageLocation::local(root),
            write_lock: Mutex::new(()),
            documents: Mutex::new(LruCache::new(DOCUMENT_CACHE_SIZE)),
        }
    }

    /// Stored versions of `dataset_id`, oldest first. Empty if none.
    pub fn versions(&self, dataset_id: &str) -> CanonicalResult<Vec<u64>> {
        check_dataset_id(dataset_id)?;
        let rel_dir = layout::canonical_rel_dir(dataset_id);
        let names = storage::list_file_names(&self.location, &rel_dir).context(StorageSnafu)?;
        let mut versions: Vec<u64> = names
            .iter()
            .filter_map(|name| layout::parse_version_file_name(name))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// The version `CURRENT` points at, or `None` if the dataset was never stored.
    pub fn current_version(&self, dataset_id: &str) -> CanonicalResult<Option<u64>> {
        check_dataset_id(dataset_id)?;
        let rel = layout::canonical_current_rel_path(dataset_id);
        let contents = match storage::read_to_string(&self.location, &rel) {
            Ok(contents) => contents,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(source) => return Err(CanonicalError::Storage { source }),
        };
        let version = contents.trim().parse::<u64>().ok().context(InvalidPointerSnafu {
            dataset_id,
            contents: &contents,
        })?;
        Ok(Some(version))
    }

    /// Records and metadata of a specific stored version.
    pub fn retrieve_version(
        &self,
        dataset_id: &str,
        version: u64,
    ) -> CanonicalResult<(Vec<Record>, Metadata)> {
        let doc = self.load(dataset_id, version)?;
        Ok((doc.records.clone(), doc.metadata.clone()))
    }

    /// The version document, parsed at most once while it stays cached.
    fn load(&self, dataset_id: &str, version: u64) -> CanonicalResult<Arc<StoredDataset>> {
        check_dataset_id(dataset_id)?;
        let key = (dataset_id.to_string(), version);
        if let Some(doc) = self.documents.lock().get(&key) {
            return Ok(Arc::clone(doc));
        }

        let rel = layout::canonical_version_rel_path(dataset_id, version);
        let raw = match storage::read_to_string(&self.location, &rel) {
            Ok(raw) => raw,
            Err(StorageError::NotFound { .. }) => {
                return VersionNotFoundSnafu {
                    dataset_id,
                    version,
                }
                .fail();
            }
            Err(source) => return Err(CanonicalError::Storage { source }),
        };
        let doc: StoredDataset = serde_json::from_str(&raw).context(JsonSnafu {
            path: rel.display().to_string(),
        })?;
        let doc = Arc::new(doc);
        self.documents.lock().put(key, Arc::clone(&doc));
        Ok(doc)
    }

    fn current_document(&self, dataset_id: &str) -> CanonicalResult<Arc<StoredDataset>> {
        match self.current_version(dataset_id)? {
            Some(version) => self.load(dataset_id, version),
            None => NotFoundSnafu { dataset_id }.fail(),
        }
    }
}

impl CanonicalStore for JsonCanonicalStore {
    fn store(
        &self,
        dataset_id: &str,
        records: &[Record],
        metadata: &Metadata,
    ) -> CanonicalResult<String> {
        check_dataset_id(dataset_id)?;
        let _guard = self.write_lock.lock();

        let latest = self.versions(dataset_id)?.last().copied().unwrap_or(0);
        let version = latest.max(self.current_version(dataset_id)?.unwrap_or(0)) + 1;

        let rel = layout::canonical_version_rel_path(dataset_id, version);
        let doc = StoredDataset {
            version,
            stored_at: Utc::now(),
            metadata: metadata.clone(),
            records: records.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).context(JsonSnafu {
            path: rel.display().to_string(),
        })?;

        storage::write_new(&self.location, &rel, &bytes).context(StorageSnafu)?;
        storage::write_atomic(
            &self.location,
            &layout::canonical_current_rel_path(dataset_id),
            format!("{version}\n").as_bytes(),
        )
        .context(StorageSnafu)?;

        debug!("Stored canonical dataset {dataset_id} version {version}");
        Ok(dataset_id.to_string())
    }

    fn retrieve(&self, dataset_id: &str) -> CanonicalResult<(Vec<Record>, Metadata)> {
        let doc = self.current_document(dataset_id)?;
        Ok((doc.records.clone(), doc.metadata.clone()))
    }

    fn retrieve_item(&self, item_id: &str) -> CanonicalResult<Value> {
        let (dataset_id, row) = parse_item_id(item_id)?;
        let doc = self.current_document(dataset_id)?;
        let record = doc.records.get(row).context(ItemNotFoundSnafu { item_id })?;
        Ok(Value::Object(record.clone()))
    }
}
