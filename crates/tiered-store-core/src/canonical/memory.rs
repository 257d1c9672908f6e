use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use snafu::OptionExt;

use super::{
    CanonicalResult, CanonicalStore, ItemNotFoundSnafu, NotFoundSnafu, check_dataset_id,
    parse_item_id,
};
use crate::record::{Metadata, Record};

/// A process-local canonical store. Each `store` replaces the dataset.
#[derive(Debug, Default)]
pub struct MemoryCanonicalStore {
    datasets: RwLock<HashMap<String, (Vec<Record>, Metadata)>>,
}

impl MemoryCanonicalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored datasets.
    pub fn len(&self) -> usize {
        self.datasets.read().len()
    }

    /// Whether no dataset has been stored.
    pub fn is_empty(&self) -> bool {
        self.datasets.read().is_empty()
    }
}

impl CanonicalStore for MemoryCanonicalStore {
    fn store(
        &self,
        dataset_id: &str,
        records: &[Record],
        metadata: &Metadata,
    ) -> CanonicalResult<String> {
        check_dataset_id(dataset_id)?;
        self.datasets
            .write()
            .insert(dataset_id.to_string(), (records.to_vec(), metadata.clone()));
        Ok(dataset_id.to_string())
    }

    fn retrieve(&self, dataset_id: &str) -> CanonicalResult<(Vec<Record>, Metadata)> {
        self.datasets
            .read()
            .get(dataset_id)
            .cloned()
            .context(NotFoundSnafu { dataset_id })
    }

    fn retrieve_item(&self, item_id: &str) -> CanonicalResult<Value> {
        let (dataset_id, row) = parse_item_id(item_id)?;
        let datasets = self.datasets.read();
        let (records, _) = datasets.get(dataset_id).context(NotFoundSnafu { dataset_id })?;
        let record = records.get(row).context(ItemNotFoundSnafu { item_id })?;
        Ok(Value::Object(record.clone()))
    }
}
