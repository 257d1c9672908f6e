//! The optimized tier: one encoded file per dataset.
//!
//! Files live at `<root>/optimized/<dataset_id>.<ext>`, where the extension is
//! decided by the store's serializer. Writes stream through an [`OutputSink`]
//! so a reader sees either the previous file or the complete new one.

use std::{path::PathBuf, sync::Arc};

use snafu::prelude::*;

use crate::format::{DecodeOptions, FormatResult, Serializer, StorageFormat, StorageSnafu};
use crate::storage::{self, OutputSink, StorageLocation, StorageResult, layout};
use crate::table::Table;

/// Reads and writes optimized dataset files with a single serializer.
#[derive(Debug, Clone)]
pub struct OptimizedStore {
    location: StorageLocation,
    serializer: Arc<dyn Serializer>,
}

impl OptimizedStore {
    /// Create a store rooted at `location` that encodes with `serializer`.
    pub fn new(location: StorageLocation, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            location,
            serializer,
        }
    }

    /// Format of the files this store writes.
    pub fn format(&self) -> StorageFormat {
        self.serializer.format()
    }

    fn rel_path(&self, dataset_id: &str) -> PathBuf {
        layout::optimized_rel_path(dataset_id, self.format())
    }

    /// Absolute path of the optimized file for `dataset_id`.
    pub fn path_for(&self, dataset_id: &str) -> PathBuf {
        self.location.resolve(&self.rel_path(dataset_id))
    }

    /// Whether an optimized file exists for `dataset_id`.
    pub fn exists(&self, dataset_id: &str) -> StorageResult<bool> {
        storage::file_exists(&self.location, &self.rel_path(dataset_id))
    }

    /// Encode `table` and atomically replace the dataset's optimized file.
    pub fn write(&self, dataset_id: &str, table: &Table) -> FormatResult<()> {
        let format = self.format();
        let mut sink = OutputSink::open(&self.location, &self.rel_path(dataset_id))
            .context(StorageSnafu { format })?;
        self.serializer.encode(table, &mut sink)?;
        sink.finish().context(StorageSnafu { format })
    }

    /// Decode the dataset's optimized file, or `Ok(None)` if there is none.
    pub fn read(&self, dataset_id: &str, options: &DecodeOptions) -> FormatResult<Option<Table>> {
        let format = self.format();
        if !self.exists(dataset_id).context(StorageSnafu { format })? {
            return Ok(None);
        }
        self.serializer
            .decode(&self.path_for(dataset_id), options)
            .map(Some)
    }

    /// Delete the dataset's optimized file. A missing file is not an error.
    pub fn remove(&self, dataset_id: &str) -> StorageResult<()> {
        storage::remove_file(&self.location, &self.rel_path(dataset_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{GenericSerializer, SerializerOptions};
    use crate::record::Record;
    use serde_json::{Value, json};
    use std::fs;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn store(dir: &TempDir) -> OptimizedStore {
        OptimizedStore::new(
            StorageLocation::local(dir.path()),
            Arc::new(GenericSerializer::new(SerializerOptions::default())),
        )
    }

    fn table(value: i64) -> Result<Table, Box<dyn std::error::Error>> {
        let row = match json!({ "timestamp": "2024-01-01T00:00:00Z", "value": value }) {
            Value::Object(map) => map,
            _ => Record::new(),
        };
        Ok(Table::from_records(&[row], &Record::new())?)
    }

    #[test]
    fn read_missing_dataset_is_none() -> TestResult {
        let dir = TempDir::new()?;
        assert!(store(&dir).read("absent", &DecodeOptions::default())?.is_none());
        Ok(())
    }

    #[test]
    fn write_replaces_previous_file() -> TestResult {
        let dir = TempDir::new()?;
        let store = store(&dir);

        store.write("ds", &table(1)?)?;
        store.write("ds", &table(2)?)?;

        assert_eq!(store.path_for("ds"), dir.path().join("optimized/ds.pkl"));
        let back = store.read("ds", &DecodeOptions::default())?;
        assert_eq!(back, Some(table(2)?));

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("optimized"))?
            .filter_map(Result::ok)
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
        Ok(())
    }

    #[test]
    fn remove_deletes_file() -> TestResult {
        let dir = TempDir::new()?;
        let store = store(&dir);
        store.write("ds", &table(1)?)?;
        store.remove("ds")?;
        assert!(!store.exists("ds")?);
        store.remove("ds")?;
        Ok(())
    }

    #[test]
    fn write_fails_when_directory_cannot_be_created() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("optimized"), b"blocker")?;
        let err = store(&dir).write("ds", &table(1)?);
        assert!(matches!(err, Err(crate::format::FormatError::Storage { .. })));
        Ok(())
    }
}
