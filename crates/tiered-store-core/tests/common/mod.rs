//! Shared fixtures for the facade-level integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use serde_json::{Value, json};
use tiered_store_core::{
    CanonicalError, CanonicalStore, FormatError, Metadata, Record, Serializer, StorageFormat,
    StoreConfig, Table,
    format::{DecodeOptions, FormatResult},
    storage::OutputSink,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records from a JSON array of objects.
pub fn records(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        other => panic!("expected a JSON array, got {other}"),
    }
}

/// Metadata from a JSON object.
pub fn metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Three daily readings with values 10, 20 and 30.
pub fn daily_readings() -> Vec<Record> {
    records(json!([
        { "timestamp": "2024-01-01T00:00:00Z", "value": 10, "temp": 20.5, "site": "north" },
        { "timestamp": "2024-01-02T00:00:00Z", "value": 20, "temp": 21.25, "site": "south",
          "tags": { "calibrated": true } },
        { "timestamp": "2024-01-03T00:00:00Z", "value": 30, "temp": 19.0, "site": "north",
          "flags": [1, 2] }
    ]))
}

pub fn sensor_metadata() -> Metadata {
    metadata(json!({ "source": "integration", "schema_version": 2, "item_count": 3 }))
}

/// Store config rooted at `root` with a small worker pool.
pub fn config(root: &Path, format: StorageFormat) -> StoreConfig {
    StoreConfig::new(root)
        .with_storage_format(format)
        .with_max_workers(4)
}

/// Integer `value` column of a table, row order preserved.
pub fn values(table: &Table) -> Vec<i64> {
    table
        .to_records()
        .expect("table renders to records")
        .iter()
        .filter_map(|r| r.get("value").and_then(Value::as_i64))
        .collect()
}

/// Sort records by their JSON rendering so set equality can be asserted.
pub fn sorted(mut rows: Vec<Record>) -> Vec<Record> {
    rows.sort_by_cached_key(|r| Value::Object(r.clone()).to_string());
    rows
}

/// Canonical store wrapper that counts `retrieve` calls.
pub struct CountingCanonical {
    inner: Arc<dyn CanonicalStore>,
    retrieves: AtomicUsize,
}

impl CountingCanonical {
    pub fn new(inner: impl CanonicalStore + 'static) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(inner),
            retrieves: AtomicUsize::new(0),
        })
    }

    pub fn retrieves(&self) -> usize {
        self.retrieves.load(Ordering::SeqCst)
    }
}

impl CanonicalStore for CountingCanonical {
    fn store(
        &self,
        dataset_id: &str,
        records: &[Record],
        metadata: &Metadata,
    ) -> Result<String, CanonicalError> {
        self.inner.store(dataset_id, records, metadata)
    }

    fn retrieve(&self, dataset_id: &str) -> Result<(Vec<Record>, Metadata), CanonicalError> {
        self.retrieves.fetch_add(1, Ordering::SeqCst);
        self.inner.retrieve(dataset_id)
    }
}

/// A serializer whose backing dependency is reported missing.
#[derive(Debug)]
pub struct UnavailableSerializer(pub StorageFormat);

impl Serializer for UnavailableSerializer {
    fn format(&self) -> StorageFormat {
        self.0
    }

    fn is_available(&self) -> bool {
        false
    }

    fn encode(&self, _table: &Table, _sink: &mut OutputSink) -> FormatResult<()> {
        panic!("an unavailable serializer must never be selected")
    }

    fn decode(&self, _path: &Path, _options: &DecodeOptions) -> FormatResult<Table> {
        panic!("an unavailable serializer must never be selected")
    }
}

/// Wraps a serializer and fails every encode while `failing` is set.
#[derive(Debug)]
pub struct SwitchableSerializer {
    inner: Arc<dyn Serializer>,
    pub failing: AtomicBool,
}

impl SwitchableSerializer {
    pub fn new(inner: Arc<dyn Serializer>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing: AtomicBool::new(false),
        })
    }
}

impl Serializer for SwitchableSerializer {
    fn format(&self) -> StorageFormat {
        self.inner.format()
    }

    fn is_available(&self) -> bool {
        true
    }

    fn encode(&self, table: &Table, sink: &mut OutputSink) -> FormatResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FormatError::MissingKey {
                path: sink.final_path().display().to_string(),
                key: "injected encode failure".to_string(),
            });
        }
        self.inner.encode(table, sink)
    }

    fn decode(&self, path: &Path, options: &DecodeOptions) -> FormatResult<Table> {
        self.inner.decode(path, options)
    }
}
