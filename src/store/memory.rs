//! In-process record store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::{Record, RecordStore, StoreError, TableBinding};

type Tables = HashMap<TableBinding, BTreeMap<String, Record>>;

/// Tables held in memory, keyed by the JSON text of each record's id so
/// `"1"` and `1` stay distinct.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    writes: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with one table pre-populated.
    pub fn with_records(binding: &TableBinding, records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(binding, record);
        }
        store
    }

    /// Seed a record without counting it as a write. Records without an id
    /// are ignored.
    pub fn insert(&self, binding: &TableBinding, record: Record) {
        let Some(key) = record.id().map(Value::to_string) else {
            return;
        };
        self.lock()
            .entry(binding.clone())
            .or_default()
            .insert(key, record);
    }

    /// Current stored value for `id`, if any.
    pub fn record(&self, binding: &TableBinding, id: &Value) -> Option<Record> {
        self.lock()
            .get(binding)
            .and_then(|table| table.get(&id.to_string()))
            .cloned()
    }

    /// Number of successful [`RecordStore::replace`] calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, table: &TableBinding, id: &Value) -> Result<Option<Record>, StoreError> {
        self.ensure_open()?;
        Ok(self.record(table, id))
    }

    fn all(&self, table: &TableBinding) -> Result<Vec<Record>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .lock()
            .get(table)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn replace(&self, table: &TableBinding, record: &Record) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = record
            .id()
            .map(Value::to_string)
            .ok_or_else(|| StoreError::Write("record has no id".to_string()))?;
        self.lock()
            .entry(table.clone())
            .or_default()
            .insert(key, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
