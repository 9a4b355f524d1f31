//! In-memory local store
//!
//! Used for tests and for nodes whose configuration is rebuilt at boot.
//! Counts durable writes so callers can assert that a failed validation
//! touched nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use super::errors::{StoreError, StoreResult};
use super::LocalStore;

/// Mutex-guarded ordered map implementing [`LocalStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
    writes: AtomicU64,
    reject_writes: AtomicBool,
    reject_reads: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put`/`delete`/`write_batch` calls since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail with `Unavailable` until reset.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Make every subsequent read fail with `Unavailable` until reset.
    pub fn set_reject_reads(&self, reject: bool) {
        self.reject_reads.store(reject, Ordering::SeqCst);
    }

    /// Copy of the full contents.
    pub fn snapshot(&self) -> StoreResult<BTreeMap<String, Value>> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes rejected".into()));
        }
        Ok(())
    }

    fn check_readable(&self) -> StoreResult<()> {
        if self.reject_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads rejected".into()));
        }
        Ok(())
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.check_readable()?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        self.check_writable()?;
        self.lock()?.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_writable()?;
        let existed = self.lock()?.remove(key).is_some();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(existed)
    }

    fn write_batch(&self, batch: Vec<(String, Option<Value>)>) -> StoreResult<()> {
        self.check_writable()?;
        let mut entries = self.lock()?;
        for (key, value) in batch {
            match value {
                Some(value) => entries.insert(key, value),
                None => entries.remove(&key),
            };
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_readable()?;
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
