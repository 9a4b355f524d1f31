//! Local persistent store
//!
//! The node-local configuration database that staged changes write into and
//! RDB callback handlers prepare against. Keys are slash-separated strings,
//! values are JSON.
//!
//! # Guarantees required of every implementation
//!
//! - Each `put`/`delete` is atomic: it either fully happens or not at all
//! - A `write_batch` is applied as one unit: all of it or none of it
//! - Safe to call from several threads (`&self` with interior locking)

mod checksum;
mod errors;
mod file;
mod memory;

pub use checksum::compute_checksum;
pub use errors::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;

use serde_json::Value;

/// Durable key/value capability used by staged changes and RDB handlers.
pub trait LocalStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Insert or replace a value.
    fn put(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Remove a value. Returns whether it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All keys starting with `prefix`, in ascending order.
    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Apply several writes atomically. `None` removes the key.
    fn write_batch(&self, batch: Vec<(String, Option<Value>)>) -> StoreResult<()>;
}

/// Restore `key` to a previously captured value: re-put it, or delete the
/// key if it did not exist.
pub fn restore_value(store: &dyn LocalStore, key: &str, previous: Option<Value>) -> StoreResult<()> {
    match previous {
        Some(value) => store.put(key, value),
        None => store.delete(key).map(|_| ()),
    }
}
