//! File-backed local store
//!
//! The whole key space lives in one JSON document, `keydb.json`, under the
//! data directory:
//!
//! ```text
//! { "checksum": <crc32 of entries>, "entries": { "<key>": <value>, ... } }
//! ```
//!
//! Every mutation rewrites the document with the atomic write pattern:
//! 1. Write to temp file
//! 2. fsync temp file
//! 3. Rename temp to final (atomic on POSIX)
//! 4. fsync the directory
//!
//! The in-memory copy is only replaced after the rename succeeds, so a failed
//! write leaves both disk and memory at the previous contents.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::checksum::{compute_checksum, verify_checksum};
use super::errors::{StoreError, StoreResult};
use super::LocalStore;

const STORE_FILE_NAME: &str = "keydb.json";

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    checksum: u32,
    entries: BTreeMap<String, Value>,
}

/// Durable [`LocalStore`] backed by a single checksummed JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    temp_path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Open the store under `data_dir`, creating the directory if needed.
    ///
    /// A missing file is an empty store. A file whose checksum does not match
    /// its contents is rejected as corrupted.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(STORE_FILE_NAME);
        let temp_path = data_dir.join(format!("{}.tmp", STORE_FILE_NAME));

        let entries = if path.exists() {
            Self::load(&path)?
        } else {
            BTreeMap::new()
        };

        // Leftover from an interrupted write; the renamed file is authoritative.
        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }

        Ok(Self {
            path,
            temp_path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> StoreResult<BTreeMap<String, Value>> {
        let content = fs::read(path)?;
        let document: StoreDocument = serde_json::from_slice(&content)
            .map_err(|e| StoreError::Corrupted(format!("unparseable store file: {}", e)))?;

        let encoded = serde_json::to_vec(&document.entries)?;
        if !verify_checksum(&encoded, document.checksum) {
            return Err(StoreError::Corrupted(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        Ok(document.entries)
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> StoreResult<()> {
        let encoded = serde_json::to_vec(entries)?;
        let document = StoreDocument {
            checksum: compute_checksum(&encoded),
            entries: entries.clone(),
        };
        let content = serde_json::to_vec_pretty(&document)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.temp_path)?;
        file.write_all(&content)?;
        file.sync_all()?;

        fs::rename(&self.temp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".into()))
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Value>) -> R) -> StoreResult<R> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let result = f(&mut next);
        self.persist(&next)?;
        *guard = next;
        Ok(result)
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        if !self.lock()?.contains_key(key) {
            return Ok(false);
        }
        self.mutate(|entries| entries.remove(key).is_some())
    }

    fn write_batch(&self, batch: Vec<(String, Option<Value>)>) -> StoreResult<()> {
        self.mutate(|entries| {
            for (key, value) in batch {
                match value {
                    Some(value) => entries.insert(key, value),
                    None => entries.remove(&key),
                };
            }
        })
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
