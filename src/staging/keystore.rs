//! Keystore Enable
//!
//! Enables the onboard keystore of one node against an external key
//! manager. The keystore record lives in the wrapped key database (WKEYDB)
//! of the local store under `wkeydb/keystore/<node>`.
//!
//! - apply writes the record as `staged`
//! - finalize rewrites it as `enabled`
//! - undo restores whatever was there before apply
//! - the peer receives the `enabled` form; a rollback retracts it

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::change::{PrerequisiteCheck, StagedChange};
use super::errors::{StagingError, StagingResult};
use crate::peer::ChangeRecord;
use crate::storage::{restore_value, LocalStore, StoreResult};

/// Prefix of keystore records in the local store.
pub const KEYSTORE_KEY_PREFIX: &str = "wkeydb/keystore/";

const CHANGE_NAME: &str = "keystore.enable";

/// Store key of the keystore record for `node`.
pub fn keystore_key(node: &str) -> String {
    format!("{}{}", KEYSTORE_KEY_PREFIX, node)
}

/// Lifecycle of a node's keystore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeystoreStatus {
    /// Written by a staged change that has not committed
    Staged,
    /// Finalized and in service
    Enabled,
}

impl KeystoreStatus {
    /// Serialized name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Enabled => "enabled",
        }
    }
}

/// Keystore record as stored in WKEYDB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreRecord {
    pub node: String,
    pub status: KeystoreStatus,
    pub key_manager: String,
    pub updated_at: DateTime<Utc>,
}

impl KeystoreRecord {
    fn new(node: &str, status: KeystoreStatus, key_manager: &str) -> Self {
        Self {
            node: node.to_string(),
            status,
            key_manager: key_manager.to_string(),
            updated_at: Utc::now(),
        }
    }

    /// JSON form written to the store.
    pub fn to_value(&self) -> Value {
        json!({
            "node": self.node,
            "status": self.status.as_str(),
            "key_manager": self.key_manager,
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }

    /// Read the record for `node`, if any.
    ///
    /// A value that is not a valid record is an encoding error.
    pub fn load(store: &dyn LocalStore, node: &str) -> StoreResult<Option<Self>> {
        match store.get(&keystore_key(node))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

/// Staged change that enables the keystore on one node.
pub struct KeystoreEnable {
    store: Arc<dyn LocalStore>,
    key_manager: Option<String>,
    /// Value at the record key before apply; `Some(None)` = key was absent.
    previous: Option<Option<Value>>,
}

impl KeystoreEnable {
    /// Enable against `key_manager` (e.g. `kmip.example.com:5696`).
    pub fn new(store: Arc<dyn LocalStore>, key_manager: Option<String>) -> Self {
        Self {
            store,
            key_manager,
            previous: None,
        }
    }

    fn key_manager(&self) -> &str {
        self.key_manager.as_deref().unwrap_or_default()
    }
}

impl StagedChange for KeystoreEnable {
    fn name(&self) -> &'static str {
        CHANGE_NAME
    }

    fn validate_prerequisites(&self, node: &str) -> PrerequisiteCheck {
        if self.key_manager().trim().is_empty() {
            return PrerequisiteCheck::unsatisfied("external key manager is not configured");
        }

        match KeystoreRecord::load(self.store.as_ref(), node) {
            Err(e) => PrerequisiteCheck::unsatisfied(format!("key database unreadable: {}", e)),
            Ok(Some(record)) => match record.status {
                KeystoreStatus::Enabled => PrerequisiteCheck::unsatisfied(format!(
                    "keystore already enabled on {}",
                    node
                )),
                KeystoreStatus::Staged => PrerequisiteCheck::unsatisfied(format!(
                    "a keystore change is already staged on {}",
                    node
                )),
            },
            Ok(None) => PrerequisiteCheck::Satisfied,
        }
    }

    fn apply_local_state(&mut self, node: &str) -> StagingResult<()> {
        let key = keystore_key(node);
        let previous = self.store.get(&key).map_err(StagingError::from_apply)?;

        let record = KeystoreRecord::new(node, KeystoreStatus::Staged, self.key_manager());
        self.store
            .put(&key, record.to_value())
            .map_err(StagingError::from_apply)?;

        self.previous = Some(previous);
        Ok(())
    }

    fn finalize(&mut self, node: &str) -> StagingResult<()> {
        let record = KeystoreRecord::new(node, KeystoreStatus::Enabled, self.key_manager());
        self.store
            .put(&keystore_key(node), record.to_value())
            .map_err(StagingError::from_finalize)
    }

    fn undo_local_state(&mut self, node: &str) -> StagingResult<()> {
        let Some(previous) = self.previous.clone() else {
            return Ok(());
        };
        restore_value(self.store.as_ref(), &keystore_key(node), previous)
            .map_err(StagingError::from_undo)
    }

    fn change_record(&self, node: &str) -> ChangeRecord {
        let record = KeystoreRecord::new(node, KeystoreStatus::Enabled, self.key_manager());
        ChangeRecord::upsert(CHANGE_NAME, node, keystore_key(node), record.to_value())
    }

    fn revert_record(&self, node: &str) -> ChangeRecord {
        ChangeRecord::new(
            CHANGE_NAME,
            node,
            keystore_key(node),
            self.previous.clone().flatten(),
        )
    }
}
