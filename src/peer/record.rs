//! Change records exchanged with the peer node

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One key-level change propagated to the peer.
///
/// `value: None` means the key must not exist on the peer. Applying the same
/// record twice has the same effect as applying it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Name of the staged change that produced this record
    pub change: String,
    /// Node the change originated on
    pub origin_node: String,
    /// Store key affected
    pub key: String,
    /// New value, or `None` for removal
    pub value: Option<Value>,
    /// When the record was produced
    pub recorded_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Record that sets `key` to `value`.
    pub fn upsert(change: &str, origin_node: &str, key: impl Into<String>, value: Value) -> Self {
        Self::new(change, origin_node, key, Some(value))
    }

    /// Record for an arbitrary target value.
    pub fn new(
        change: &str,
        origin_node: &str,
        key: impl Into<String>,
        value: Option<Value>,
    ) -> Self {
        Self {
            change: change.to_string(),
            origin_node: origin_node.to_string(),
            key: key.into(),
            value,
            recorded_at: Utc::now(),
        }
    }

    /// Whether this record removes the key.
    pub fn is_removal(&self) -> bool {
        self.value.is_none()
    }
}
