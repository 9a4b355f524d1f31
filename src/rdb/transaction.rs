//! Transaction identity and the context a coordinator supplies.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Cluster-wide identity of one distributed transaction.
///
/// Assigned by the coordinator; this crate never invents one except in
/// tests and demos.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an id supplied by the coordinator.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phase a transaction has reached on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnPhase {
    /// Precommit accepted; reversible state prepared
    Prepared,
    /// Prepared state made permanent
    Committed,
    /// Prepared state discarded (or never prepared)
    Aborted,
}

impl TxnPhase {
    /// Phase name for messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepared => "Prepared",
            Self::Committed => "Committed",
            Self::Aborted => "Aborted",
        }
    }

    /// Commit or abort has been delivered.
    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Prepared)
    }
}

/// Replicated record change carried by one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdbTransaction {
    /// Transaction id
    pub id: TransactionId,
    /// Local store key the record maps to
    pub key: String,
    /// New value; `None` removes the key
    pub value: Option<Value>,
}

impl RdbTransaction {
    /// Transaction that sets `key` to `value`.
    pub fn write(id: TransactionId, key: impl Into<String>, value: Value) -> Self {
        Self {
            id,
            key: key.into(),
            value: Some(value),
        }
    }

    /// Transaction that removes `key`.
    pub fn delete(id: TransactionId, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            value: None,
        }
    }
}
