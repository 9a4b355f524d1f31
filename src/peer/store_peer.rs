//! Peer transport that writes into the partner's local store
//!
//! Used when both halves of a metro-cluster pair can reach each other's
//! configuration directory, and in tests.

use std::sync::Arc;
use std::time::Duration;

use super::errors::{PeerSyncError, PeerSyncResult};
use super::record::ChangeRecord;
use super::PeerTransport;
use crate::storage::{restore_value, LocalStore};

/// Applies change records directly to the peer's [`LocalStore`].
pub struct StorePeer {
    name: String,
    store: Arc<dyn LocalStore>,
}

impl StorePeer {
    /// Create a transport to the peer named `name`.
    pub fn new(name: impl Into<String>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

impl PeerTransport for StorePeer {
    fn peer_name(&self) -> &str {
        &self.name
    }

    fn propagate(&self, record: &ChangeRecord, _timeout: Duration) -> PeerSyncResult<()> {
        restore_value(self.store.as_ref(), &record.key, record.value.clone())
            .map_err(|e| PeerSyncError::unreachable(format!("{}: {}", self.name, e)))
    }
}
