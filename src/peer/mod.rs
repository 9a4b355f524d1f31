//! Peer Synchronization
//!
//! Best-effort propagation of local configuration changes to the paired
//! peer node (the other half of a metro-cluster pair).
//!
//! - Advisory: a failure never fails the local change
//! - Bounded: every attempt carries a timeout, retries are capped by policy
//! - Transports are idempotent, so retrying a delivered record is harmless

mod errors;
mod record;
mod store_peer;

pub use errors::{PeerSyncError, PeerSyncErrorKind, PeerSyncResult};
pub use record::ChangeRecord;
pub use store_peer::StorePeer;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PeerSyncPolicy;

/// A single "propagate change" capability to one peer.
pub trait PeerTransport: Send + Sync {
    /// Name used in logs.
    fn peer_name(&self) -> &str;

    /// Deliver `record` to the peer, giving up after `timeout`.
    ///
    /// Must be idempotent.
    fn propagate(&self, record: &ChangeRecord, timeout: Duration) -> PeerSyncResult<()>;
}

/// What happened to one synchronization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Peer acknowledged the record.
    Synchronized { peer: String, attempts: u32 },

    /// Every permitted attempt failed; logged and absorbed.
    Failed {
        peer: String,
        attempts: u32,
        error: PeerSyncError,
    },

    /// No peer is configured for this node.
    Skipped,
}

impl SyncOutcome {
    /// Whether the peer has the change.
    pub fn is_synchronized(&self) -> bool {
        matches!(self, Self::Synchronized { .. })
    }

    /// Whether the peer was tried and missed the change.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Drives a [`PeerTransport`] under a [`PeerSyncPolicy`].
#[derive(Clone)]
pub struct PeerSynchronizer {
    transport: Arc<dyn PeerTransport>,
    policy: PeerSyncPolicy,
}

impl PeerSynchronizer {
    /// Create a synchronizer.
    pub fn new(transport: Arc<dyn PeerTransport>, policy: PeerSyncPolicy) -> Self {
        Self { transport, policy }
    }

    /// Policy in force.
    pub fn policy(&self) -> &PeerSyncPolicy {
        &self.policy
    }

    /// Name of the peer.
    pub fn peer_name(&self) -> &str {
        self.transport.peer_name()
    }

    /// Propagate `record`, retrying retryable failures up to the policy limit.
    ///
    /// An attempt that reports success after its timeout has elapsed is
    /// counted as timed out.
    pub fn synchronize(&self, record: &ChangeRecord) -> SyncOutcome {
        let timeout = self.policy.timeout();
        let max_attempts = self.policy.max_attempts();
        let peer = self.transport.peer_name().to_string();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let started = Instant::now();
            let result = self.transport.propagate(record, timeout);
            let elapsed = started.elapsed();

            let result = match result {
                Ok(()) if elapsed > timeout => Err(PeerSyncError::timed_out(format!(
                    "{} answered after {:?} (bound {:?})",
                    peer, elapsed, timeout
                ))),
                other => other,
            };

            match result {
                Ok(()) => return SyncOutcome::Synchronized { peer, attempts },
                Err(error) if error.is_retryable() && attempts < max_attempts => {
                    thread::sleep(self.policy.retry_backoff());
                }
                Err(error) => {
                    return SyncOutcome::Failed {
                        peer,
                        attempts,
                        error,
                    }
                }
            }
        }
    }
}
