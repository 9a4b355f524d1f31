//! Observable events
//!
//! Every staged-change and RDB phase transition emits exactly one typed
//! event. Events describe what happened; they never decide what happens.

use uuid::Uuid;

use super::logger::Severity;
use crate::rdb::TransactionId;

/// Events emitted by staged operations and RDB callback handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    // Staged operation lifecycle
    /// `execute` entered
    ExecuteStarted {
        operation_id: Uuid,
        change: &'static str,
        node: String,
    },
    /// Prerequisite check failed; nothing was written
    PrerequisitesNotMet {
        operation_id: Uuid,
        node: String,
        reason: String,
    },
    /// Local durable write completed
    LocalStateApplied { operation_id: Uuid, node: String },
    /// Local durable write failed atomically
    LocalApplyFailed {
        operation_id: Uuid,
        node: String,
        reason: String,
    },
    /// Change reached the peer node
    PeerSyncSucceeded {
        operation_id: Uuid,
        node: String,
        peer: String,
        attempts: u32,
    },
    /// Change did not reach the peer node; execute still succeeds
    PeerSyncFailed {
        operation_id: Uuid,
        node: String,
        peer: String,
        attempts: u32,
        reason: String,
    },
    /// No peer configured for this node
    PeerSyncSkipped { operation_id: Uuid, node: String },
    /// Change finalized
    Committed { operation_id: Uuid, node: String },
    /// Finalize failed after local state was applied
    FinalizeFailed {
        operation_id: Uuid,
        node: String,
        reason: String,
    },
    /// Applied local state was undone
    RolledBack { operation_id: Uuid, node: String },
    /// Rollback requested in a state with nothing to undo
    RollbackSkipped {
        operation_id: Uuid,
        node: String,
        state: &'static str,
    },
    /// Undo of applied local state failed
    RollbackFailed {
        operation_id: Uuid,
        node: String,
        reason: String,
    },

    // RDB transaction phases
    /// Precommit prepared local state
    RdbPrepared { txn_id: TransactionId, key: String },
    /// Precommit refused (vote no)
    RdbPrecommitRejected { txn_id: TransactionId, reason: String },
    /// Prepared state made permanent
    RdbCommitted { txn_id: TransactionId },
    /// Prepared state discarded
    RdbAborted { txn_id: TransactionId },
    /// Coordinator delivered phases out of contract
    RdbProtocolViolation { txn_id: TransactionId, reason: String },
    /// Commit or abort could not complete locally; the transaction stays open
    RdbPhaseFailed {
        txn_id: TransactionId,
        phase: &'static str,
        reason: String,
    },
}

impl StageEvent {
    /// Dotted event name used in logs and metrics.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ExecuteStarted { .. } => "staging.execute.started",
            Self::PrerequisitesNotMet { .. } => "staging.prerequisites.not_met",
            Self::LocalStateApplied { .. } => "staging.apply.completed",
            Self::LocalApplyFailed { .. } => "staging.apply.failed",
            Self::PeerSyncSucceeded { .. } => "staging.peer_sync.succeeded",
            Self::PeerSyncFailed { .. } => "staging.peer_sync.failed",
            Self::PeerSyncSkipped { .. } => "staging.peer_sync.skipped",
            Self::Committed { .. } => "staging.commit.completed",
            Self::FinalizeFailed { .. } => "staging.commit.finalize_failed",
            Self::RolledBack { .. } => "staging.rollback.completed",
            Self::RollbackSkipped { .. } => "staging.rollback.skipped",
            Self::RollbackFailed { .. } => "staging.rollback.failed",
            Self::RdbPrepared { .. } => "rdb.precommit.prepared",
            Self::RdbPrecommitRejected { .. } => "rdb.precommit.rejected",
            Self::RdbCommitted { .. } => "rdb.commit.completed",
            Self::RdbAborted { .. } => "rdb.abort.completed",
            Self::RdbProtocolViolation { .. } => "rdb.protocol.violation",
            Self::RdbPhaseFailed { .. } => "rdb.phase.failed",
        }
    }

    /// Severity this event is logged at.
    pub fn severity(&self) -> Severity {
        match self {
            Self::PrerequisitesNotMet { .. }
            | Self::PeerSyncFailed { .. }
            | Self::RdbPrecommitRejected { .. } => Severity::Warn,
            Self::LocalApplyFailed { .. } | Self::RollbackFailed { .. } => Severity::Error,
            Self::FinalizeFailed { .. }
            | Self::RdbProtocolViolation { .. }
            | Self::RdbPhaseFailed { .. } => Severity::Fatal,
            Self::PeerSyncSkipped { .. } | Self::RollbackSkipped { .. } => Severity::Trace,
            _ => Severity::Info,
        }
    }

    /// Whether an operator must intervene.
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Structured fields for the log line.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::ExecuteStarted {
                operation_id,
                change,
                node,
            } => vec![
                ("operation_id", operation_id.to_string()),
                ("change", change.to_string()),
                ("node", node.clone()),
            ],
            Self::PrerequisitesNotMet {
                operation_id,
                node,
                reason,
            }
            | Self::LocalApplyFailed {
                operation_id,
                node,
                reason,
            }
            | Self::FinalizeFailed {
                operation_id,
                node,
                reason,
            }
            | Self::RollbackFailed {
                operation_id,
                node,
                reason,
            } => vec![
                ("operation_id", operation_id.to_string()),
                ("node", node.clone()),
                ("reason", reason.clone()),
            ],
            Self::LocalStateApplied { operation_id, node }
            | Self::PeerSyncSkipped { operation_id, node }
            | Self::Committed { operation_id, node }
            | Self::RolledBack { operation_id, node } => vec![
                ("operation_id", operation_id.to_string()),
                ("node", node.clone()),
            ],
            Self::PeerSyncSucceeded {
                operation_id,
                node,
                peer,
                attempts,
            } => vec![
                ("operation_id", operation_id.to_string()),
                ("node", node.clone()),
                ("peer", peer.clone()),
                ("attempts", attempts.to_string()),
            ],
            Self::PeerSyncFailed {
                operation_id,
                node,
                peer,
                attempts,
                reason,
            } => vec![
                ("operation_id", operation_id.to_string()),
                ("node", node.clone()),
                ("peer", peer.clone()),
                ("attempts", attempts.to_string()),
                ("reason", reason.clone()),
            ],
            Self::RollbackSkipped {
                operation_id,
                node,
                state,
            } => vec![
                ("operation_id", operation_id.to_string()),
                ("node", node.clone()),
                ("state", state.to_string()),
            ],
            Self::RdbPrepared { txn_id, key } => {
                vec![("txn_id", txn_id.to_string()), ("key", key.clone())]
            }
            Self::RdbPrecommitRejected { txn_id, reason }
            | Self::RdbProtocolViolation { txn_id, reason } => {
                vec![("txn_id", txn_id.to_string()), ("reason", reason.clone())]
            }
            Self::RdbCommitted { txn_id } | Self::RdbAborted { txn_id } => {
                vec![("txn_id", txn_id.to_string())]
            }
            Self::RdbPhaseFailed {
                txn_id,
                phase,
                reason,
            } => vec![
                ("txn_id", txn_id.to_string()),
                ("phase", phase.to_string()),
                ("reason", reason.clone()),
            ],
        }
    }
}
