//! Staging metrics
//!
//! - Counters only
//! - Monotonic increase, reset only on process start
//! - Fed by the same event stream as the logs

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::events::StageEvent;
use super::Observer;

/// Counters for staged operations and RDB phases.
///
/// Uses Relaxed ordering; counters are observational only.
#[derive(Debug, Default)]
pub struct StagingMetrics {
    executions: AtomicU64,
    prerequisite_failures: AtomicU64,
    apply_failures: AtomicU64,
    peer_syncs: AtomicU64,
    peer_sync_failures: AtomicU64,
    commits: AtomicU64,
    finalize_failures: AtomicU64,
    rollbacks: AtomicU64,
    rollback_failures: AtomicU64,
    rdb_prepared: AtomicU64,
    rdb_rejected: AtomicU64,
    rdb_commits: AtomicU64,
    rdb_aborts: AtomicU64,
    rdb_violations: AtomicU64,
    rdb_phase_failures: AtomicU64,
}

impl StagingMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            executions: self.executions.load(Ordering::Relaxed),
            prerequisite_failures: self.prerequisite_failures.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
            peer_syncs: self.peer_syncs.load(Ordering::Relaxed),
            peer_sync_failures: self.peer_sync_failures.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            finalize_failures: self.finalize_failures.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            rdb_prepared: self.rdb_prepared.load(Ordering::Relaxed),
            rdb_rejected: self.rdb_rejected.load(Ordering::Relaxed),
            rdb_commits: self.rdb_commits.load(Ordering::Relaxed),
            rdb_aborts: self.rdb_aborts.load(Ordering::Relaxed),
            rdb_violations: self.rdb_violations.load(Ordering::Relaxed),
            rdb_phase_failures: self.rdb_phase_failures.load(Ordering::Relaxed),
        }
    }
}

impl Observer for StagingMetrics {
    fn emit(&self, event: &StageEvent) {
        let counter = match event {
            StageEvent::ExecuteStarted { .. } => &self.executions,
            StageEvent::PrerequisitesNotMet { .. } => &self.prerequisite_failures,
            StageEvent::LocalApplyFailed { .. } => &self.apply_failures,
            StageEvent::PeerSyncSucceeded { .. } => &self.peer_syncs,
            StageEvent::PeerSyncFailed { .. } => &self.peer_sync_failures,
            StageEvent::Committed { .. } => &self.commits,
            StageEvent::FinalizeFailed { .. } => &self.finalize_failures,
            StageEvent::RolledBack { .. } => &self.rollbacks,
            StageEvent::RollbackFailed { .. } => &self.rollback_failures,
            StageEvent::RdbPrepared { .. } => &self.rdb_prepared,
            StageEvent::RdbPrecommitRejected { .. } => &self.rdb_rejected,
            StageEvent::RdbCommitted { .. } => &self.rdb_commits,
            StageEvent::RdbAborted { .. } => &self.rdb_aborts,
            StageEvent::RdbProtocolViolation { .. } => &self.rdb_violations,
            StageEvent::RdbPhaseFailed { .. } => &self.rdb_phase_failures,
            StageEvent::LocalStateApplied { .. }
            | StageEvent::PeerSyncSkipped { .. }
            | StageEvent::RollbackSkipped { .. } => return,
        };
        Self::bump(counter);
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub executions: u64,
    pub prerequisite_failures: u64,
    pub apply_failures: u64,
    pub peer_syncs: u64,
    pub peer_sync_failures: u64,
    pub commits: u64,
    pub finalize_failures: u64,
    pub rollbacks: u64,
    pub rollback_failures: u64,
    pub rdb_prepared: u64,
    pub rdb_rejected: u64,
    pub rdb_commits: u64,
    pub rdb_aborts: u64,
    pub rdb_violations: u64,
    pub rdb_phase_failures: u64,
}
