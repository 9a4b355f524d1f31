//! Staged Operation Tests
//!
//! Exercise `StagedOperation` end to end through the public API with real
//! stores, peers and observers.
//!
//! Test Categories:
//! 1. Commit idempotence
//! 2. Prerequisite failure performs no writes
//! 3. Rollback restores the pre-execute snapshot
//! 4. Peer sync failure is advisory but observable
//! 5. Caller-defined staged changes

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use keystage::config::PeerSyncPolicy;
use keystage::observability::{MemoryObserver, ObserverSet, StagingMetrics};
use keystage::peer::{
    ChangeRecord, PeerSyncError, PeerSyncResult, PeerSynchronizer, PeerTransport, StorePeer,
    SyncOutcome,
};
use keystage::staging::{
    keystore_key, KeystoreEnable, KeystoreRecord, KeystoreStatus, PrerequisiteCheck,
    RollbackOutcome, StagedChange, StagedOperation, StageState, StagingErrorKind, StagingResult,
};
use keystage::storage::{FileStore, LocalStore, MemoryStore};

const KEY_MANAGER: &str = "kmip.example.com:5696";

/// Peer that never answers.
struct UnreachablePeer;

impl PeerTransport for UnreachablePeer {
    fn peer_name(&self) -> &str {
        "node-B"
    }

    fn propagate(&self, _record: &ChangeRecord, _timeout: Duration) -> PeerSyncResult<()> {
        Err(PeerSyncError::unreachable("no route to node-B"))
    }
}

fn fast_policy() -> PeerSyncPolicy {
    PeerSyncPolicy {
        timeout_ms: 500,
        max_retries: 1,
        retry_backoff_ms: 1,
    }
}

fn keystore_op(
    node: &str,
    store: &Arc<MemoryStore>,
    key_manager: Option<&str>,
    observer: Arc<MemoryObserver>,
) -> StagedOperation<KeystoreEnable> {
    let change = KeystoreEnable::new(store.clone(), key_manager.map(str::to_string));
    StagedOperation::new(node, change, observer)
}

// =============================================================================
// COMMIT IDEMPOTENCE
// =============================================================================

/// Scenario: node-A validates, executes, commits, then commits again.
///
/// The second commit succeeds with no new side effect.
#[test]
fn test_node_a_execute_commit_commit() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let mut op = keystore_op("node-A", &store, Some(KEY_MANAGER), observer.clone());

    assert!(op.change().validate_prerequisites("node-A").is_satisfied());
    assert_eq!(op.execute().unwrap(), SyncOutcome::Skipped);
    op.commit().unwrap();

    let snapshot = store.snapshot().unwrap();
    let writes = store.write_count();
    let events = observer.events().len();

    op.commit().unwrap();

    assert!(op.is_committed());
    assert_eq!(store.snapshot().unwrap(), snapshot);
    assert_eq!(store.write_count(), writes);
    assert_eq!(observer.events().len(), events);

    let record = KeystoreRecord::load(store.as_ref(), "node-A").unwrap().unwrap();
    assert_eq!(record.status, KeystoreStatus::Enabled);
}

/// Test: Commit is only legal after a successful execute.
#[test]
fn test_commit_before_execute_is_illegal() {
    let store = Arc::new(MemoryStore::new());
    let mut op = keystore_op(
        "node-A",
        &store,
        Some(KEY_MANAGER),
        Arc::new(MemoryObserver::new()),
    );

    let err = op.commit().unwrap_err();
    assert_eq!(err.kind, StagingErrorKind::IllegalTransition);
    assert_eq!(op.state(), &StageState::Created);
    assert_eq!(store.write_count(), 0);
}

// =============================================================================
// PREREQUISITES
// =============================================================================

/// Scenario: node-B fails validation; execute fails with
/// PrerequisitesNotMet and rollback has nothing to undo.
#[test]
fn test_node_b_prerequisites_not_met() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let mut op = keystore_op("node-B", &store, None, observer.clone());

    assert!(!op.change().validate_prerequisites("node-B").is_satisfied());

    let err = op.execute().unwrap_err();
    assert_eq!(err.kind, StagingErrorKind::PrerequisitesNotMet);
    assert!(!err.is_fatal());
    assert_eq!(store.write_count(), 0);
    assert!(observer.contains("staging.prerequisites.not_met"));

    assert_eq!(op.rollback(), RollbackOutcome::NothingToUndo);
    assert_eq!(store.write_count(), 0);
}

/// Test: A failed prerequisite never reaches the peer.
#[test]
fn test_prerequisite_failure_does_not_touch_peer() {
    let store = Arc::new(MemoryStore::new());
    let partner = Arc::new(MemoryStore::new());
    let peer = PeerSynchronizer::new(
        Arc::new(StorePeer::new("node-B", partner.clone())),
        fast_policy(),
    );
    let mut op =
        keystore_op("node-A", &store, None, Arc::new(MemoryObserver::new())).with_peer(peer);

    assert!(op.execute().is_err());
    assert_eq!(partner.write_count(), 0);
}

// =============================================================================
// ROLLBACK
// =============================================================================

/// Test: Rollback before commit restores the exact pre-execute snapshot,
/// locally and on the peer.
#[test]
fn test_rollback_restores_snapshot() {
    let store = Arc::new(MemoryStore::new());
    store.put("wkeydb/other", json!({"keep": true})).unwrap();
    let before = store.snapshot().unwrap();

    let partner = Arc::new(MemoryStore::new());
    let peer = PeerSynchronizer::new(
        Arc::new(StorePeer::new("node-B", partner.clone())),
        fast_policy(),
    );
    let observer = Arc::new(MemoryObserver::new());
    let mut op = keystore_op("node-A", &store, Some(KEY_MANAGER), observer.clone()).with_peer(peer);

    assert!(op.execute().unwrap().is_synchronized());
    assert!(partner.get(&keystore_key("node-A")).unwrap().is_some());

    assert_eq!(op.rollback(), RollbackOutcome::RolledBack);
    assert_eq!(store.snapshot().unwrap(), before);
    assert_eq!(partner.get(&keystore_key("node-A")).unwrap(), None);
    assert!(observer.contains("staging.rollback.completed"));

    assert_eq!(op.rollback(), RollbackOutcome::AlreadyRolledBack);
}

/// Test: Rollback after commit changes nothing.
#[test]
fn test_rollback_after_commit_is_noop() {
    let store = Arc::new(MemoryStore::new());
    let mut op = keystore_op(
        "node-A",
        &store,
        Some(KEY_MANAGER),
        Arc::new(MemoryObserver::new()),
    );
    op.execute().unwrap();
    op.commit().unwrap();
    let committed = store.snapshot().unwrap();

    assert_eq!(op.rollback(), RollbackOutcome::AlreadyCommitted);
    assert_eq!(store.snapshot().unwrap(), committed);
    assert_eq!(op.state(), &StageState::Committed);
}

/// Test: A staged keystore survives a restart of the file store and can
/// still be rolled back by the same operation.
#[test]
fn test_rollback_against_file_store() {
    let tmp = TempDir::new().unwrap();
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(tmp.path()).unwrap());
    let change = KeystoreEnable::new(store.clone(), Some(KEY_MANAGER.to_string()));
    let mut op = StagedOperation::new("node-A", change, Arc::new(MemoryObserver::new()));

    op.execute().unwrap();
    let reopened = FileStore::open(tmp.path()).unwrap();
    let staged = KeystoreRecord::load(&reopened, "node-A").unwrap().unwrap();
    assert_eq!(staged.status, KeystoreStatus::Staged);

    op.rollback();
    let reopened = FileStore::open(tmp.path()).unwrap();
    assert_eq!(KeystoreRecord::load(&reopened, "node-A").unwrap(), None);
}

// =============================================================================
// PEER SYNC FAILURE
// =============================================================================

/// Test: An unreachable peer does not change the outcome of execute, but is
/// reported as an event and a metric.
#[test]
fn test_peer_failure_is_advisory() {
    let with_peer_store = Arc::new(MemoryStore::new());
    let memory = Arc::new(MemoryObserver::new());
    let metrics = Arc::new(StagingMetrics::new());
    let observers = ObserverSet::new()
        .with(memory.clone())
        .with(metrics.clone());
    let change = KeystoreEnable::new(with_peer_store.clone(), Some(KEY_MANAGER.to_string()));
    let mut with_peer = StagedOperation::new("node-A", change, Arc::new(observers))
        .with_peer(PeerSynchronizer::new(Arc::new(UnreachablePeer), fast_policy()));

    let without_peer_store = Arc::new(MemoryStore::new());
    let mut without_peer = keystore_op(
        "node-A",
        &without_peer_store,
        Some(KEY_MANAGER),
        Arc::new(MemoryObserver::new()),
    );

    let outcome = with_peer.execute().unwrap();
    assert!(without_peer.execute().is_ok());

    match outcome {
        SyncOutcome::Failed { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected failed sync, got {:?}", other),
    }
    assert!(memory.contains("staging.peer_sync.failed"));
    assert_eq!(metrics.snapshot().peer_sync_failures, 1);

    with_peer.commit().unwrap();
    without_peer.commit().unwrap();
    assert_eq!(with_peer.state(), without_peer.state());
}

// =============================================================================
// CALLER-DEFINED CHANGES
// =============================================================================

/// Sets one flag key; refuses to run twice.
struct FlagChange {
    store: Arc<MemoryStore>,
    previous: Option<Option<Value>>,
}

impl StagedChange for FlagChange {
    fn name(&self) -> &'static str {
        "flag.set"
    }

    fn validate_prerequisites(&self, node: &str) -> PrerequisiteCheck {
        match self.store.get(&format!("flag/{}", node)) {
            Ok(None) => PrerequisiteCheck::Satisfied,
            Ok(Some(_)) => PrerequisiteCheck::unsatisfied("flag already set"),
            Err(e) => PrerequisiteCheck::unsatisfied(e.to_string()),
        }
    }

    fn apply_local_state(&mut self, node: &str) -> StagingResult<()> {
        let key = format!("flag/{}", node);
        self.previous = Some(self.store.get(&key).map_err(|e| {
            keystage::staging::StagingError::local_apply_failure(e.to_string())
        })?);
        self.store
            .put(&key, json!("staged"))
            .map_err(|e| keystage::staging::StagingError::local_apply_failure(e.to_string()))
    }

    fn finalize(&mut self, node: &str) -> StagingResult<()> {
        self.store
            .put(&format!("flag/{}", node), json!("set"))
            .map_err(|e| keystage::staging::StagingError::finalize_failure(e.to_string()))
    }

    fn undo_local_state(&mut self, node: &str) -> StagingResult<()> {
        self.store
            .delete(&format!("flag/{}", node))
            .map(|_| ())
            .map_err(|e| keystage::staging::StagingError::undo_failure(e.to_string()))
    }

    fn change_record(&self, node: &str) -> ChangeRecord {
        ChangeRecord::upsert(self.name(), node, format!("flag/{}", node), json!("set"))
    }

    fn revert_record(&self, node: &str) -> ChangeRecord {
        ChangeRecord::new(self.name(), node, format!("flag/{}", node), None)
    }
}

/// Test: A finalize failure halts the operation; rollback then refuses to
/// touch it.
#[test]
fn test_finalize_failure_halts() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let change = FlagChange {
        store: store.clone(),
        previous: None,
    };
    let mut op = StagedOperation::new("node-A", change, observer.clone());

    op.execute().unwrap();
    assert!(op.change().previous.is_some());
    store.set_reject_writes(true);

    let err = op.commit().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(op.state().state_name(), "Halted");
    assert!(observer.contains("staging.commit.finalize_failed"));

    store.set_reject_writes(false);
    assert!(matches!(op.rollback(), RollbackOutcome::Halted { .. }));
    assert_eq!(store.get("flag/node-A").unwrap(), Some(json!("staged")));
}

/// Test: An apply failure leaves the operation executable again.
#[test]
fn test_apply_failure_is_retryable() {
    let store = Arc::new(MemoryStore::new());
    let change = FlagChange {
        store: store.clone(),
        previous: None,
    };
    let mut op = StagedOperation::new("node-A", change, Arc::new(MemoryObserver::new()));

    store.set_reject_writes(true);
    let err = op.execute().unwrap_err();
    assert_eq!(err.kind, StagingErrorKind::LocalApplyFailure);
    assert_eq!(op.state(), &StageState::Created);

    store.set_reject_writes(false);
    op.execute().unwrap();
    op.commit().unwrap();
    assert_eq!(store.get("flag/node-A").unwrap(), Some(json!("set")));
}
