//! RDB Callback Tests
//!
//! Drive the precommit / commit / abort contract through the public API,
//! the way an external coordinator would.
//!
//! Test Categories:
//! 1. Abort leaves no trace
//! 2. Commit is permanent and idempotent
//! 3. Out-of-contract deliveries are fatal, never silently accepted
//! 4. Cross-thread delivery and crash recovery
//! 5. Failed phases inside the dispatcher are redelivered

use std::sync::Arc;
use std::thread;

use serde_json::json;
use tempfile::TempDir;

use keystage::observability::{MemoryObserver, ObserverSet, StagingMetrics};
use keystage::rdb::{
    KeyDbCallbackHandler, RdbCallback, RdbDispatcher, RdbError, RdbErrorKind, RdbResult,
    RdbTransaction, TransactionId, TxnPhase, DECIDED_KEY_PREFIX, PENDING_KEY_PREFIX,
};
use keystage::storage::{FileStore, LocalStore, MemoryStore};

fn handler(store: &Arc<MemoryStore>, observer: &Arc<MemoryObserver>) -> KeyDbCallbackHandler {
    KeyDbCallbackHandler::new(store.clone(), observer.clone())
}

// =============================================================================
// ABORT
// =============================================================================

/// Scenario: precommit then abort for T. Once the coordinator closes T, no
/// trace of T remains.
#[test]
fn test_precommit_abort_leaves_no_trace() {
    let store = Arc::new(MemoryStore::new());
    store.put("wkeydb/keystore/node-A", json!({"status": "enabled"})).unwrap();
    let before = store.snapshot().unwrap();
    let observer = Arc::new(MemoryObserver::new());
    let keydb = handler(&store, &observer);

    let txn = RdbTransaction::delete(TransactionId::new(), "wkeydb/keystore/node-A");
    keydb.on_precommit(&txn).unwrap();
    keydb.on_abort(txn.id).unwrap();
    assert_eq!(store.get("wkeydb/keystore/node-A").unwrap(), Some(json!({"status": "enabled"})));
    assert!(store.keys(PENDING_KEY_PREFIX).unwrap().is_empty());

    assert!(keydb.forget(txn.id).unwrap());
    assert_eq!(store.snapshot().unwrap(), before);
    assert_eq!(
        observer.event_names(),
        vec!["rdb.precommit.prepared", "rdb.abort.completed"]
    );
}

/// Test: Abort without a precommit (e.g. after this node voted no) is a
/// harmless no-op.
#[test]
fn test_abort_after_rejected_precommit() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let keydb = handler(&store, &observer);

    store.set_reject_writes(true);
    let txn = RdbTransaction::write(TransactionId::new(), "k", json!(1));
    let err = keydb.on_precommit(&txn).unwrap_err();
    assert_eq!(err.kind, RdbErrorKind::PrecommitRejected);
    store.set_reject_writes(false);

    keydb.on_abort(txn.id).unwrap();
    assert!(store.snapshot().unwrap().is_empty());
}

// =============================================================================
// COMMIT
// =============================================================================

/// Scenario: precommit then commit for T. The write is permanent and a
/// duplicate commit changes nothing.
#[test]
fn test_precommit_commit_is_permanent() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let keydb = handler(&store, &observer);

    let txn = RdbTransaction::write(TransactionId::new(), "k", json!({"v": 1}));
    keydb.on_precommit(&txn).unwrap();
    keydb.on_commit(txn.id).unwrap();
    let committed = store.snapshot().unwrap();

    keydb.on_commit(txn.id).unwrap();

    assert_eq!(store.snapshot().unwrap(), committed);
    assert_eq!(committed.get("k"), Some(&json!({"v": 1})));

    keydb.forget(txn.id).unwrap();
    assert_eq!(store.snapshot().unwrap().len(), 1);
}

// =============================================================================
// PROTOCOL VIOLATIONS
// =============================================================================

/// Scenario: an abort erroneously delivered after commit is fatal and the
/// committed state is untouched.
#[test]
fn test_abort_after_commit_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let metrics = Arc::new(StagingMetrics::new());
    let observers = Arc::new(
        ObserverSet::new()
            .with(observer.clone())
            .with(metrics.clone()),
    );
    let keydb = KeyDbCallbackHandler::new(store.clone(), observers);

    let txn = RdbTransaction::write(TransactionId::new(), "k", json!(1));
    keydb.on_precommit(&txn).unwrap();
    keydb.on_commit(txn.id).unwrap();
    let committed = store.snapshot().unwrap();

    let err = keydb.on_abort(txn.id).unwrap_err();

    assert_eq!(err.kind, RdbErrorKind::ProtocolViolation);
    assert!(err.is_fatal());
    assert_eq!(store.snapshot().unwrap(), committed);
    assert_eq!(keydb.phase(txn.id), Some(TxnPhase::Committed));
    assert_eq!(metrics.snapshot().rdb_violations, 1);
}

/// Test: The dispatcher refuses out-of-order phases before any handler
/// sees them.
#[test]
fn test_dispatcher_rejects_commit_without_precommit() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let dispatcher =
        RdbDispatcher::new(observer.clone()).register("keydb", Arc::new(handler(&store, &observer)));

    let err = dispatcher.on_commit(TransactionId::new()).unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(store.write_count(), 0);
    assert!(observer.contains("rdb.protocol.violation"));
}

// =============================================================================
// THREADS AND RECOVERY
// =============================================================================

/// Test: Phases for many transactions arrive on different threads.
#[test]
fn test_concurrent_transactions() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let keydb = Arc::new(handler(&store, &observer));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let keydb = keydb.clone();
            thread::spawn(move || {
                let txn = RdbTransaction::write(TransactionId::new(), format!("k{}", i), json!(i));
                keydb.on_precommit(&txn).unwrap();
                if i % 2 == 0 {
                    keydb.on_commit(txn.id).unwrap();
                } else {
                    keydb.on_abort(txn.id).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let snapshot = store.snapshot().unwrap();
    assert_eq!(store.keys("k").unwrap().len(), 4);
    assert_eq!(store.keys(DECIDED_KEY_PREFIX).unwrap().len(), 8);
    assert_eq!(snapshot.get("k0"), Some(&json!(0)));
    assert_eq!(snapshot.get("k1"), None);
    assert_eq!(keydb.prepared_count(), 0);
}

/// Test: A node restarted between precommit and commit recovers the
/// prepared transaction from disk and honors the commit.
#[test]
fn test_recover_prepared_from_file_store() {
    let tmp = TempDir::new().unwrap();
    let txn = RdbTransaction::write(TransactionId::new(), "k", json!("v"));
    {
        let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(tmp.path()).unwrap());
        let keydb = KeyDbCallbackHandler::new(store, Arc::new(MemoryObserver::new()));
        keydb.on_precommit(&txn).unwrap();
    }

    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(tmp.path()).unwrap());
    let keydb = KeyDbCallbackHandler::new(store.clone(), Arc::new(MemoryObserver::new()));
    assert_eq!(keydb.recover_prepared().unwrap(), 1);
    keydb.on_commit(txn.id).unwrap();

    let reopened = FileStore::open(tmp.path()).unwrap();
    assert_eq!(reopened.get("k").unwrap(), Some(json!("v")));
    assert!(reopened.keys("rdb/pending/").unwrap().is_empty());
}

/// Test: A node restarted after deciding still treats the same decision as
/// a duplicate and the opposite one as a violation.
#[test]
fn test_decision_redelivered_after_restart() {
    let tmp = TempDir::new().unwrap();
    let committed = RdbTransaction::write(TransactionId::new(), "a", json!("v"));
    let aborted = RdbTransaction::write(TransactionId::new(), "b", json!("w"));
    {
        let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(tmp.path()).unwrap());
        let keydb = KeyDbCallbackHandler::new(store, Arc::new(MemoryObserver::new()));
        keydb.on_precommit(&committed).unwrap();
        keydb.on_commit(committed.id).unwrap();
        keydb.on_precommit(&aborted).unwrap();
        keydb.on_abort(aborted.id).unwrap();
    }

    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(tmp.path()).unwrap());
    let metrics = Arc::new(StagingMetrics::new());
    let keydb = KeyDbCallbackHandler::new(store.clone(), metrics.clone());
    assert_eq!(keydb.recover_prepared().unwrap(), 0);

    keydb.on_commit(committed.id).unwrap();
    keydb.on_abort(aborted.id).unwrap();

    let err = keydb.on_abort(committed.id).unwrap_err();
    assert_eq!(err.kind, RdbErrorKind::ProtocolViolation);
    let err = keydb.on_commit(aborted.id).unwrap_err();
    assert_eq!(err.kind, RdbErrorKind::ProtocolViolation);

    assert_eq!(store.get("a").unwrap(), Some(json!("v")));
    assert_eq!(store.get("b").unwrap(), None);
    assert_eq!(metrics.snapshot().rdb_violations, 2);
}

// =============================================================================
// DISPATCHER FAILURES
// =============================================================================

/// Votes no on every precommit and takes the store offline while doing so.
struct Outage {
    store: Arc<MemoryStore>,
}

impl RdbCallback for Outage {
    fn on_precommit(&self, _txn: &RdbTransaction) -> RdbResult<()> {
        self.store.set_reject_writes(true);
        Err(RdbError::precommit_rejected("disk offline"))
    }

    fn on_commit(&self, _txn_id: TransactionId) -> RdbResult<()> {
        Ok(())
    }

    fn on_abort(&self, _txn_id: TransactionId) -> RdbResult<()> {
        Ok(())
    }
}

/// Scenario: a handler votes no and the prepared key database cannot undo
/// its precommit. The transaction stays open, the coordinator's abort
/// reaches the key database again, and the key is free afterwards.
#[test]
fn test_failed_precommit_cleanup_is_redelivered() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let metrics = Arc::new(StagingMetrics::new());
    let observers = Arc::new(
        ObserverSet::new()
            .with(observer.clone())
            .with(metrics.clone()),
    );
    let keydb = Arc::new(KeyDbCallbackHandler::new(store.clone(), observers.clone()));
    let dispatcher = RdbDispatcher::new(observers)
        .register("keydb", keydb.clone())
        .register("outage", Arc::new(Outage { store: store.clone() }));
    let txn = RdbTransaction::write(TransactionId::new(), "k", json!(1));

    let err = dispatcher.on_precommit(&txn).unwrap_err();

    assert_eq!(err.kind, RdbErrorKind::PhaseFailure);
    assert!(err.message.starts_with("keydb:"));
    assert_eq!(dispatcher.phase(txn.id), Some(TxnPhase::Prepared));
    assert_eq!(keydb.phase(txn.id), Some(TxnPhase::Prepared));
    assert_eq!(store.keys(PENDING_KEY_PREFIX).unwrap().len(), 1);
    assert!(observer.contains("rdb.phase.failed"));
    assert_eq!(metrics.snapshot().rdb_phase_failures, 1);

    store.set_reject_writes(false);
    dispatcher.on_abort(txn.id).unwrap();

    assert_eq!(dispatcher.phase(txn.id), Some(TxnPhase::Aborted));
    assert_eq!(keydb.phase(txn.id), Some(TxnPhase::Aborted));
    assert!(store.keys(PENDING_KEY_PREFIX).unwrap().is_empty());

    let next = RdbTransaction::write(TransactionId::new(), "k", json!(2));
    keydb.on_precommit(&next).unwrap();
}

/// Test: A commit that fails inside the dispatcher leaves the transaction
/// prepared, and the redelivered commit completes it.
#[test]
fn test_failed_commit_is_redelivered_through_dispatcher() {
    let store = Arc::new(MemoryStore::new());
    let observer = Arc::new(MemoryObserver::new());
    let dispatcher =
        RdbDispatcher::new(observer.clone()).register("keydb", Arc::new(handler(&store, &observer)));
    let txn = RdbTransaction::write(TransactionId::new(), "k", json!(1));
    dispatcher.on_precommit(&txn).unwrap();

    store.set_reject_writes(true);
    let err = dispatcher.on_commit(txn.id).unwrap_err();
    assert_eq!(err.kind, RdbErrorKind::PhaseFailure);
    assert!(err.is_fatal());
    assert_eq!(dispatcher.phase(txn.id), Some(TxnPhase::Prepared));
    assert_eq!(store.get("k").unwrap(), None);

    store.set_reject_writes(false);
    dispatcher.on_commit(txn.id).unwrap();

    assert_eq!(store.get("k").unwrap(), Some(json!(1)));
    assert_eq!(dispatcher.phase(txn.id), Some(TxnPhase::Committed));
    assert!(dispatcher.forget(txn.id).unwrap());
    assert!(store.keys("rdb/").unwrap().is_empty());
}
