//! Key database RDB handler
//!
//! Applies replicated key-database records to the local store under the
//! coordinator's two-phase protocol.
//!
//! - precommit persists a pending marker under `rdb/pending/<txn>`; the
//!   target key itself is untouched
//! - commit writes the record, removes the pending marker and records the
//!   decision under `rdb/decided/<txn>`, all in one store batch
//! - abort removes the pending marker and records the decision the same way;
//!   the target key was never touched
//!
//! Both marker kinds survive a restart. A node that crashed between
//! precommit and the decision can [`recover_prepared`] and still honor
//! either phase; one that crashed after deciding still treats a redelivered
//! decision as a duplicate and the opposite decision as a violation.
//!
//! Decided markers are dropped only by [`forget`], which the coordinator
//! calls once the transaction is closed.
//!
//! [`recover_prepared`]: KeyDbCallbackHandler::recover_prepared
//! [`forget`]: RdbCallback::forget

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::callback::RdbCallback;
use super::errors::{RdbError, RdbResult};
use super::transaction::{RdbTransaction, TransactionId, TxnPhase};
use crate::observability::{Observer, StageEvent};
use crate::storage::LocalStore;

/// Prefix of pending precommit markers in the local store.
pub const PENDING_KEY_PREFIX: &str = "rdb/pending/";

/// Prefix of commit/abort decision markers in the local store.
pub const DECIDED_KEY_PREFIX: &str = "rdb/decided/";

fn pending_key(txn_id: TransactionId) -> String {
    format!("{}{}", PENDING_KEY_PREFIX, txn_id)
}

fn decided_key(txn_id: TransactionId) -> String {
    format!("{}{}", DECIDED_KEY_PREFIX, txn_id)
}

/// Durable form of a prepared write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingWrite {
    txn_id: TransactionId,
    key: String,
    value: Option<Value>,
}

/// Durable form of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DecidedMarker {
    txn_id: TransactionId,
    phase: TxnPhase,
}

#[derive(Debug, Clone)]
struct TxnEntry {
    phase: TxnPhase,
    /// Present only while prepared
    write: Option<PendingWrite>,
}

/// RDB callback handler for the local key database.
pub struct KeyDbCallbackHandler {
    store: Arc<dyn LocalStore>,
    observer: Arc<dyn Observer>,
    transactions: Mutex<HashMap<TransactionId, TxnEntry>>,
}

impl KeyDbCallbackHandler {
    /// Create a handler over `store`.
    pub fn new(store: Arc<dyn LocalStore>, observer: Arc<dyn Observer>) -> Self {
        Self {
            store,
            observer,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Phase `txn_id` has reached on this node, if known.
    pub fn phase(&self, txn_id: TransactionId) -> Option<TxnPhase> {
        self.transactions
            .lock()
            .ok()
            .and_then(|txns| txns.get(&txn_id).map(|e| e.phase))
    }

    /// Number of transactions currently prepared.
    pub fn prepared_count(&self) -> usize {
        self.transactions
            .lock()
            .map(|txns| {
                txns.values()
                    .filter(|e| e.phase == TxnPhase::Prepared)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Ids of transactions currently prepared, in id order.
    pub fn prepared_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self
            .transactions
            .lock()
            .map(|txns| {
                txns.iter()
                    .filter(|(_, e)| e.phase == TxnPhase::Prepared)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of transactions known on this node, decided or not.
    pub fn tracked_count(&self) -> usize {
        self.transactions.lock().map(|txns| txns.len()).unwrap_or(0)
    }

    /// Reload transaction state from the markers left in the store.
    ///
    /// Decided markers come back as `Committed`/`Aborted`, pending markers
    /// as `Prepared`. Transactions already in the table are left alone.
    /// Returns the number of transactions restored to `Prepared`.
    pub fn recover_prepared(&self) -> RdbResult<usize> {
        let mut txns = self.lock()?;

        for key in self.marker_keys(DECIDED_KEY_PREFIX)? {
            let Some(marker) = self.read_marker::<DecidedMarker>(&key)? else {
                continue;
            };
            txns.entry(marker.txn_id).or_insert(TxnEntry {
                phase: marker.phase,
                write: None,
            });
        }

        let mut restored = 0;
        for key in self.marker_keys(PENDING_KEY_PREFIX)? {
            let Some(write) = self.read_marker::<PendingWrite>(&key)? else {
                continue;
            };
            if txns.contains_key(&write.txn_id) {
                continue;
            }
            txns.insert(
                write.txn_id,
                TxnEntry {
                    phase: TxnPhase::Prepared,
                    write: Some(write),
                },
            );
            restored += 1;
        }
        Ok(restored)
    }

    /// Forget every decided transaction, in memory and in the store.
    ///
    /// Only safe once the coordinator has closed all of them: afterwards a
    /// late commit is reported as "commit without precommit" and a late
    /// abort is accepted as unknown. Returns the number dropped from the
    /// table.
    pub fn forget_decided(&self) -> RdbResult<usize> {
        let mut txns = self.lock()?;

        let markers = self.marker_keys(DECIDED_KEY_PREFIX)?;
        if !markers.is_empty() {
            self.store
                .write_batch(markers.into_iter().map(|key| (key, None)).collect())
                .map_err(|e| {
                    RdbError::phase_failure(format!("cannot clear decided markers: {}", e))
                })?;
        }

        let before = txns.len();
        txns.retain(|_, e| !e.phase.is_decided());
        Ok(before - txns.len())
    }

    fn marker_keys(&self, prefix: &str) -> RdbResult<Vec<String>> {
        self.store
            .keys(prefix)
            .map_err(|e| RdbError::phase_failure(format!("cannot list {} markers: {}", prefix, e)))
    }

    fn read_marker<T: serde::de::DeserializeOwned>(&self, key: &str) -> RdbResult<Option<T>> {
        let Some(value) = self
            .store
            .get(key)
            .map_err(|e| RdbError::phase_failure(format!("cannot read {}: {}", key, e)))?
        else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| RdbError::phase_failure(format!("corrupted marker {}: {}", key, e)))
    }

    fn decide(
        &self,
        txn_id: TransactionId,
        phase: TxnPhase,
        mut batch: Vec<(String, Option<Value>)>,
    ) -> RdbResult<()> {
        let label = match phase {
            TxnPhase::Committed => "commit",
            _ => "abort",
        };
        let marker = serde_json::to_value(DecidedMarker { txn_id, phase }).map_err(|e| {
            self.phase_failure(txn_id, label, format!("cannot encode decision: {}", e))
        })?;
        batch.push((pending_key(txn_id), None));
        batch.push((decided_key(txn_id), Some(marker)));
        self.store
            .write_batch(batch)
            .map_err(|e| self.phase_failure(txn_id, label, format!("{} write failed: {}", label, e)))
    }

    fn lock(&self) -> RdbResult<MutexGuard<'_, HashMap<TransactionId, TxnEntry>>> {
        self.transactions
            .lock()
            .map_err(|_| RdbError::phase_failure("transaction table lock poisoned"))
    }

    fn reject(&self, txn_id: TransactionId, reason: String) -> RdbError {
        self.observer.emit(&StageEvent::RdbPrecommitRejected {
            txn_id,
            reason: reason.clone(),
        });
        RdbError::precommit_rejected(reason)
    }

    fn violation(&self, txn_id: TransactionId, reason: String) -> RdbError {
        self.observer.emit(&StageEvent::RdbProtocolViolation {
            txn_id,
            reason: reason.clone(),
        });
        RdbError::protocol_violation(reason)
    }

    fn phase_failure(&self, txn_id: TransactionId, phase: &'static str, reason: String) -> RdbError {
        self.observer.emit(&StageEvent::RdbPhaseFailed {
            txn_id,
            phase,
            reason: reason.clone(),
        });
        RdbError::phase_failure(reason)
    }
}

impl RdbCallback for KeyDbCallbackHandler {
    fn on_precommit(&self, txn: &RdbTransaction) -> RdbResult<()> {
        let mut txns = self.lock()?;

        if let Some(entry) = txns.get(&txn.id) {
            return Err(self.reject(
                txn.id,
                format!("transaction already {}", entry.phase.as_str()),
            ));
        }

        let conflict = txns.values().any(|e| {
            e.phase == TxnPhase::Prepared
                && e.write.as_ref().map(|w| w.key.as_str()) == Some(txn.key.as_str())
        });
        if conflict {
            return Err(self.reject(
                txn.id,
                format!("key {} is held by another prepared transaction", txn.key),
            ));
        }

        let write = PendingWrite {
            txn_id: txn.id,
            key: txn.key.clone(),
            value: txn.value.clone(),
        };
        let marker = serde_json::to_value(&write)
            .map_err(|e| self.reject(txn.id, format!("cannot encode pending write: {}", e)))?;
        self.store
            .put(&pending_key(txn.id), marker)
            .map_err(|e| self.reject(txn.id, format!("cannot persist pending write: {}", e)))?;

        txns.insert(
            txn.id,
            TxnEntry {
                phase: TxnPhase::Prepared,
                write: Some(write),
            },
        );
        self.observer.emit(&StageEvent::RdbPrepared {
            txn_id: txn.id,
            key: txn.key.clone(),
        });
        Ok(())
    }

    fn on_commit(&self, txn_id: TransactionId) -> RdbResult<()> {
        let mut txns = self.lock()?;

        let write = match txns.get(&txn_id) {
            None => {
                return Err(self.violation(txn_id, "commit without precommit".to_string()));
            }
            Some(entry) => match entry.phase {
                TxnPhase::Committed => return Ok(()),
                TxnPhase::Aborted => {
                    return Err(self.violation(txn_id, "commit after abort".to_string()));
                }
                TxnPhase::Prepared => entry.write.clone(),
            },
        };

        // Stays Prepared on failure so a redelivered commit can finish the job.
        let batch = write
            .map(|w| vec![(w.key, w.value)])
            .unwrap_or_default();
        self.decide(txn_id, TxnPhase::Committed, batch)?;

        txns.insert(
            txn_id,
            TxnEntry {
                phase: TxnPhase::Committed,
                write: None,
            },
        );
        self.observer.emit(&StageEvent::RdbCommitted { txn_id });
        Ok(())
    }

    fn on_abort(&self, txn_id: TransactionId) -> RdbResult<()> {
        let mut txns = self.lock()?;

        match txns.get(&txn_id).map(|e| e.phase) {
            Some(TxnPhase::Aborted) => return Ok(()),
            Some(TxnPhase::Committed) => {
                return Err(self.violation(txn_id, "abort after commit".to_string()));
            }
            Some(TxnPhase::Prepared) => self.decide(txn_id, TxnPhase::Aborted, Vec::new())?,
            // Precommit never reached us, or we voted no. Nothing to persist.
            None => {}
        }

        txns.insert(
            txn_id,
            TxnEntry {
                phase: TxnPhase::Aborted,
                write: None,
            },
        );
        self.observer.emit(&StageEvent::RdbAborted { txn_id });
        Ok(())
    }

    fn forget(&self, txn_id: TransactionId) -> RdbResult<bool> {
        let mut txns = self.lock()?;
        if !txns.get(&txn_id).is_some_and(|e| e.phase.is_decided()) {
            return Ok(false);
        }
        self.store
            .delete(&decided_key(txn_id))
            .map_err(|e| RdbError::phase_failure(format!("cannot clear decided marker: {}", e)))?;
        txns.remove(&txn_id);
        Ok(true)
    }
}
