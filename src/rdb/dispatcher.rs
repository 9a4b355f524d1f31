//! Fan-out of coordinator phases to named handlers.
//!
//! The dispatcher is itself an [`RdbCallback`], so a node registers one
//! dispatcher with the coordinator and hangs its subsystems off it.
//!
//! - precommit succeeds only if every handler votes yes; on the first "no"
//!   every handler already prepared is aborted
//! - if one of those aborts fails, the transaction stays open and the
//!   coordinator's abort is delivered to every handler again
//! - commit and abort reach every handler even if one of them fails; the
//!   first failure is returned
//! - phase ordering is checked here before any handler is called

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::callback::RdbCallback;
use super::errors::{RdbError, RdbResult};
use super::transaction::{RdbTransaction, TransactionId, TxnPhase};
use crate::observability::{Observer, StageEvent};

/// Dispatcher-side view of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Prepared,
    /// Vote was no, but some handler could not undo its precommit
    AbortPending,
    Committed,
    Aborted,
}

impl DispatchState {
    fn phase(self) -> TxnPhase {
        match self {
            Self::Prepared | Self::AbortPending => TxnPhase::Prepared,
            Self::Committed => TxnPhase::Committed,
            Self::Aborted => TxnPhase::Aborted,
        }
    }
}

/// Routes each phase to every registered handler in registration order.
pub struct RdbDispatcher {
    handlers: Vec<(String, Arc<dyn RdbCallback>)>,
    observer: Arc<dyn Observer>,
    states: Mutex<HashMap<TransactionId, DispatchState>>,
}

impl RdbDispatcher {
    /// Create a dispatcher with no handlers.
    pub fn new(observer: Arc<dyn Observer>) -> Self {
        Self {
            handlers: Vec::new(),
            observer,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler under `name`.
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn RdbCallback>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    /// Names of registered handlers, in call order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Phase `txn_id` has reached, if known.
    ///
    /// A refused precommit whose cleanup failed reports `Prepared` until an
    /// abort gets through to every handler.
    pub fn phase(&self, txn_id: TransactionId) -> Option<TxnPhase> {
        self.states
            .lock()
            .ok()
            .and_then(|s| s.get(&txn_id).map(|state| state.phase()))
    }

    /// Seed the phase of a transaction a handler recovered after a restart.
    ///
    /// A transaction already tracked keeps its phase.
    pub fn adopt(&self, txn_id: TransactionId, phase: TxnPhase) -> RdbResult<()> {
        let state = match phase {
            TxnPhase::Prepared => DispatchState::Prepared,
            TxnPhase::Committed => DispatchState::Committed,
            TxnPhase::Aborted => DispatchState::Aborted,
        };
        self.lock()?.entry(txn_id).or_insert(state);
        Ok(())
    }

    /// Number of transactions the dispatcher still tracks.
    pub fn tracked_count(&self) -> usize {
        self.states.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Forget every decided transaction here and in every handler.
    ///
    /// Same contract as [`RdbCallback::forget`]: only for transactions the
    /// coordinator has closed. Returns the number dropped.
    pub fn forget_decided(&self) -> RdbResult<usize> {
        let decided: Vec<TransactionId> = self
            .lock()?
            .iter()
            .filter(|(_, state)| state.phase().is_decided())
            .map(|(id, _)| *id)
            .collect();

        let mut forgotten = 0;
        for txn_id in decided {
            if self.forget(txn_id)? {
                forgotten += 1;
            }
        }
        Ok(forgotten)
    }

    fn lock(&self) -> RdbResult<MutexGuard<'_, HashMap<TransactionId, DispatchState>>> {
        self.states
            .lock()
            .map_err(|_| RdbError::phase_failure("dispatcher phase table lock poisoned"))
    }

    fn violation(&self, txn_id: TransactionId, reason: &str) -> RdbError {
        self.observer.emit(&StageEvent::RdbProtocolViolation {
            txn_id,
            reason: reason.to_string(),
        });
        RdbError::protocol_violation(reason)
    }

    /// Deliver a phase to `handlers`, keeping the first error.
    fn deliver(
        handlers: &[(String, Arc<dyn RdbCallback>)],
        txn_id: TransactionId,
        phase: fn(&dyn RdbCallback, TransactionId) -> RdbResult<()>,
    ) -> RdbResult<()> {
        let mut first_error = None;
        for (name, handler) in handlers {
            if let Err(e) = phase(handler.as_ref(), txn_id) {
                if first_error.is_none() {
                    first_error = Some(RdbError::new(e.kind, format!("{}: {}", name, e.message)));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl RdbCallback for RdbDispatcher {
    fn on_precommit(&self, txn: &RdbTransaction) -> RdbResult<()> {
        let mut states = self.lock()?;
        if let Some(state) = states.get(&txn.id) {
            return Err(RdbError::precommit_rejected(format!(
                "transaction already {}",
                state.phase().as_str()
            )));
        }

        for (index, (name, handler)) in self.handlers.iter().enumerate() {
            if let Err(e) = handler.on_precommit(txn) {
                let prepared = &self.handlers[..index];
                return match Self::deliver(prepared, txn.id, |h, id| h.on_abort(id)) {
                    Ok(()) => {
                        states.insert(txn.id, DispatchState::Aborted);
                        Err(RdbError::new(e.kind, format!("{}: {}", name, e.message)))
                    }
                    Err(abort_err) => {
                        states.insert(txn.id, DispatchState::AbortPending);
                        Err(abort_err)
                    }
                };
            }
        }

        states.insert(txn.id, DispatchState::Prepared);
        Ok(())
    }

    fn on_commit(&self, txn_id: TransactionId) -> RdbResult<()> {
        let mut states = self.lock()?;
        match states.get(&txn_id) {
            None => return Err(self.violation(txn_id, "commit without precommit")),
            Some(DispatchState::Aborted) => return Err(self.violation(txn_id, "commit after abort")),
            Some(DispatchState::AbortPending) => {
                return Err(self.violation(txn_id, "commit after refused precommit"));
            }
            Some(DispatchState::Committed) => return Ok(()),
            Some(DispatchState::Prepared) => {}
        }

        // A handler that failed to commit is redelivered to on the next attempt.
        Self::deliver(&self.handlers, txn_id, |h, id| h.on_commit(id))?;
        states.insert(txn_id, DispatchState::Committed);
        Ok(())
    }

    fn on_abort(&self, txn_id: TransactionId) -> RdbResult<()> {
        let mut states = self.lock()?;
        match states.get(&txn_id) {
            None => {
                states.insert(txn_id, DispatchState::Aborted);
                return Ok(());
            }
            Some(DispatchState::Aborted) => return Ok(()),
            Some(DispatchState::Committed) => return Err(self.violation(txn_id, "abort after commit")),
            Some(DispatchState::Prepared) | Some(DispatchState::AbortPending) => {}
        }

        // Stays open on failure; handlers already aborted treat the retry as a duplicate.
        Self::deliver(&self.handlers, txn_id, |h, id| h.on_abort(id))?;
        states.insert(txn_id, DispatchState::Aborted);
        Ok(())
    }

    fn forget(&self, txn_id: TransactionId) -> RdbResult<bool> {
        let mut states = self.lock()?;
        if !states.get(&txn_id).is_some_and(|s| s.phase().is_decided()) {
            return Ok(false);
        }
        Self::deliver(&self.handlers, txn_id, |h, id| h.forget(id).map(|_| ()))?;
        states.remove(&txn_id);
        Ok(true)
    }
}
