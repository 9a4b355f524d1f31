//! The callback contract between a replicated-database coordinator and a
//! node-local subsystem.

use super::errors::RdbResult;
use super::transaction::{RdbTransaction, TransactionId};

/// Handler for the three phases of one distributed transaction.
///
/// For a given transaction the coordinator delivers `on_precommit` first,
/// then exactly one of `on_commit` / `on_abort`. Calls may arrive on any
/// thread, and not on the thread that ran the related staged operation.
///
/// - `on_precommit` prepares reversible state only. Returning an error is a
///   "no" vote.
/// - `on_commit` makes the prepared state permanent. It must not refuse.
/// - `on_abort` removes every trace of the prepared state.
///
/// Once the coordinator will never deliver a phase for a transaction again,
/// it calls `forget` so the handler can drop what it kept to detect
/// duplicate or out-of-order deliveries.
pub trait RdbCallback: Send + Sync {
    /// Prepare to accept the transaction.
    fn on_precommit(&self, txn: &RdbTransaction) -> RdbResult<()>;

    /// Finalize a prepared transaction.
    fn on_commit(&self, txn_id: TransactionId) -> RdbResult<()>;

    /// Cancel a transaction.
    fn on_abort(&self, txn_id: TransactionId) -> RdbResult<()>;

    /// Drop bookkeeping for a decided transaction. Returns whether anything
    /// was dropped; a transaction still prepared is kept.
    fn forget(&self, _txn_id: TransactionId) -> RdbResult<bool> {
        Ok(false)
    }
}
