//! Replicated database (RDB) callbacks
//!
//! An external coordinator runs a two-phase commit across the cluster and
//! calls back into each participating node: precommit, then commit or
//! abort. This module defines that contract, the key database handler that
//! honors it, and a dispatcher that fans phases out to several handlers.

mod callback;
mod dispatcher;
mod errors;
mod keydb;
mod transaction;

pub use callback::RdbCallback;
pub use dispatcher::RdbDispatcher;
pub use errors::{RdbError, RdbErrorKind, RdbResult};
pub use keydb::{KeyDbCallbackHandler, DECIDED_KEY_PREFIX, PENDING_KEY_PREFIX};
pub use transaction::{RdbTransaction, TransactionId, TxnPhase};
