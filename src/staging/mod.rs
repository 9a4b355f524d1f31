//! Staged Changes
//!
//! Node-local administrative changes that progress through
//! validate → apply → commit | rollback.
//!
//! - Validation is read-only; a failed validation writes nothing
//! - Apply is atomic and durable but not yet final
//! - Commit is idempotent and permanent
//! - Rollback never reverses a committed change
//! - Peer synchronization is best-effort and never decides the outcome
//!
//! Cluster-wide agreement is not decided here; see `rdb`.

mod change;
mod errors;
mod keystore;
mod operation;
mod state;

pub use change::{PrerequisiteCheck, StagedChange};
pub use errors::{StagingError, StagingErrorKind, StagingResult};
pub use keystore::{keystore_key, KeystoreEnable, KeystoreRecord, KeystoreStatus, KEYSTORE_KEY_PREFIX};
pub use operation::{RollbackOutcome, StagedOperation};
pub use state::StageState;
