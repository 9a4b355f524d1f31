//! The per-change capability a staged operation drives.

use super::errors::StagingResult;
use crate::peer::ChangeRecord;

/// Result of a read-only prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrerequisiteCheck {
    /// Change may proceed.
    Satisfied,
    /// Change must not proceed; nothing has been written.
    Unsatisfied { reason: String },
}

impl PrerequisiteCheck {
    /// Convenience constructor.
    pub fn unsatisfied(reason: impl Into<String>) -> Self {
        Self::Unsatisfied {
            reason: reason.into(),
        }
    }

    /// Whether the change may proceed.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// One node-local administrative change, split into phases so it can be
/// reversed until it is finalized.
///
/// Implementations hold whatever they need to undo their own apply (usually
/// a snapshot captured inside `apply_local_state`).
pub trait StagedChange {
    /// Short dotted name for logs, e.g. `keystore.enable`.
    fn name(&self) -> &'static str;

    /// Read-only check. Must not write anything.
    fn validate_prerequisites(&self, node: &str) -> PrerequisiteCheck;

    /// Durable local write. Must be atomic: on error nothing is left behind.
    fn apply_local_state(&mut self, node: &str) -> StagingResult<()>;

    /// Make the applied change visible and permanent.
    fn finalize(&mut self, node: &str) -> StagingResult<()>;

    /// Restore the state captured before `apply_local_state`.
    fn undo_local_state(&mut self, node: &str) -> StagingResult<()>;

    /// Record that brings a peer to the state this change targets.
    fn change_record(&self, node: &str) -> ChangeRecord;

    /// Record that retracts `change_record` from a peer.
    fn revert_record(&self, node: &str) -> ChangeRecord;
}
