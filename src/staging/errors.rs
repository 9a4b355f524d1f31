//! Staging Error Types
//!
//! - Validation and apply failures are returned to the caller; no cleanup needed
//! - Finalize failures are fatal: local state is applied and cannot be
//!   finalized, so an operator must intervene
//! - Peer sync failures never appear here (see `peer::PeerSyncError`)

use std::fmt;

use crate::storage::StoreError;

/// Staging error type
#[derive(Debug, Clone)]
pub struct StagingError {
    /// Error kind
    pub kind: StagingErrorKind,
    /// Error message
    pub message: String,
}

/// Staging error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingErrorKind {
    /// Prerequisite check failed; nothing was written
    PrerequisitesNotMet,

    /// Atomic local write failed; nothing was written
    LocalApplyFailure,

    /// Finalize failed after local state was applied
    FinalizeFailure,

    /// Undo of applied local state failed
    UndoFailure,

    /// Operation invoked in a state that does not allow it
    IllegalTransition,
}

impl StagingError {
    /// Create a new staging error.
    pub fn new(kind: StagingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a prerequisites-not-met error.
    pub fn prerequisites_not_met(reason: impl Into<String>) -> Self {
        Self::new(StagingErrorKind::PrerequisitesNotMet, reason)
    }

    /// Create a local apply failure.
    pub fn local_apply_failure(reason: impl Into<String>) -> Self {
        Self::new(StagingErrorKind::LocalApplyFailure, reason)
    }

    /// Create a finalize failure.
    pub fn finalize_failure(reason: impl Into<String>) -> Self {
        Self::new(StagingErrorKind::FinalizeFailure, reason)
    }

    /// Create an undo failure.
    pub fn undo_failure(reason: impl Into<String>) -> Self {
        Self::new(StagingErrorKind::UndoFailure, reason)
    }

    /// Create an illegal transition error.
    pub fn illegal_transition(from: &str, to: &str) -> Self {
        Self::new(
            StagingErrorKind::IllegalTransition,
            format!("illegal transition: {} → {}", from, to),
        )
    }

    /// Check if this error requires operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, StagingErrorKind::FinalizeFailure)
    }

    /// Check if the caller may retry after fixing the cause.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            StagingErrorKind::PrerequisitesNotMet | StagingErrorKind::LocalApplyFailure
        )
    }

    /// Adapter for store errors raised while applying local state.
    pub fn from_apply(err: StoreError) -> Self {
        Self::local_apply_failure(err.to_string())
    }

    /// Adapter for store errors raised while finalizing.
    pub fn from_finalize(err: StoreError) -> Self {
        Self::finalize_failure(err.to_string())
    }

    /// Adapter for store errors raised while undoing.
    pub fn from_undo(err: StoreError) -> Self {
        Self::undo_failure(err.to_string())
    }
}

impl fmt::Display for StagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StagingError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for StagingError {}

/// Result type for staging operations
pub type StagingResult<T> = Result<T, StagingError>;
