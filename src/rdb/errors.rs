//! RDB Callback Error Types
//!
//! - A precommit error is a "no" vote: the coordinator must abort
//! - Commit and abort cannot be refused; any error there is fatal
//! - Out-of-contract phase delivery is fatal and never silently accepted

use std::fmt;

/// RDB callback error type
#[derive(Debug, Clone)]
pub struct RdbError {
    /// Error kind
    pub kind: RdbErrorKind,
    /// Error message
    pub message: String,
}

/// RDB callback error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdbErrorKind {
    /// Precommit refused; nothing was prepared
    PrecommitRejected,

    /// Phases delivered out of order (commit without precommit, abort after commit, ...)
    ProtocolViolation,

    /// Commit or abort could not complete locally
    PhaseFailure,
}

impl RdbError {
    /// Create a new RDB error.
    pub fn new(kind: RdbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a precommit rejection.
    pub fn precommit_rejected(message: impl Into<String>) -> Self {
        Self::new(RdbErrorKind::PrecommitRejected, message)
    }

    /// Create a protocol violation.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(RdbErrorKind::ProtocolViolation, message)
    }

    /// Create a phase failure.
    pub fn phase_failure(message: impl Into<String>) -> Self {
        Self::new(RdbErrorKind::PhaseFailure, message)
    }

    /// Check if this error requires operator intervention.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, RdbErrorKind::PrecommitRejected)
    }
}

impl fmt::Display for RdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RdbError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for RdbError {}

/// Result type for RDB callbacks
pub type RdbResult<T> = Result<T, RdbError>;
