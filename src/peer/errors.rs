//! Peer synchronization errors
//!
//! Peer sync is advisory: these errors are logged at the staging boundary
//! and never fail the local change.

use std::fmt;

/// Peer sync error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSyncErrorKind {
    /// Peer could not be reached
    Unreachable,

    /// Attempt exceeded the configured bound
    TimedOut,

    /// Peer received the change and refused it
    Rejected,
}

/// Peer sync error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSyncError {
    /// Error kind
    pub kind: PeerSyncErrorKind,
    /// Error message
    pub message: String,
}

impl PeerSyncError {
    /// Create a new peer sync error.
    pub fn new(kind: PeerSyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Peer unreachable.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(PeerSyncErrorKind::Unreachable, message)
    }

    /// Attempt timed out.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(PeerSyncErrorKind::TimedOut, message)
    }

    /// Peer refused the change.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(PeerSyncErrorKind::Rejected, message)
    }

    /// A refusal will be repeated on retry; transport failures may not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, PeerSyncErrorKind::Rejected)
    }
}

impl fmt::Display for PeerSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerSyncError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for PeerSyncError {}

/// Result type for peer transports
pub type PeerSyncResult<T> = Result<T, PeerSyncError>;
