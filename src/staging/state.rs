//! Staged Operation State Machine
//!
//! ```text
//! Created ──validate──▶ Validated ──apply──▶ Applied ──commit──▶ Committed
//!    ▲                      │                   │
//!    └──── apply failed ────┘                   ├──rollback──▶ RolledBack
//! Created ──rollback──▶ RolledBack              └──fatal─────▶ Halted
//! ```
//!
//! - Terminal states: Committed, RolledBack, Halted
//! - No transition leaves Committed
//! - Every transition consumes the state; a forbidden one is an error, never
//!   a silent no-op

use super::errors::{StagingError, StagingResult};

/// State of one staged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageState {
    /// Constructed; nothing checked or written.
    Created,

    /// Prerequisites hold; nothing written yet.
    Validated,

    /// Local state durably written, not yet finalized.
    Applied,

    /// Change finalized. Permanent.
    Committed,

    /// Applied state undone, or abandoned before apply.
    RolledBack,

    /// Finalize or undo failed; local state needs an operator.
    Halted { reason: String },
}

impl Default for StageState {
    fn default() -> Self {
        Self::Created
    }
}

impl StageState {
    /// State name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Validated => "Validated",
            Self::Applied => "Applied",
            Self::Committed => "Committed",
            Self::RolledBack => "RolledBack",
            Self::Halted { .. } => "Halted",
        }
    }

    /// No further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack | Self::Halted { .. }
        )
    }

    /// Local state was written and has not been undone.
    pub fn has_local_effect(&self) -> bool {
        matches!(self, Self::Applied | Self::Committed | Self::Halted { .. })
    }

    /// Created → Validated
    pub fn validate(self) -> StagingResult<Self> {
        match self {
            Self::Created => Ok(Self::Validated),
            other => Err(StagingError::illegal_transition(other.state_name(), "Validated")),
        }
    }

    /// Validated → Applied
    pub fn apply(self) -> StagingResult<Self> {
        match self {
            Self::Validated => Ok(Self::Applied),
            other => Err(StagingError::illegal_transition(other.state_name(), "Applied")),
        }
    }

    /// Validated → Created
    ///
    /// Apply failed atomically; the operation may be executed again.
    pub fn reset(self) -> StagingResult<Self> {
        match self {
            Self::Validated => Ok(Self::Created),
            other => Err(StagingError::illegal_transition(other.state_name(), "Created")),
        }
    }

    /// Applied → Committed
    pub fn commit(self) -> StagingResult<Self> {
        match self {
            Self::Applied => Ok(Self::Committed),
            other => Err(StagingError::illegal_transition(other.state_name(), "Committed")),
        }
    }

    /// Created | Applied → RolledBack
    pub fn roll_back(self) -> StagingResult<Self> {
        match self {
            Self::Created | Self::Applied => Ok(Self::RolledBack),
            other => Err(StagingError::illegal_transition(other.state_name(), "RolledBack")),
        }
    }

    /// Applied → Halted
    pub fn halt(self, reason: impl Into<String>) -> StagingResult<Self> {
        match self {
            Self::Applied => Ok(Self::Halted {
                reason: reason.into(),
            }),
            other => Err(StagingError::illegal_transition(other.state_name(), "Halted")),
        }
    }
}
