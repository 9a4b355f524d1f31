//! Staged Operation
//!
//! Drives one [`StagedChange`] through validate → apply → commit/rollback
//! for a single target node.
//!
//! - `execute` validates, applies, then synchronizes with the peer
//! - Peer sync is advisory: its outcome is reported, never returned as an error
//! - `commit` is idempotent; a finalize failure halts the operation and is fatal
//! - `rollback` never undoes a committed change and never returns an error;
//!   undo failures are reported through the observer
//!
//! One operation per target node at a time. The caller owns the operation
//! exclusively; it is not `Clone` and all mutating methods take `&mut self`.

use std::sync::Arc;

use uuid::Uuid;

use super::change::{PrerequisiteCheck, StagedChange};
use super::errors::{StagingError, StagingResult};
use super::state::StageState;
use crate::observability::{Observer, StageEvent};
use crate::peer::{ChangeRecord, PeerSynchronizer, SyncOutcome};

/// What `rollback` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Applied local state was undone.
    RolledBack,
    /// Nothing had been applied.
    NothingToUndo,
    /// Change is committed; left untouched.
    AlreadyCommitted,
    /// A previous rollback already completed.
    AlreadyRolledBack,
    /// Operation was halted earlier; left untouched for the operator.
    Halted { reason: String },
    /// Undo failed; operation is now halted.
    UndoFailed { reason: String },
}

impl RollbackOutcome {
    /// Whether local state changed as a result of this call.
    pub fn undid_local_state(&self) -> bool {
        matches!(self, Self::RolledBack)
    }
}

/// One node-local administrative change in flight.
pub struct StagedOperation<C: StagedChange> {
    operation_id: Uuid,
    target_node: String,
    state: StageState,
    change: C,
    peer: Option<PeerSynchronizer>,
    peer_has_change: bool,
    observer: Arc<dyn Observer>,
}

impl<C: StagedChange> StagedOperation<C> {
    /// Create an operation for `target_node` with no peer.
    pub fn new(target_node: impl Into<String>, change: C, observer: Arc<dyn Observer>) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            target_node: target_node.into(),
            state: StageState::Created,
            change,
            peer: None,
            peer_has_change: false,
            observer,
        }
    }

    /// Propagate the change to a peer during `execute`.
    pub fn with_peer(mut self, peer: PeerSynchronizer) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Correlation id used in every event of this operation.
    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Node this operation changes.
    pub fn target_node(&self) -> &str {
        &self.target_node
    }

    /// Current state.
    pub fn state(&self) -> &StageState {
        &self.state
    }

    /// Whether the change has been finalized.
    pub fn is_committed(&self) -> bool {
        self.state == StageState::Committed
    }

    /// The change being driven.
    pub fn change(&self) -> &C {
        &self.change
    }

    /// Validate prerequisites, apply local state, then synchronize with the
    /// peer.
    ///
    /// Returns the peer outcome on success. Prerequisite and apply failures
    /// leave the operation in `Created`, so it may be executed again once
    /// the cause is fixed.
    pub fn execute(&mut self) -> StagingResult<SyncOutcome> {
        if self.state != StageState::Created {
            return Err(StagingError::illegal_transition(
                self.state.state_name(),
                "Validated",
            ));
        }

        self.emit(StageEvent::ExecuteStarted {
            operation_id: self.operation_id,
            change: self.change.name(),
            node: self.target_node.clone(),
        });

        if let PrerequisiteCheck::Unsatisfied { reason } =
            self.change.validate_prerequisites(&self.target_node)
        {
            self.emit(StageEvent::PrerequisitesNotMet {
                operation_id: self.operation_id,
                node: self.target_node.clone(),
                reason: reason.clone(),
            });
            return Err(StagingError::prerequisites_not_met(reason));
        }
        self.transition(StageState::validate)?;

        if let Err(err) = self.change.apply_local_state(&self.target_node) {
            self.transition(StageState::reset)?;
            self.emit(StageEvent::LocalApplyFailed {
                operation_id: self.operation_id,
                node: self.target_node.clone(),
                reason: err.message.clone(),
            });
            return Err(StagingError::local_apply_failure(err.message));
        }
        self.transition(StageState::apply)?;

        self.emit(StageEvent::LocalStateApplied {
            operation_id: self.operation_id,
            node: self.target_node.clone(),
        });

        let record = self.change.change_record(&self.target_node);
        let outcome = self.synchronize_with_peer(&record);
        if outcome.is_synchronized() {
            self.peer_has_change = true;
        }
        Ok(outcome)
    }

    /// Finalize the applied change.
    ///
    /// A second call after success is a no-op. A finalize failure halts the
    /// operation and returns a fatal error: the local state is applied and
    /// there is no local recovery path left.
    pub fn commit(&mut self) -> StagingResult<()> {
        match &self.state {
            StageState::Committed => return Ok(()),
            StageState::Applied => {}
            other => {
                return Err(StagingError::illegal_transition(
                    other.state_name(),
                    "Committed",
                ))
            }
        }

        if let Err(err) = self.change.finalize(&self.target_node) {
            let reason = err.message;
            self.transition(|s| s.halt(reason.clone()))?;
            self.emit(StageEvent::FinalizeFailed {
                operation_id: self.operation_id,
                node: self.target_node.clone(),
                reason: reason.clone(),
            });
            return Err(StagingError::finalize_failure(reason));
        }

        self.transition(StageState::commit)?;
        self.emit(StageEvent::Committed {
            operation_id: self.operation_id,
            node: self.target_node.clone(),
        });
        Ok(())
    }

    /// Undo applied local state unless the change is committed.
    ///
    /// Also retracts the change from the peer if it was delivered there,
    /// on the same best-effort terms as `execute`.
    pub fn rollback(&mut self) -> RollbackOutcome {
        match self.state.clone() {
            StageState::Committed => {
                self.emit_rollback_skipped();
                RollbackOutcome::AlreadyCommitted
            }
            StageState::RolledBack => {
                self.emit_rollback_skipped();
                RollbackOutcome::AlreadyRolledBack
            }
            StageState::Halted { reason } => {
                self.emit_rollback_skipped();
                RollbackOutcome::Halted { reason }
            }
            // Validated never outlives `execute`; reset it before abandoning.
            StageState::Created | StageState::Validated => {
                self.emit_rollback_skipped();
                match self.transition(|s| match s {
                    StageState::Validated => s.reset()?.roll_back(),
                    s => s.roll_back(),
                }) {
                    Ok(()) => RollbackOutcome::NothingToUndo,
                    Err(err) => RollbackOutcome::UndoFailed {
                        reason: err.message,
                    },
                }
            }
            StageState::Applied => match self.change.undo_local_state(&self.target_node) {
                Ok(()) => {
                    if let Err(err) = self.transition(StageState::roll_back) {
                        return RollbackOutcome::UndoFailed {
                            reason: err.message,
                        };
                    }
                    self.emit(StageEvent::RolledBack {
                        operation_id: self.operation_id,
                        node: self.target_node.clone(),
                    });
                    if self.peer_has_change {
                        let record = self.change.revert_record(&self.target_node);
                        if self.synchronize_with_peer(&record).is_synchronized() {
                            self.peer_has_change = false;
                        }
                    }
                    RollbackOutcome::RolledBack
                }
                Err(err) => {
                    let reason = err.message;
                    if let Err(err) = self.transition(|s| s.halt(reason.clone())) {
                        return RollbackOutcome::UndoFailed {
                            reason: err.message,
                        };
                    }
                    self.emit(StageEvent::RollbackFailed {
                        operation_id: self.operation_id,
                        node: self.target_node.clone(),
                        reason: reason.clone(),
                    });
                    RollbackOutcome::UndoFailed { reason }
                }
            },
        }
    }

    fn synchronize_with_peer(&self, record: &ChangeRecord) -> SyncOutcome {
        let Some(peer) = &self.peer else {
            self.emit(StageEvent::PeerSyncSkipped {
                operation_id: self.operation_id,
                node: self.target_node.clone(),
            });
            return SyncOutcome::Skipped;
        };

        let outcome = peer.synchronize(record);
        match &outcome {
            SyncOutcome::Synchronized { peer, attempts } => {
                self.emit(StageEvent::PeerSyncSucceeded {
                    operation_id: self.operation_id,
                    node: self.target_node.clone(),
                    peer: peer.clone(),
                    attempts: *attempts,
                })
            }
            SyncOutcome::Failed {
                peer,
                attempts,
                error,
            } => self.emit(StageEvent::PeerSyncFailed {
                operation_id: self.operation_id,
                node: self.target_node.clone(),
                peer: peer.clone(),
                attempts: *attempts,
                reason: error.to_string(),
            }),
            SyncOutcome::Skipped => {}
        }
        outcome
    }

    fn transition(
        &mut self,
        step: impl FnOnce(StageState) -> StagingResult<StageState>,
    ) -> StagingResult<()> {
        self.state = step(self.state.clone())?;
        Ok(())
    }

    fn emit_rollback_skipped(&self) {
        self.emit(StageEvent::RollbackSkipped {
            operation_id: self.operation_id,
            node: self.target_node.clone(),
            state: self.state.state_name(),
        });
    }

    fn emit(&self, event: StageEvent) {
        self.observer.emit(&event);
    }
}
