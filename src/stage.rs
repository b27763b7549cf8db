//! Stage progress tracking.
//!
//! The five-stage ladder is monotonic per participant: stages advance only
//! through [`StageProgressTracker::advance`], and only when the stage's
//! exit gate and the cross-participant constraint are both satisfied.
//! Gate evaluation itself is pure ([`crate::gate`]); this module gathers
//! the facts, applies the decision, and emits events.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::gate::{self, GateOutcome};
use crate::model::{Milestone, Stage, StageStatus};
use crate::notify::{Event, NotificationPort};
use crate::observability::metrics;
use crate::store::SessionStore;

/// Why an advance request did not move the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    /// The stage's own exit gate is unsatisfied.
    GateNotSatisfied,
    /// The gate passed but the partner has not caught up.
    PartnerNotReady,
}

/// Result of an advance request.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceOutcome {
    /// Whether the stage moved.
    pub advanced: bool,
    /// The user's stage after the call.
    pub stage: Stage,
    /// The user's status after the call.
    pub status: StageStatus,
    /// Present when `advanced` is false and progress was actually blocked
    /// (an already-completed session reports neither).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<BlockedReason>,
    /// Gate names still unsatisfied, empty unless blocked on the gate.
    pub unsatisfied_gates: Vec<&'static str>,
}

/// Advances participants through the stage ladder.
pub struct StageProgressTracker {
    store: Arc<SessionStore>,
    notifier: Arc<dyn NotificationPort>,
}

impl StageProgressTracker {
    /// Creates a tracker over the given store and notifier.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, notifier: Arc<dyn NotificationPort>) -> Self {
        Self { store, notifier }
    }

    /// Evaluates the exit gate of `stage` for `user` without mutating
    /// anything. Safe to poll.
    pub fn gate_status(
        &self,
        session_id: Uuid,
        user: Uuid,
        stage: Stage,
    ) -> Result<GateOutcome, StoreError> {
        let session = self.store.get(session_id)?;
        session.with_state(|state| {
            let index = state.participant_index(user)?;
            Ok(gate::evaluate(stage, &state.gate_facts(index)))
        })
    }

    /// Confirms a milestone for `user`. Duplicate confirmations keep the
    /// original timestamp.
    pub fn confirm_milestone(
        &self,
        session_id: Uuid,
        user: Uuid,
        milestone: Milestone,
    ) -> Result<(), StoreError> {
        let session = self.store.get(session_id)?;
        session.with_state(|state| state.confirm_milestone(user, milestone, Utc::now()))
    }

    /// Attempts to advance `user` past their current stage.
    ///
    /// Moves exactly one stage per call, and only forward. Completing the
    /// final stage flips the status to `Completed` instead of moving.
    pub fn advance(&self, session_id: Uuid, user: Uuid) -> Result<AdvanceOutcome, StoreError> {
        let session = self.store.get(session_id)?;

        let (outcome, event) = session.with_state(|state| {
            let index = state.participant_index(user)?;
            let current = state.progress[index].stage;
            let status = state.progress[index].status;

            if status == StageStatus::Completed {
                // Terminal; re-advancing is a no-op success.
                return Ok((
                    AdvanceOutcome {
                        advanced: false,
                        stage: current,
                        status,
                        blocked_reason: None,
                        unsatisfied_gates: Vec::new(),
                    },
                    None,
                ));
            }

            let gate = gate::evaluate(current, &state.gate_facts(index));
            if !gate.satisfied {
                return Ok((
                    AdvanceOutcome {
                        advanced: false,
                        stage: current,
                        status,
                        blocked_reason: Some(BlockedReason::GateNotSatisfied),
                        unsatisfied_gates: gate.unsatisfied_gates,
                    },
                    None,
                ));
            }

            if !state.partner_ready(index, current) {
                return Ok((
                    AdvanceOutcome {
                        advanced: false,
                        stage: current,
                        status,
                        blocked_reason: Some(BlockedReason::PartnerNotReady),
                        unsatisfied_gates: Vec::new(),
                    },
                    None,
                ));
            }

            let progress = &mut state.progress[index];
            progress.advanced_at = Some(Utc::now());

            let (outcome, event) = match current.next() {
                Some(next) => {
                    progress.stage = next;
                    (
                        AdvanceOutcome {
                            advanced: true,
                            stage: next,
                            status: StageStatus::InProgress,
                            blocked_reason: None,
                            unsatisfied_gates: Vec::new(),
                        },
                        Event::StageAdvanced {
                            user_id: user,
                            from: current,
                            to: next,
                        },
                    )
                }
                None => {
                    progress.status = StageStatus::Completed;
                    (
                        AdvanceOutcome {
                            advanced: true,
                            stage: current,
                            status: StageStatus::Completed,
                            blocked_reason: None,
                            unsatisfied_gates: Vec::new(),
                        },
                        Event::SessionCompleted { user_id: user },
                    )
                }
            };
            Ok::<_, StoreError>((outcome, Some(event)))
        })?;

        if let Some(event) = event {
            info!(
                %session_id,
                user_id = %user,
                stage = %outcome.stage,
                status = ?outcome.status,
                "stage advanced"
            );
            metrics::record_stage_advance(outcome.stage, outcome.status == StageStatus::Completed);
            self.notifier.publish(session_id, event);
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for StageProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageProgressTracker").finish_non_exhaustive()
    }
}
