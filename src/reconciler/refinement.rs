//! Refinement window: resubmit or skip after accepted sharing.
//!
//! Only a direction sitting in `Refining` accepts input; the claim back
//! to `Reconciling` happens under the session lock, so two racing
//! submissions can never trigger the engine twice for one window.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Direction, RefinementInput};
use crate::store::{SessionState, SessionStore};

use super::engine::ReconcilerEngine;

/// Outcome of a refinement submission.
#[derive(Debug, Clone, Copy)]
pub struct RefinementOutcome {
    /// The direction whose reconciliation was re-triggered.
    pub direction: Direction,
    /// The attempt number the next reconciliation will evaluate.
    pub attempt_number: u32,
}

/// Accepts refinement input and re-triggers the engine.
pub struct RefinementCoordinator {
    store: Arc<SessionStore>,
    engine: Arc<ReconcilerEngine>,
}

impl RefinementCoordinator {
    /// Creates a coordinator sharing the engine's store.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, engine: Arc<ReconcilerEngine>) -> Self {
        Self { store, engine }
    }

    /// Submits a revised attempt or a skip for the guesser's refinement
    /// window.
    ///
    /// A resubmit shares the new text immediately (the original already
    /// had consent). A skip re-runs reconciliation on the unchanged text.
    /// Either way the window closes and the engine evaluates again.
    pub fn submit(
        &self,
        session_id: Uuid,
        user: Uuid,
        input: RefinementInput,
    ) -> Result<RefinementOutcome, StoreError> {
        let session = self.store.get(session_id)?;

        let (direction, attempt_number) = session.with_state(|state| {
            let index = state.participant_index(user)?;
            let direction = SessionState::direction_for_guesser(index);

            if !state.claim_refinement_rerun(direction) {
                return Err(StoreError::RefinementNotOpen(user));
            }

            if let RefinementInput::Resubmit(content) = &input {
                // Claim already moved the phase; roll it back if the text
                // is rejected so the window stays open.
                if let Err(err) = state.resubmit(user, content.clone(), Utc::now()) {
                    state.reopen_refinement(direction);
                    return Err(err);
                }
            }

            let attempt_number = state.reconcile_inputs(direction)?.attempt_number;
            Ok::<(Direction, u32), StoreError>((direction, attempt_number))
        })?;

        info!(
            %session_id,
            %direction,
            attempt_number,
            skipped = matches!(input, RefinementInput::SkipRefinement),
            "refinement submitted"
        );

        self.engine.spawn_reconcile(session_id, direction);

        Ok(RefinementOutcome {
            direction,
            attempt_number,
        })
    }
}

impl std::fmt::Debug for RefinementCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementCoordinator").finish_non_exhaustive()
    }
}
