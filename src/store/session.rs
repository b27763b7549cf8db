//! Per-session state and its transition operations.
//!
//! All mutations of one (session, direction) tuple go through
//! [`SessionState`] under the owning session's lock, so every operation in
//! this file can assume it is the only writer. Methods return outcome
//! structs; event emission and task spawning belong to the callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::SharingDeclinePolicy;
use crate::error::StoreError;
use crate::gate::GateFacts;
use crate::model::{
    AttemptStatus, Direction, EmpathyAttempt, Milestone, OfferStatus, ReconcileAction,
    ReconcilerResult, ShareOffer, SharedContext, Stage, StageProgress,
};

/// Where one direction currently sits in its reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPhase {
    /// Waiting for shared attempts; no cycle running.
    Drafting,
    /// A reconciliation task has been claimed and is running.
    Reconciling,
    /// An unresolved share offer is waiting for the subject.
    AwaitingOffer,
    /// Shared context was delivered; the guesser may resubmit or skip.
    Refining,
    /// Ready for reveal.
    Proceed,
}

/// Per-direction mutable state.
#[derive(Debug, Clone)]
pub struct DirectionState {
    /// Current cycle phase.
    pub phase: DirectionPhase,
    /// Refinement cycles consumed; compared against `max_refinements` by
    /// the circuit breaker. An explicit counter, not an inferred length.
    pub refinement_count: u32,
    /// Set when an `OfferSharing` decline closes the direction for the
    /// session (policy `session`).
    pub sharing_declined_for_session: bool,
}

impl DirectionState {
    const fn new() -> Self {
        Self {
            phase: DirectionPhase::Drafting,
            refinement_count: 0,
            sharing_declined_for_session: false,
        }
    }
}

/// Outcome of a consent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentOutcome {
    /// False when this was an idempotent duplicate.
    pub newly_shared: bool,
    /// The attempt number now current for the author.
    pub attempt_number: u32,
}

/// Everything the reconciler needs to evaluate one direction, captured
/// under the lock so the analyzer call can run without it.
#[derive(Debug, Clone)]
pub struct ReconcileInputs {
    /// Guesser's current shared attempt text.
    pub guesser_text: String,
    /// Subject's feelings statement (ground truth).
    pub subject_text: String,
    /// Guesser attempt number being evaluated.
    pub attempt_number: u32,
    /// Refinement cycles consumed so far.
    pub refinement_count: u32,
    /// Whether shared context already exists for this attempt pair.
    pub context_exists: bool,
    /// Whether a sharing decline has closed this direction for the session.
    pub sharing_declined: bool,
}

/// What `apply_reconcile_result` decided, for the caller to act on.
#[derive(Debug, Clone)]
pub struct AppliedResult {
    /// The persisted result row.
    pub result: ReconcilerResult,
    /// The offer opened alongside an OFFER_* result, if any.
    pub offer: Option<ShareOffer>,
    /// True when this application completed the reveal (both directions
    /// Proceed for the first time).
    pub newly_revealed: bool,
}

/// Outcome of responding to a share offer.
#[derive(Debug, Clone)]
pub struct RespondOutcome {
    /// The offer in its terminal state.
    pub offer: ShareOffer,
    /// Context created by an accept (never by a decline).
    pub context: Option<SharedContext>,
    /// False when this was an idempotent re-response.
    pub newly_resolved: bool,
    /// True when a decline completed the reveal.
    pub newly_revealed: bool,
}

/// Mutable state for one session. Guarded by the session's mutex.
#[derive(Debug)]
pub struct SessionState {
    /// Owning session id.
    pub session_id: Uuid,
    /// The two participants; index 0 is "A".
    pub participants: [Uuid; 2],
    /// Per-participant stage progress.
    pub progress: [StageProgress; 2],
    /// Per-participant feelings statements (recorded during feel-heard).
    pub feelings: [Option<String>; 2],
    /// All attempts, in creation order.
    pub attempts: Vec<EmpathyAttempt>,
    /// All reconciler results, in creation order.
    pub results: Vec<ReconcilerResult>,
    /// All share offers, in creation order.
    pub offers: Vec<ShareOffer>,
    /// All shared contexts, in creation order. Immutable once pushed.
    pub contexts: Vec<SharedContext>,
    /// Per-direction cycle state, indexed `[AToB, BToA]`.
    pub directions: [DirectionState; 2],
    /// Set once both directions reach Proceed.
    pub revealed: bool,
}

const fn dir_slot(direction: Direction) -> usize {
    match direction {
        Direction::AToB => 0,
        Direction::BToA => 1,
    }
}

impl SessionState {
    /// Fresh state for a new session.
    #[must_use]
    pub fn new(session_id: Uuid, participants: [Uuid; 2]) -> Self {
        Self {
            session_id,
            participants,
            progress: [
                StageProgress::new(session_id, participants[0]),
                StageProgress::new(session_id, participants[1]),
            ],
            feelings: [None, None],
            attempts: Vec::new(),
            results: Vec::new(),
            offers: Vec::new(),
            contexts: Vec::new(),
            directions: [DirectionState::new(), DirectionState::new()],
            revealed: false,
        }
    }

    /// Resolves a user id to a participant index.
    pub fn participant_index(&self, user: Uuid) -> Result<usize, StoreError> {
        self.participants
            .iter()
            .position(|p| *p == user)
            .ok_or(StoreError::NotAParticipant {
                user,
                session: self.session_id,
            })
    }

    /// The direction in which `participant` is the guesser.
    #[must_use]
    pub const fn direction_for_guesser(index: usize) -> Direction {
        if index == 0 {
            Direction::AToB
        } else {
            Direction::BToA
        }
    }

    /// Shared access to one direction's state.
    #[must_use]
    pub const fn direction(&self, direction: Direction) -> &DirectionState {
        &self.directions[dir_slot(direction)]
    }

    fn direction_mut(&mut self, direction: Direction) -> &mut DirectionState {
        &mut self.directions[dir_slot(direction)]
    }

    // ------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------

    /// The author's most recent consented attempt, if any.
    ///
    /// Reconciliation reads only consented text. A newer Held draft is
    /// invisible to the engine until its own consent.
    #[must_use]
    pub fn current_shared_attempt(&self, author: Uuid) -> Option<&EmpathyAttempt> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.author_id == author && a.status == AttemptStatus::Shared)
    }

    /// Highest consented attempt number for the author.
    fn last_shared_number(&self, author: Uuid) -> u32 {
        self.attempts
            .iter()
            .filter(|a| a.author_id == author && a.status == AttemptStatus::Shared)
            .map(|a| a.attempt_number)
            .max()
            .unwrap_or(0)
    }

    /// Upserts the author's Held draft. Does not touch the attempt number
    /// sequence — only consent does.
    pub fn save_draft(&mut self, author: Uuid, content: String) -> Result<(), StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        self.participant_index(author)?;

        if let Some(held) = self
            .attempts
            .iter_mut()
            .find(|a| a.author_id == author && a.status == AttemptStatus::Held)
        {
            held.content = content;
            return Ok(());
        }

        let attempt_number = self.last_shared_number(author) + 1;
        self.attempts.push(EmpathyAttempt {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            author_id: author,
            content,
            status: AttemptStatus::Held,
            attempt_number,
            consented_at: None,
        });
        Ok(())
    }

    /// Transitions the author's Held draft to Shared.
    ///
    /// A duplicate call (no Held row, but a Shared row exists) is an
    /// idempotent no-op success; consent with no attempt at all is a
    /// validation error.
    pub fn consent(&mut self, author: Uuid, now: DateTime<Utc>) -> Result<ConsentOutcome, StoreError> {
        self.participant_index(author)?;

        if let Some(held) = self
            .attempts
            .iter_mut()
            .find(|a| a.author_id == author && a.status == AttemptStatus::Held)
        {
            held.status = AttemptStatus::Shared;
            held.consented_at = Some(now);
            return Ok(ConsentOutcome {
                newly_shared: true,
                attempt_number: held.attempt_number,
            });
        }

        let last = self.last_shared_number(author);
        if last > 0 {
            // Duplicate consent — tolerate client retries.
            debug!(author = %author, "duplicate consent ignored");
            return Ok(ConsentOutcome {
                newly_shared: false,
                attempt_number: last,
            });
        }

        Err(StoreError::NoDraft(author))
    }

    /// Records a new attempt during an open refinement window, immediately
    /// Shared at attempt_number + 1. Phase checks belong to the caller.
    pub fn resubmit(
        &mut self,
        author: Uuid,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        self.participant_index(author)?;

        let attempt_number = self.last_shared_number(author) + 1;
        self.attempts.push(EmpathyAttempt {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            author_id: author,
            content,
            status: AttemptStatus::Shared,
            attempt_number,
            consented_at: Some(now),
        });
        Ok(attempt_number)
    }

    // ------------------------------------------------------------------
    // Reconciliation claims
    // ------------------------------------------------------------------

    /// Whether a direction is eligible for a reconciliation cycle.
    ///
    /// Requires a consented attempt from the guesser, the partner to
    /// have consented at least once (the engine never runs one-sided), the
    /// subject's feelings statement to exist, and no cycle or unresolved
    /// offer in flight.
    #[must_use]
    pub fn reconcile_eligible(&self, direction: Direction) -> bool {
        let guesser = self.participants[direction.guesser_index()];
        let subject = self.participants[direction.subject_index()];

        self.direction(direction).phase == DirectionPhase::Drafting
            && self.current_shared_attempt(guesser).is_some()
            && self.last_shared_number(subject) > 0
            && self.feelings[direction.subject_index()].is_some()
    }

    /// Claims eligible directions for reconciliation, moving each from
    /// Drafting to Reconciling. Only the caller that wins the claim runs
    /// the engine, so two concurrent consents cannot double-trigger.
    pub fn claim_reconciles(&mut self) -> Vec<Direction> {
        let mut claimed = Vec::new();
        for direction in Direction::BOTH {
            if self.reconcile_eligible(direction) {
                self.direction_mut(direction).phase = DirectionPhase::Reconciling;
                claimed.push(direction);
            }
        }
        claimed
    }

    /// Claims a single direction coming out of a refinement window.
    pub fn claim_refinement_rerun(&mut self, direction: Direction) -> bool {
        let state = self.direction_mut(direction);
        if state.phase == DirectionPhase::Refining {
            state.phase = DirectionPhase::Reconciling;
            true
        } else {
            false
        }
    }

    /// Rolls a claimed refinement rerun back to an open window.
    ///
    /// Used when the submission that won the claim turns out to be invalid
    /// (e.g. empty resubmit text).
    pub fn reopen_refinement(&mut self, direction: Direction) {
        self.direction_mut(direction).phase = DirectionPhase::Refining;
    }

    /// Captures the inputs for a claimed reconciliation.
    ///
    /// The direction must be in Reconciling (claimed by the caller).
    pub fn reconcile_inputs(&self, direction: Direction) -> Result<ReconcileInputs, StoreError> {
        let guesser = self.participants[direction.guesser_index()];
        let subject = self.participants[direction.subject_index()];

        let attempt = self
            .current_shared_attempt(guesser)
            .ok_or(StoreError::NoDraft(guesser))?;
        let subject_text = self.feelings[direction.subject_index()]
            .clone()
            .ok_or(StoreError::NoFeelingsStatement(subject))?;

        let state = self.direction(direction);
        Ok(ReconcileInputs {
            guesser_text: attempt.content.clone(),
            subject_text,
            attempt_number: attempt.attempt_number,
            refinement_count: state.refinement_count,
            context_exists: self.context_exists(direction, attempt.attempt_number),
            sharing_declined: state.sharing_declined_for_session,
        })
    }

    /// Whether shared context already exists for a direction+attempt pair.
    #[must_use]
    pub fn context_exists(&self, direction: Direction, attempt_number: u32) -> bool {
        self.contexts
            .iter()
            .any(|c| c.direction == direction && c.attempt_number == attempt_number)
    }

    /// Persists a reconciliation outcome for a claimed direction.
    ///
    /// Only a direction in `Reconciling` accepts a result: the claim is
    /// what makes each cycle produce exactly one result, so a stale
    /// duplicate application finds the phase already moved on and is
    /// dropped with `None`. On an OFFER_* action, opens the share offer
    /// and charges the direction's refinement counter.
    pub fn apply_reconcile_result(
        &mut self,
        direction: Direction,
        action: ReconcileAction,
        gap_summary: String,
        suggested_share_focus: Option<String>,
        attempt_number: u32,
        circuit_breaker_tripped: bool,
        now: DateTime<Utc>,
    ) -> Option<AppliedResult> {
        if self.direction(direction).phase != DirectionPhase::Reconciling {
            debug!(%direction, attempt_number, "dropping unclaimed reconciler result");
            return None;
        }

        let result = ReconcilerResult {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            direction,
            action,
            gap_summary,
            attempt_number,
            circuit_breaker_tripped,
            created_at: now,
        };
        self.results.push(result.clone());

        let mut offer = None;
        let mut newly_revealed = false;
        match action {
            ReconcileAction::Proceed => {
                self.direction_mut(direction).phase = DirectionPhase::Proceed;
                newly_revealed = self.check_reveal();
            }
            ReconcileAction::OfferOptional | ReconcileAction::OfferSharing => {
                let row = ShareOffer {
                    id: Uuid::new_v4(),
                    reconciler_result_id: result.id,
                    session_id: self.session_id,
                    direction,
                    status: OfferStatus::Offered,
                    action,
                    suggested_share_focus,
                    responded_at: None,
                };
                self.offers.push(row.clone());
                let state = self.direction_mut(direction);
                state.phase = DirectionPhase::AwaitingOffer;
                state.refinement_count += 1;
                offer = Some(row);
            }
        }

        Some(AppliedResult {
            result,
            offer,
            newly_revealed,
        })
    }

    // ------------------------------------------------------------------
    // Share offers
    // ------------------------------------------------------------------

    /// The unresolved offer whose subject is `user`, if any.
    #[must_use]
    pub fn pending_offer_for(&self, user_index: usize) -> Option<&ShareOffer> {
        self.offers.iter().rev().find(|o| {
            o.status == OfferStatus::Offered && o.direction.subject_index() == user_index
        })
    }

    /// Resolves a share offer.
    ///
    /// Re-responding to an already-resolved offer is an idempotent no-op
    /// success. Accepting creates the shared context (never twice for one
    /// attempt pair) and opens the refinement window; declining moves the
    /// direction straight to Proceed with no context created.
    pub fn respond_to_offer(
        &mut self,
        user: Uuid,
        offer_id: Uuid,
        accept: bool,
        shared_content: Option<String>,
        decline_policy: SharingDeclinePolicy,
        now: DateTime<Utc>,
    ) -> Result<RespondOutcome, StoreError> {
        let user_index = self.participant_index(user)?;
        let offer_index = self
            .offers
            .iter()
            .position(|o| o.id == offer_id)
            .ok_or(StoreError::OfferNotFound(offer_id))?;

        let (direction, offer_action, status, result_id) = {
            let o = &self.offers[offer_index];
            (o.direction, o.action, o.status, o.reconciler_result_id)
        };

        if direction.subject_index() != user_index {
            return Err(StoreError::NotOfferSubject(user));
        }

        // The attempt pair this offer was opened for. Accepts and retries
        // stay pinned to it even after later consents or cycles.
        let attempt_number = self
            .results
            .iter()
            .find(|r| r.id == result_id)
            .map_or(0, |r| r.attempt_number);

        if status != OfferStatus::Offered {
            // Already resolved — client retry. Report the terminal state.
            let offer = self.offers[offer_index].clone();
            let context = self
                .contexts
                .iter()
                .find(|c| c.direction == direction && c.attempt_number == attempt_number)
                .cloned();
            return Ok(RespondOutcome {
                offer,
                context,
                newly_resolved: false,
                newly_revealed: false,
            });
        }

        let mut context = None;
        let mut newly_revealed = false;

        if accept {
            let content = shared_content.ok_or(StoreError::MissingSharedContent)?;
            if content.trim().is_empty() {
                return Err(StoreError::EmptyContent);
            }
            if !self.context_exists(direction, attempt_number) {
                let row = SharedContext {
                    id: Uuid::new_v4(),
                    session_id: self.session_id,
                    sharer_id: user,
                    direction,
                    attempt_number,
                    content,
                    delivered_at: now,
                };
                self.contexts.push(row.clone());
                context = Some(row);
            }
            self.offers[offer_index].status = OfferStatus::Accepted;
            self.direction_mut(direction).phase = DirectionPhase::Refining;
        } else {
            // Declined: reveal proceeds with the guesser's original
            // attempt, no context is ever produced for this offer.
            self.offers[offer_index].status = OfferStatus::Declined;
            if offer_action == ReconcileAction::OfferSharing
                && decline_policy == SharingDeclinePolicy::Session
            {
                self.direction_mut(direction).sharing_declined_for_session = true;
            }
            self.direction_mut(direction).phase = DirectionPhase::Proceed;
            newly_revealed = self.check_reveal();
        }
        self.offers[offer_index].responded_at = Some(now);

        Ok(RespondOutcome {
            offer: self.offers[offer_index].clone(),
            context,
            newly_resolved: true,
            newly_revealed,
        })
    }

    /// Marks the session revealed once both directions reached Proceed.
    /// Returns true only on the transition.
    fn check_reveal(&mut self) -> bool {
        if !self.revealed
            && Direction::BOTH
                .iter()
                .all(|d| self.direction(*d).phase == DirectionPhase::Proceed)
        {
            self.revealed = true;
            return true;
        }
        false
    }

    // ------------------------------------------------------------------
    // Gate facts and milestones
    // ------------------------------------------------------------------

    /// Records the user's feelings statement (feel-heard stage).
    pub fn submit_feelings(&mut self, user: Uuid, content: String) -> Result<(), StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        let index = self.participant_index(user)?;
        self.feelings[index] = Some(content);
        Ok(())
    }

    /// Stamps a milestone for the user; duplicate confirmations keep the
    /// original timestamp.
    pub fn confirm_milestone(
        &mut self,
        user: Uuid,
        milestone: Milestone,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let index = self.participant_index(user)?;
        let progress = &mut self.progress[index];
        if !progress.has_milestone(milestone) {
            progress.milestones.push((milestone, now));
        }
        Ok(())
    }

    /// Gathers the gate facts for one participant.
    #[must_use]
    pub fn gate_facts(&self, index: usize) -> GateFacts {
        let progress = &self.progress[index];
        GateFacts {
            compact_signed: progress.has_milestone(Milestone::CompactSigned),
            feelings_stated: self.feelings[index].is_some(),
            feel_heard_confirmed: progress.has_milestone(Milestone::FeelHeardConfirmed),
            both_directions_proceed: self.revealed,
            needs_confirmed: progress.has_milestone(Milestone::NeedsConfirmed),
            common_ground_confirmed: progress.has_milestone(Milestone::CommonGroundConfirmed),
        }
    }

    /// Whether the partner side of a stage's cross-participant constraint
    /// holds for the user at `index`.
    ///
    /// Compact signing is mutual, and the empathy stage cannot be left by
    /// either participant until the session is revealed.
    #[must_use]
    pub fn partner_ready(&self, index: usize, stage: Stage) -> bool {
        let partner = &self.progress[1 - index];
        match stage {
            Stage::Compact => partner.has_milestone(Milestone::CompactSigned),
            Stage::Empathy => self.revealed,
            Stage::FeelHeard | Stage::Needs | Stage::CommonGround => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (SessionState, Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut s = SessionState::new(Uuid::new_v4(), [a, b]);
        s.submit_feelings(a, "I feel unheard".into()).unwrap();
        s.submit_feelings(b, "I feel rushed".into()).unwrap();
        (s, a, b)
    }

    #[test]
    fn draft_then_consent_assigns_attempt_one() {
        let (mut s, a, _) = state();
        s.save_draft(a, "you feel ignored".into()).unwrap();
        let outcome = s.consent(a, Utc::now()).unwrap();
        assert!(outcome.newly_shared);
        assert_eq!(outcome.attempt_number, 1);
    }

    #[test]
    fn draft_upsert_does_not_bump_number() {
        let (mut s, a, _) = state();
        s.save_draft(a, "first".into()).unwrap();
        s.save_draft(a, "second".into()).unwrap();
        assert_eq!(s.attempts.len(), 1);
        assert_eq!(s.attempts[0].content, "second");
        assert_eq!(s.attempts[0].attempt_number, 1);
    }

    #[test]
    fn duplicate_consent_is_noop_success() {
        let (mut s, a, _) = state();
        s.save_draft(a, "guess".into()).unwrap();
        let first = s.consent(a, Utc::now()).unwrap();
        let second = s.consent(a, Utc::now()).unwrap();
        assert!(first.newly_shared);
        assert!(!second.newly_shared);
        assert_eq!(second.attempt_number, first.attempt_number);
        let shared: Vec<_> = s
            .attempts
            .iter()
            .filter(|x| x.status == AttemptStatus::Shared)
            .collect();
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn consent_without_draft_is_error() {
        let (mut s, a, _) = state();
        assert!(matches!(
            s.consent(a, Utc::now()),
            Err(StoreError::NoDraft(_))
        ));
    }

    #[test]
    fn empty_draft_rejected() {
        let (mut s, a, _) = state();
        assert!(matches!(
            s.save_draft(a, "   ".into()),
            Err(StoreError::EmptyContent)
        ));
    }

    #[test]
    fn stranger_rejected() {
        let (mut s, _, _) = state();
        let stranger = Uuid::new_v4();
        assert!(matches!(
            s.save_draft(stranger, "hi".into()),
            Err(StoreError::NotAParticipant { .. })
        ));
    }

    #[test]
    fn claim_requires_both_consents() {
        let (mut s, a, _) = state();
        s.save_draft(a, "guess a".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        assert!(s.claim_reconciles().is_empty());
    }

    #[test]
    fn claim_fires_both_directions_after_second_consent() {
        let (mut s, a, b) = state();
        s.save_draft(a, "guess a".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "guess b".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();

        let claimed = s.claim_reconciles();
        assert_eq!(claimed.len(), 2);
        // Claimed directions cannot be claimed again.
        assert!(s.claim_reconciles().is_empty());
    }

    #[test]
    fn reconcile_inputs_ignore_newer_held_draft() {
        let (mut s, a, b) = state();
        s.save_draft(a, "consented guess".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();

        // A drafts again while the engine task is in flight.
        s.save_draft(a, "held rewrite".into()).unwrap();

        let inputs = s.reconcile_inputs(Direction::AToB).unwrap();
        assert_eq!(inputs.guesser_text, "consented guess");
        assert_eq!(inputs.attempt_number, 1);
    }

    #[test]
    fn held_draft_does_not_block_claim() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.save_draft(a, "drafting ahead".into()).unwrap();
        assert_eq!(s.claim_reconciles().len(), 2);
    }

    #[test]
    fn apply_proceed_marks_direction_ready() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();

        let applied = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::Proceed,
                String::new(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap();
        assert!(applied.offer.is_none());
        assert!(!applied.newly_revealed);
        assert_eq!(s.direction(Direction::AToB).phase, DirectionPhase::Proceed);

        let applied = s
            .apply_reconcile_result(
                Direction::BToA,
                ReconcileAction::Proceed,
                String::new(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap();
        assert!(applied.newly_revealed);
        assert!(s.revealed);
    }

    #[test]
    fn stale_result_after_phase_moved_is_dropped() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();

        assert!(s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::Proceed,
                String::new(),
                None,
                1,
                false,
                Utc::now(),
            )
            .is_some());
        assert!(s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::Proceed,
                String::new(),
                None,
                1,
                false,
                Utc::now(),
            )
            .is_none());
        assert_eq!(s.results.len(), 1);
    }

    #[test]
    fn offer_charges_refinement_counter() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();

        let applied = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferSharing,
                "big gap".into(),
                Some("the deadline".into()),
                1,
                false,
                Utc::now(),
            )
            .unwrap();
        assert!(applied.offer.is_some());
        assert_eq!(s.direction(Direction::AToB).refinement_count, 1);
        assert_eq!(
            s.direction(Direction::AToB).phase,
            DirectionPhase::AwaitingOffer
        );
    }

    #[test]
    fn decline_creates_no_context_and_proceeds() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();

        let applied = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferOptional,
                "gap".into(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap();
        let offer_id = applied.offer.unwrap().id;

        // b is the subject of AToB
        let outcome = s
            .respond_to_offer(b, offer_id, false, None, SharingDeclinePolicy::PerCycle, Utc::now())
            .unwrap();
        assert!(outcome.newly_resolved);
        assert!(outcome.context.is_none());
        assert!(s.contexts.is_empty());
        assert_eq!(s.direction(Direction::AToB).phase, DirectionPhase::Proceed);
    }

    #[test]
    fn respond_twice_is_idempotent() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();

        let applied = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferSharing,
                "gap".into(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap();
        let offer_id = applied.offer.unwrap().id;

        let first = s
            .respond_to_offer(
                b,
                offer_id,
                true,
                Some("context".into()),
                SharingDeclinePolicy::PerCycle,
                Utc::now(),
            )
            .unwrap();
        assert!(first.newly_resolved);
        assert!(first.context.is_some());

        let second = s
            .respond_to_offer(
                b,
                offer_id,
                true,
                Some("context again".into()),
                SharingDeclinePolicy::PerCycle,
                Utc::now(),
            )
            .unwrap();
        assert!(!second.newly_resolved);
        assert_eq!(second.offer.status, OfferStatus::Accepted);
        assert_eq!(s.contexts.len(), 1, "never two SharedContext rows");
    }

    #[test]
    fn stale_offer_retry_reports_its_own_cycle_context() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g1".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();

        let first_offer = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferSharing,
                "gap".into(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap()
            .offer
            .unwrap();
        s.respond_to_offer(
            b,
            first_offer.id,
            true,
            Some("cycle one context".into()),
            SharingDeclinePolicy::PerCycle,
            Utc::now(),
        )
        .unwrap();

        // Second cycle on a refined, consented attempt.
        assert!(s.claim_refinement_rerun(Direction::AToB));
        s.resubmit(a, "g2".into(), Utc::now()).unwrap();
        let second_offer = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferOptional,
                "gap".into(),
                None,
                2,
                false,
                Utc::now(),
            )
            .unwrap()
            .offer
            .unwrap();
        s.respond_to_offer(
            b,
            second_offer.id,
            true,
            Some("cycle two context".into()),
            SharingDeclinePolicy::PerCycle,
            Utc::now(),
        )
        .unwrap();

        // A retry on the first offer reports the first cycle's context,
        // not the latest row for the direction.
        let retried = s
            .respond_to_offer(
                b,
                first_offer.id,
                true,
                Some("ignored".into()),
                SharingDeclinePolicy::PerCycle,
                Utc::now(),
            )
            .unwrap();
        assert!(!retried.newly_resolved);
        assert_eq!(retried.context.unwrap().content, "cycle one context");
    }

    #[test]
    fn accept_without_content_is_error() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();
        let applied = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferSharing,
                "gap".into(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap();
        let offer_id = applied.offer.unwrap().id;

        assert!(matches!(
            s.respond_to_offer(b, offer_id, true, None, SharingDeclinePolicy::PerCycle, Utc::now()),
            Err(StoreError::MissingSharedContent)
        ));
    }

    #[test]
    fn guesser_cannot_answer_own_offer() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();
        let applied = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferSharing,
                "gap".into(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap();
        let offer_id = applied.offer.unwrap().id;

        assert!(matches!(
            s.respond_to_offer(a, offer_id, false, None, SharingDeclinePolicy::PerCycle, Utc::now()),
            Err(StoreError::NotOfferSubject(_))
        ));
    }

    #[test]
    fn session_decline_policy_sticks() {
        let (mut s, a, b) = state();
        s.save_draft(a, "g".into()).unwrap();
        s.consent(a, Utc::now()).unwrap();
        s.save_draft(b, "g".into()).unwrap();
        s.consent(b, Utc::now()).unwrap();
        s.claim_reconciles();
        let applied = s
            .apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferSharing,
                "gap".into(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap();
        let offer_id = applied.offer.unwrap().id;

        s.respond_to_offer(b, offer_id, false, None, SharingDeclinePolicy::Session, Utc::now())
            .unwrap();
        assert!(s.direction(Direction::AToB).sharing_declined_for_session);
    }

    #[test]
    fn refinement_rerun_claim_requires_open_window() {
        let (mut s, _, _) = state();
        assert!(!s.claim_refinement_rerun(Direction::AToB));
    }

    #[test]
    fn gate_facts_reflect_milestones() {
        let (mut s, a, _) = state();
        let facts = s.gate_facts(0);
        assert!(!facts.compact_signed);
        assert!(facts.feelings_stated);

        s.confirm_milestone(a, Milestone::CompactSigned, Utc::now())
            .unwrap();
        assert!(s.gate_facts(0).compact_signed);
    }

    #[test]
    fn partner_ready_for_compact_is_mutual() {
        let (mut s, _, b) = state();
        assert!(!s.partner_ready(0, Stage::Compact));
        s.confirm_milestone(b, Milestone::CompactSigned, Utc::now())
            .unwrap();
        assert!(s.partner_ready(0, Stage::Compact));
    }
}
