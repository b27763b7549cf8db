//! Core row types for the stage-gate and reconciliation engine.
//!
//! These are ordinary relational-row-shaped structs: plain ids, timestamps,
//! and status enums. All of them serialize to JSON for the API surface and
//! the event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Stages
// ============================================================================

/// The five protocol stages, in order.
///
/// Stage progress is monotonic — a participant's stage never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage 0: both participants sign the conversation compact.
    Compact,
    /// Stage 1: each participant states their own feelings and confirms
    /// they feel heard.
    FeelHeard,
    /// Stage 2: empathy attempts, reconciliation, and mutual reveal.
    Empathy,
    /// Stage 3: each participant confirms their needs.
    Needs,
    /// Stage 4: both participants confirm common ground.
    CommonGround,
}

impl Stage {
    /// All stages in protocol order.
    pub const ALL: [Self; 5] = [
        Self::Compact,
        Self::FeelHeard,
        Self::Empathy,
        Self::Needs,
        Self::CommonGround,
    ];

    /// Zero-based index of this stage.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Compact => 0,
            Self::FeelHeard => 1,
            Self::Empathy => 2,
            Self::Needs => 3,
            Self::CommonGround => 4,
        }
    }

    /// Returns the stage for a zero-based index, if in range.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Compact),
            1 => Some(Self::FeelHeard),
            2 => Some(Self::Empathy),
            3 => Some(Self::Needs),
            4 => Some(Self::CommonGround),
            _ => None,
        }
    }

    /// The stage after this one, or `None` for the final stage.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Compact => "compact",
            Self::FeelHeard => "feel_heard",
            Self::Empathy => "empathy",
            Self::Needs => "needs",
            Self::CommonGround => "common_ground",
        };
        write!(f, "{name}")
    }
}

/// Per-user status within the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Working through the current stage.
    InProgress,
    /// Finished the final stage.
    Completed,
}

/// Milestones a participant can confirm; these feed the gate facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    /// Signed the conversation compact (stage 0 exit).
    CompactSigned,
    /// Confirmed feeling heard (stage 1 exit).
    FeelHeardConfirmed,
    /// Confirmed needs (stage 3 exit).
    NeedsConfirmed,
    /// Confirmed common ground (stage 4 exit).
    CommonGroundConfirmed,
}

/// Per-user stage progress row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    /// Owning session.
    pub session_id: Uuid,
    /// Participant this row tracks.
    pub user_id: Uuid,
    /// Current stage.
    pub stage: Stage,
    /// Status within the current stage.
    pub status: StageStatus,
    /// When each confirmed milestone was stamped.
    pub milestones: Vec<(Milestone, DateTime<Utc>)>,
    /// When the user last advanced a stage.
    pub advanced_at: Option<DateTime<Utc>>,
}

impl StageProgress {
    /// A fresh row at stage 0.
    #[must_use]
    pub const fn new(session_id: Uuid, user_id: Uuid) -> Self {
        Self {
            session_id,
            user_id,
            stage: Stage::Compact,
            status: StageStatus::InProgress,
            milestones: Vec::new(),
            advanced_at: None,
        }
    }

    /// Whether the given milestone has been confirmed.
    #[must_use]
    pub fn has_milestone(&self, milestone: Milestone) -> bool {
        self.milestones.iter().any(|(m, _)| *m == milestone)
    }
}

// ============================================================================
// Directions
// ============================================================================

/// A guesser→subject orientation within a session.
///
/// `AToB` means participant A (index 0) is the guesser whose inference about
/// participant B's feelings is being checked. The two directions progress
/// fully independently, with independent refinement counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Participant 0 guesses participant 1's feelings.
    AToB,
    /// Participant 1 guesses participant 0's feelings.
    BToA,
}

impl Direction {
    /// Both directions.
    pub const BOTH: [Self; 2] = [Self::AToB, Self::BToA];

    /// Index (into the session's participant pair) of the guesser.
    #[must_use]
    pub const fn guesser_index(self) -> usize {
        match self {
            Self::AToB => 0,
            Self::BToA => 1,
        }
    }

    /// Index of the subject — the participant whose actual statement is
    /// ground truth for this direction.
    #[must_use]
    pub const fn subject_index(self) -> usize {
        match self {
            Self::AToB => 1,
            Self::BToA => 0,
        }
    }

    /// The opposite direction.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::AToB => Self::BToA,
            Self::BToA => Self::AToB,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AToB => write!(f, "a_to_b"),
            Self::BToA => write!(f, "b_to_a"),
        }
    }
}

// ============================================================================
// Empathy attempts
// ============================================================================

/// Visibility status of an empathy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Draft saved, not yet consented to sharing.
    Held,
    /// Consented; visible to the reconciler.
    Shared,
}

/// One empathy attempt: a participant's inference of their partner's
/// feelings.
///
/// Exactly one Held or most-recent-Shared attempt is "current" per
/// (session, author) per reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmpathyAttempt {
    /// Row id.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Participant who wrote this attempt (the guesser).
    pub author_id: Uuid,
    /// Attempt text.
    pub content: String,
    /// Held or Shared.
    pub status: AttemptStatus,
    /// 1-based, incremented on each consent/resubmit.
    pub attempt_number: u32,
    /// When the author consented to sharing.
    pub consented_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Reconciler results
// ============================================================================

/// Classification of a reconciliation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Gap small enough; direction is ready for reveal.
    Proceed,
    /// Moderate gap; subject may optionally share context.
    OfferOptional,
    /// Large gap; sharing is strongly recommended (subject may still
    /// decline).
    OfferSharing,
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Proceed => "proceed",
            Self::OfferOptional => "offer_optional",
            Self::OfferSharing => "offer_sharing",
        };
        write!(f, "{name}")
    }
}

/// One persisted reconciliation outcome for a direction.
///
/// One result per claimed reconciliation cycle; within a cycle the
/// evaluated `attempt_number` never repeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerResult {
    /// Row id.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Which guesser→subject orientation was evaluated.
    pub direction: Direction,
    /// Classified action.
    pub action: ReconcileAction,
    /// Analyzer's summary of the gap (empty for breaker-forced results).
    pub gap_summary: String,
    /// Guesser attempt number this result evaluated.
    pub attempt_number: u32,
    /// Whether the bounded-retry circuit breaker forced this result.
    pub circuit_breaker_tripped: bool,
    /// When the result was persisted.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Share offers
// ============================================================================

/// Lifecycle status of a share offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Waiting for the subject's response.
    Offered,
    /// Subject accepted and shared context.
    Accepted,
    /// Subject declined; reveal proceeds with the original attempt.
    Declined,
}

/// An offer asking the subject to share context with the guesser.
///
/// At most one unresolved offer exists per direction at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareOffer {
    /// Row id.
    pub id: Uuid,
    /// The reconciler result that opened this offer.
    pub reconciler_result_id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Direction whose guesser would receive the shared context.
    pub direction: Direction,
    /// Offered / Accepted / Declined.
    pub status: OfferStatus,
    /// Whether the originating result was OfferOptional or OfferSharing.
    pub action: ReconcileAction,
    /// Analyzer's suggestion of what the subject might clarify.
    pub suggested_share_focus: Option<String>,
    /// When the subject responded.
    pub responded_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Shared context
// ============================================================================

/// Context a subject shared with the guesser after accepting an offer.
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedContext {
    /// Row id.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// The subject who shared.
    pub sharer_id: Uuid,
    /// Direction this context clarifies.
    pub direction: Direction,
    /// Guesser attempt number the context responds to.
    pub attempt_number: u32,
    /// Shared text.
    pub content: String,
    /// When the context was delivered to the guesser.
    pub delivered_at: DateTime<Utc>,
}

// ============================================================================
// Refinement input
// ============================================================================

/// The guesser's move when a refinement window is open: either a reworked
/// attempt or an explicit pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementInput {
    /// Replace the attempt with new content (attempt_number + 1).
    Resubmit(String),
    /// Keep the current attempt unchanged and re-reconcile.
    SkipRefinement,
}
