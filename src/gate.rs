//! Stage gate evaluation.
//!
//! Pure predicates deciding whether a stage's exit condition is satisfied
//! for one participant. No I/O, no clock — identical facts always yield an
//! identical outcome.

use serde::Serialize;

use crate::model::Stage;

/// Facts about one participant's progress, gathered by the caller.
///
/// Each field is from the acting user's own perspective except
/// `both_directions_proceed`, which reflects shared session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateFacts {
    /// User signed the conversation compact.
    pub compact_signed: bool,
    /// User recorded a feelings statement.
    pub feelings_stated: bool,
    /// User confirmed they feel heard.
    pub feel_heard_confirmed: bool,
    /// Both reconciliation directions reached Proceed (session revealed).
    pub both_directions_proceed: bool,
    /// User confirmed their needs.
    pub needs_confirmed: bool,
    /// User confirmed common ground.
    pub common_ground_confirmed: bool,
}

/// Outcome of evaluating a stage gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    /// Whether every gate for the stage is satisfied.
    pub satisfied: bool,
    /// Names of gates still unsatisfied, in a stable order.
    pub unsatisfied_gates: Vec<&'static str>,
}

/// Gate names, one per fact. These appear verbatim in API responses.
pub mod gates {
    /// Compact must be signed to leave stage 0.
    pub const COMPACT_SIGNED: &str = "compact_signed";
    /// A feelings statement must exist to leave stage 1.
    pub const FEELINGS_STATED: &str = "feelings_stated";
    /// Feel-heard confirmation to leave stage 1.
    pub const FEEL_HEARD_CONFIRMED: &str = "feel_heard_confirmed";
    /// Both directions must reach Proceed to leave stage 2.
    pub const BOTH_DIRECTIONS_PROCEED: &str = "both_directions_proceed";
    /// Needs confirmation to leave stage 3.
    pub const NEEDS_CONFIRMED: &str = "needs_confirmed";
    /// Common-ground confirmation to leave stage 4.
    pub const COMMON_GROUND_CONFIRMED: &str = "common_ground_confirmed";
}

/// Evaluates the exit gates of `stage` against `facts`.
///
/// Deterministic and side-effect free. Unsatisfied gate names are returned
/// in declaration order so responses are stable across calls.
#[must_use]
pub fn evaluate(stage: Stage, facts: &GateFacts) -> GateOutcome {
    let required: &[(&'static str, bool)] = match stage {
        Stage::Compact => &[(gates::COMPACT_SIGNED, facts.compact_signed)],
        Stage::FeelHeard => &[
            (gates::FEELINGS_STATED, facts.feelings_stated),
            (gates::FEEL_HEARD_CONFIRMED, facts.feel_heard_confirmed),
        ],
        Stage::Empathy => &[(
            gates::BOTH_DIRECTIONS_PROCEED,
            facts.both_directions_proceed,
        )],
        Stage::Needs => &[(gates::NEEDS_CONFIRMED, facts.needs_confirmed)],
        Stage::CommonGround => &[(
            gates::COMMON_GROUND_CONFIRMED,
            facts.common_ground_confirmed,
        )],
    };

    let unsatisfied_gates: Vec<&'static str> = required
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| *name)
        .collect();

    GateOutcome {
        satisfied: unsatisfied_gates.is_empty(),
        unsatisfied_gates,
    }
}
