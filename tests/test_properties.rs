//! Property tests for the pure pieces: gate evaluation, attempt numbering,
//! the reconcile claim discipline, and threshold validation.

use attune::config::AttuneConfig;
use attune::error::Severity;
use attune::gate::{self, GateFacts};
use attune::model::{Direction, ReconcileAction, Stage};
use attune::store::{DirectionPhase, SessionState};
use chrono::Utc;
use proptest::prelude::*;
use uuid::Uuid;

fn arb_facts() -> impl Strategy<Value = GateFacts> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(
                compact_signed,
                feelings_stated,
                feel_heard_confirmed,
                both_directions_proceed,
                needs_confirmed,
                common_ground_confirmed,
            )| GateFacts {
                compact_signed,
                feelings_stated,
                feel_heard_confirmed,
                both_directions_proceed,
                needs_confirmed,
                common_ground_confirmed,
            },
        )
}

fn arb_stage() -> impl Strategy<Value = Stage> {
    prop::sample::select(Stage::ALL.to_vec())
}

/// One participant action against the empathy attempt ledger.
#[derive(Debug, Clone)]
enum AttemptOp {
    Draft(usize, String),
    Consent(usize),
}

fn arb_attempt_ops() -> impl Strategy<Value = Vec<AttemptOp>> {
    prop::collection::vec(
        prop_oneof![
            (0usize..2, "[a-z]{1,12}").prop_map(|(i, s)| AttemptOp::Draft(i, s)),
            (0usize..2).prop_map(AttemptOp::Consent),
        ],
        0..24,
    )
}

fn fresh_state() -> (SessionState, [Uuid; 2]) {
    let participants = [Uuid::new_v4(), Uuid::new_v4()];
    (SessionState::new(Uuid::new_v4(), participants), participants)
}

proptest! {
    /// Evaluation is deterministic and `satisfied` always agrees with the
    /// unsatisfied list.
    #[test]
    fn gate_evaluation_is_pure(stage in arb_stage(), facts in arb_facts()) {
        let first = gate::evaluate(stage, &facts);
        prop_assert_eq!(first.satisfied, first.unsatisfied_gates.is_empty());
        for _ in 0..3 {
            prop_assert_eq!(gate::evaluate(stage, &facts), first.clone());
        }
    }

    /// All facts true satisfies every stage; all facts false satisfies none.
    #[test]
    fn gate_extremes(stage in arb_stage()) {
        let all_true = GateFacts {
            compact_signed: true,
            feelings_stated: true,
            feel_heard_confirmed: true,
            both_directions_proceed: true,
            needs_confirmed: true,
            common_ground_confirmed: true,
        };
        prop_assert!(gate::evaluate(stage, &all_true).satisfied);
        prop_assert!(!gate::evaluate(stage, &GateFacts::default()).satisfied);
    }

    /// Under any interleaving of drafts and consents, each author's shared
    /// attempt numbers are consecutive from 1 and at most one draft is Held.
    #[test]
    fn attempt_numbers_are_consecutive(ops in arb_attempt_ops()) {
        let (mut state, participants) = fresh_state();
        let now = Utc::now();

        for op in ops {
            match op {
                AttemptOp::Draft(i, content) => {
                    state.save_draft(participants[i], content).unwrap();
                }
                AttemptOp::Consent(i) => {
                    // NoDraft before the first draft is the only legal error.
                    let _ = state.consent(participants[i], now);
                }
            }
        }

        for author in participants {
            let shared: Vec<u32> = state
                .attempts
                .iter()
                .filter(|a| {
                    a.author_id == author
                        && a.status == attune::model::AttemptStatus::Shared
                })
                .map(|a| a.attempt_number)
                .collect();
            let expected: Vec<u32> = (1..=shared.len() as u32).collect();
            prop_assert_eq!(shared, expected);

            let held = state
                .attempts
                .iter()
                .filter(|a| {
                    a.author_id == author
                        && a.status == attune::model::AttemptStatus::Held
                })
                .count();
            prop_assert!(held <= 1);
        }
    }

    /// A result only lands while the direction holds the Reconciling claim,
    /// and applying it always releases the claim. Duplicate applications are
    /// dropped without touching the ledger.
    #[test]
    fn reconcile_results_require_a_claim(
        action in prop::sample::select(vec![
            ReconcileAction::Proceed,
            ReconcileAction::OfferOptional,
            ReconcileAction::OfferSharing,
        ]),
        direction in prop::sample::select(Direction::BOTH.to_vec()),
    ) {
        let (mut state, participants) = fresh_state();
        let now = Utc::now();
        let guesser = participants[direction.guesser_index()];
        let subject = participants[direction.subject_index()];

        // Unclaimed: the result is dropped.
        let dropped = state.apply_reconcile_result(
            direction,
            action,
            "gap".into(),
            None,
            1,
            false,
            now,
        );
        prop_assert!(dropped.is_none());
        prop_assert!(state.results.is_empty());

        state.submit_feelings(subject, "subject feelings".into()).unwrap();
        state.submit_feelings(guesser, "guesser feelings".into()).unwrap();
        state.save_draft(guesser, "my guess".into()).unwrap();
        state.consent(guesser, now).unwrap();
        state.save_draft(subject, "their guess".into()).unwrap();
        state.consent(subject, now).unwrap();
        let claimed = state.claim_reconciles();
        prop_assert!(claimed.contains(&direction));

        let applied = state.apply_reconcile_result(
            direction,
            action,
            "gap".into(),
            None,
            1,
            false,
            now,
        );
        prop_assert!(applied.is_some());
        prop_assert_ne!(
            state.direction(direction).phase,
            DirectionPhase::Reconciling
        );

        // The claim is spent; a duplicate of the same result is dropped.
        let results_before = state.results.len();
        let duplicate = state.apply_reconcile_result(
            direction,
            action,
            "gap".into(),
            None,
            1,
            false,
            now,
        );
        prop_assert!(duplicate.is_none());
        prop_assert_eq!(state.results.len(), results_before);
    }

    /// Threshold validation flags exactly the inverted or out-of-band pairs.
    #[test]
    fn threshold_validation_matches_band(
        t_low in -0.5f64..1.5,
        t_high in -0.5f64..1.5,
    ) {
        let mut config = AttuneConfig::default();
        config.reconciler.t_low = t_low;
        config.reconciler.t_high = t_high;

        let errors = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        let expect_error = !(0.0..=1.0).contains(&t_low)
            || !(0.0..=1.0).contains(&t_high)
            || t_low >= t_high;
        prop_assert_eq!(errors > 0, expect_error);
    }
}
