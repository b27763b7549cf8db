//! Reconciler engine: the core per-direction state machine.
//!
//! A reconciliation cycle is claimed under the session lock (moving the
//! direction to Reconciling), the analyzer runs without any lock held, and
//! the outcome is applied back under the lock. Each direction progresses
//! independently — one direction's pending offer never blocks the other.
//!
//! Ordering of the algorithm is load-bearing: the circuit breaker is
//! checked before the analyzer is ever called, so termination does not
//! depend on input quality.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::{Analyzer, GapAnalysis};
use crate::config::ReconcilerConfig;
use crate::error::StoreError;
use crate::model::{Direction, ReconcileAction};
use crate::notify::{Event, NotificationPort};
use crate::observability::metrics;
use crate::store::{ReconcileInputs, SessionStore};

/// Gap summary used when the analyzer is unavailable.
const FALLBACK_GAP_SUMMARY: &str =
    "analysis unavailable; offering the subject a chance to share context";

/// Drives reconciliation cycles for claimed directions.
pub struct ReconcilerEngine {
    store: Arc<SessionStore>,
    analyzer: Arc<dyn Analyzer>,
    notifier: Arc<dyn NotificationPort>,
    config: ReconcilerConfig,
    cancel: CancellationToken,
}

impl ReconcilerEngine {
    /// Creates an engine over the given store, analyzer, and notifier.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        analyzer: Arc<dyn Analyzer>,
        notifier: Arc<dyn NotificationPort>,
        config: ReconcilerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            analyzer,
            notifier,
            config,
            cancel,
        }
    }

    /// The engine's reconciler configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Spawns a background reconciliation for each claimed direction.
    ///
    /// Fire-and-forget: the caller's HTTP response returns immediately and
    /// results are pushed over the notification port.
    pub fn spawn_reconciles(self: &Arc<Self>, session_id: Uuid, directions: Vec<Direction>) {
        for direction in directions {
            self.spawn_reconcile(session_id, direction);
        }
    }

    /// Spawns a single background reconciliation.
    pub fn spawn_reconcile(
        self: &Arc<Self>,
        session_id: Uuid,
        direction: Direction,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = engine.cancel.cancelled() => {
                    debug!(%session_id, %direction, "reconciliation cancelled by shutdown");
                }
                result = engine.reconcile(session_id, direction) => {
                    if let Err(e) = result {
                        warn!(%session_id, %direction, error = %e, "reconciliation failed");
                    }
                }
            }
        })
    }

    /// Runs one reconciliation cycle for an already-claimed direction.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the session vanished or its state no
    /// longer supports the cycle (the claim makes this unreachable in
    /// normal operation).
    pub async fn reconcile(
        &self,
        session_id: Uuid,
        direction: Direction,
    ) -> Result<(), StoreError> {
        let session = self.store.get(session_id)?;

        // Capture inputs under the lock; the analyzer runs without it.
        let inputs = session.with_state(|state| state.reconcile_inputs(direction))?;

        let (action, gap_summary, focus, tripped) = self.classify(&inputs, direction).await;

        let applied = session.with_state(|state| {
            state.apply_reconcile_result(
                direction,
                action,
                gap_summary,
                focus,
                inputs.attempt_number,
                tripped,
                chrono::Utc::now(),
            )
        });

        let Some(applied) = applied else {
            // The phase moved on before we re-locked; a competing
            // application already landed. Nothing to report.
            return Ok(());
        };

        info!(
            %session_id,
            %direction,
            action = ?applied.result.action,
            attempt_number = applied.result.attempt_number,
            circuit_breaker_tripped = applied.result.circuit_breaker_tripped,
            "reconciliation complete"
        );
        metrics::record_reconciliation(applied.result.action, applied.result.circuit_breaker_tripped);

        self.notifier.publish(
            session_id,
            Event::ReconcilerComplete {
                direction,
                action: applied.result.action,
                attempt_number: applied.result.attempt_number,
                circuit_breaker_tripped: applied.result.circuit_breaker_tripped,
            },
        );

        if let Some(offer) = applied.offer {
            metrics::record_offer_opened(offer.action);
            self.notifier.publish(
                session_id,
                Event::ShareOfferOpened {
                    offer_id: offer.id,
                    direction,
                    action: offer.action,
                    suggested_share_focus: offer.suggested_share_focus,
                },
            );
        }

        if applied.newly_revealed {
            self.notifier.publish(session_id, Event::SessionRevealed);
        }

        Ok(())
    }

    /// Decides the action for one cycle: breaker, analyzer, thresholds,
    /// and the re-entrancy / decline-policy downgrades, in that order.
    async fn classify(
        &self,
        inputs: &ReconcileInputs,
        direction: Direction,
    ) -> (ReconcileAction, String, Option<String>, bool) {
        // Circuit breaker before anything else — this would be the
        // (max_refinements + 1)th reconciliation for the direction.
        if inputs.refinement_count >= self.config.max_refinements {
            info!(
                %direction,
                refinement_count = inputs.refinement_count,
                "circuit breaker tripped; forcing proceed"
            );
            metrics::record_circuit_breaker_trip();
            return (
                ReconcileAction::Proceed,
                "refinement limit reached; proceeding with the current attempt".to_string(),
                None,
                true,
            );
        }

        let analysis = self.analyze_with_fallback(inputs).await;
        let scored = self.threshold_action(analysis.gap_score);

        let action = if scored == ReconcileAction::Proceed {
            ReconcileAction::Proceed
        } else if inputs.context_exists {
            // Context was already shared for this attempt pair — a repeat
            // offer would only come from stale polling or re-navigation.
            debug!(%direction, "context already shared for attempt pair; proceeding");
            ReconcileAction::Proceed
        } else if inputs.sharing_declined {
            // The subject closed sharing for the session; honor it.
            debug!(%direction, "sharing declined for session; proceeding");
            ReconcileAction::Proceed
        } else {
            scored
        };

        (action, analysis.gap_summary, analysis.suggested_share_focus, false)
    }

    /// Calls the analyzer, defaulting conservatively on failure.
    ///
    /// An ambiguous failure must never silently reveal, so the fallback is
    /// an optional offer rather than Proceed.
    async fn analyze_with_fallback(&self, inputs: &ReconcileInputs) -> GapAnalysis {
        let started = Instant::now();
        match self
            .analyzer
            .analyze(&inputs.guesser_text, &inputs.subject_text)
            .await
        {
            Ok(analysis) => {
                metrics::record_analyzer_call(started.elapsed(), true);
                analysis
            }
            Err(e) => {
                warn!(error = %e, "analyzer unavailable; defaulting to optional offer");
                metrics::record_analyzer_call(started.elapsed(), false);
                GapAnalysis {
                    // Squarely inside the optional-offer band regardless of
                    // configured thresholds.
                    gap_score: f64::midpoint(self.config.t_low, self.config.t_high),
                    gap_summary: FALLBACK_GAP_SUMMARY.to_string(),
                    suggested_share_focus: None,
                }
            }
        }
    }

    /// Maps a gap score onto an action via the configured thresholds.
    fn threshold_action(&self, gap_score: f64) -> ReconcileAction {
        if gap_score < self.config.t_low {
            ReconcileAction::Proceed
        } else if gap_score < self.config.t_high {
            ReconcileAction::OfferOptional
        } else {
            ReconcileAction::OfferSharing
        }
    }
}

impl std::fmt::Debug for ReconcilerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerEngine")
            .field("t_low", &self.config.t_low)
            .field("t_high", &self.config.t_high)
            .field("max_refinements", &self.config.max_refinements)
            .finish_non_exhaustive()
    }
}
