//! Metrics collection.
//!
//! Prometheus-compatible metrics rendered at `GET /metrics`. All label
//! values come from closed enums in the data model, so cardinality is
//! bounded by construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::AttuneError;
use crate::model::{ReconcileAction, Stage};

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global metrics recorder and returns the render handle.
///
/// Returns `None` on a repeated call (the recorder is process-global); the
/// caller keeps the handle from the first initialization.
///
/// # Errors
///
/// Returns [`AttuneError::Server`] if the recorder cannot be installed.
pub fn init_metrics() -> Result<Option<PrometheusHandle>, AttuneError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(None);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AttuneError::Server(format!("metrics recorder: {e}")))?;

    describe_metrics();
    Ok(Some(handle))
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "attune_sessions_created_total",
        "Total number of sessions created"
    );
    describe_counter!(
        "attune_reconciliations_total",
        "Total number of reconciliation results by action"
    );
    describe_counter!(
        "attune_circuit_breaker_trips_total",
        "Reconciliations forced to proceed by the refinement limit"
    );
    describe_counter!(
        "attune_share_offers_opened_total",
        "Share offers opened by action"
    );
    describe_counter!(
        "attune_share_offers_resolved_total",
        "Share offers resolved by outcome"
    );
    describe_counter!(
        "attune_analyzer_calls_total",
        "Analyzer invocations by outcome"
    );
    describe_histogram!(
        "attune_analyzer_duration_ms",
        "Analyzer call duration in milliseconds"
    );
    describe_counter!(
        "attune_stage_advances_total",
        "Stage advances by entered stage"
    );
}

/// Records a session creation.
pub fn record_session_created() {
    counter!("attune_sessions_created_total").increment(1);
}

/// Records a persisted reconciliation result.
pub fn record_reconciliation(action: ReconcileAction, circuit_breaker_tripped: bool) {
    counter!(
        "attune_reconciliations_total",
        "action" => action.to_string(),
        "breaker" => if circuit_breaker_tripped { "tripped" } else { "clear" },
    )
    .increment(1);
}

/// Records a circuit breaker trip.
pub fn record_circuit_breaker_trip() {
    counter!("attune_circuit_breaker_trips_total").increment(1);
}

/// Records a share offer being opened.
pub fn record_offer_opened(action: ReconcileAction) {
    counter!("attune_share_offers_opened_total", "action" => action.to_string()).increment(1);
}

/// Records a share offer reaching a terminal state.
pub fn record_offer_resolved(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "declined" };
    counter!("attune_share_offers_resolved_total", "outcome" => outcome).increment(1);
}

/// Records an analyzer call and its duration.
pub fn record_analyzer_call(duration: Duration, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("attune_analyzer_calls_total", "outcome" => outcome).increment(1);
    histogram!("attune_analyzer_duration_ms", "outcome" => outcome)
        .record(duration.as_secs_f64() * 1000.0);
}

/// Records a stage advance (`completed` for the final-stage transition).
pub fn record_stage_advance(stage: Stage, completed: bool) {
    counter!(
        "attune_stage_advances_total",
        "stage" => stage.to_string(),
        "completed" => if completed { "true" } else { "false" },
    )
    .increment(1);
}
