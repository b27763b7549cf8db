//! HTTP API.
//!
//! REST surface over axum. All mutating handlers identify the acting
//! participant through the `x-attune-user` header (authentication itself
//! happens upstream) and return JSON. Live events stream as SSE from
//! `GET /sessions/:id/events`, with `GET /sessions/:id/events/recent` as
//! the poll fallback.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analyzer::{Analyzer, HttpAnalyzer, LexicalAnalyzer};
use crate::config::AttuneConfig;
use crate::error::{AttuneError, StoreError};
use crate::gate::GateOutcome;
use crate::model::{Milestone, RefinementInput, ShareOffer, Stage, StageProgress};
use crate::notify::{BroadcastNotifier, Event, EventEnvelope, NotificationPort};
use crate::observability::metrics;
use crate::reconciler::{OfferAction, ReconcilerEngine, RefinementCoordinator, ShareOfferCoordinator};
use crate::stage::{AdvanceOutcome, StageProgressTracker};
use crate::store::SessionStore;

/// Header carrying the acting participant's id.
pub const USER_HEADER: &str = "x-attune-user";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// Session store.
    pub store: Arc<SessionStore>,
    /// Event notifier (concrete type so handlers can subscribe).
    pub notifier: Arc<BroadcastNotifier>,
    /// Reconciler engine.
    pub engine: Arc<ReconcilerEngine>,
    /// Share offer coordinator.
    pub offers: Arc<ShareOfferCoordinator>,
    /// Refinement coordinator.
    pub refinements: Arc<RefinementCoordinator>,
    /// Stage progress tracker.
    pub stages: Arc<StageProgressTracker>,
    /// Prometheus render handle, when metrics are installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wires up all components from a configuration.
    #[must_use]
    pub fn from_config(
        config: &AttuneConfig,
        metrics_handle: Option<PrometheusHandle>,
        cancel: CancellationToken,
    ) -> Self {
        let analyzer: Arc<dyn Analyzer> = match &config.analyzer.endpoint {
            Some(endpoint) => Arc::new(HttpAnalyzer::new(
                endpoint.clone(),
                config.analyzer.timeout_duration(),
            )),
            None => Arc::new(LexicalAnalyzer),
        };
        Self::new(analyzer, config, metrics_handle, cancel)
    }

    /// Wires up all components around an explicit analyzer.
    #[must_use]
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        config: &AttuneConfig,
        metrics_handle: Option<PrometheusHandle>,
        cancel: CancellationToken,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(config.server.event_buffer));
        let engine = Arc::new(ReconcilerEngine::new(
            Arc::clone(&store),
            analyzer,
            Arc::clone(&notifier) as Arc<dyn NotificationPort>,
            config.reconciler.clone(),
            cancel,
        ));
        let offers = Arc::new(ShareOfferCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&notifier) as Arc<dyn NotificationPort>,
            config.reconciler.sharing_decline_policy,
        ));
        let refinements = Arc::new(RefinementCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&engine),
        ));
        let stages = Arc::new(StageProgressTracker::new(
            Arc::clone(&store),
            Arc::clone(&notifier) as Arc<dyn NotificationPort>,
        ));

        Self {
            store,
            notifier,
            engine,
            offers,
            refinements,
            stages,
            metrics: metrics_handle,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A handler-level error rendered as a JSON body.
#[derive(Debug)]
pub enum ApiError {
    /// Store rejected the operation.
    Store(StoreError),
    /// Malformed request (bad header, unknown stage, etc.).
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Store(err) => (
                StatusCode::from_u16(err.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                err.to_string(),
            ),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        debug!(%status, %message, "request rejected");
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Extracts the acting user id from the `x-attune-user` header.
fn acting_user(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get(USER_HEADER)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {USER_HEADER} header")))?;
    let text = raw
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("invalid {USER_HEADER} header")))?;
    Uuid::parse_str(text)
        .map_err(|_| ApiError::BadRequest(format!("{USER_HEADER} is not a valid uuid")))
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    participant_a: Uuid,
    participant_b: Uuid,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    session_id: Uuid,
    participants: [Uuid; 2],
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ContentRequest {
    content: String,
}

#[derive(Debug, Deserialize)]
struct MilestoneRequest {
    milestone: Milestone,
}

#[derive(Debug, Serialize)]
struct ConsentResponse {
    attempt_number: u32,
    newly_shared: bool,
}

#[derive(Debug, Serialize)]
struct RefinementResponse {
    attempt_number: u32,
}

#[derive(Debug, Serialize)]
struct ShareOfferResponse {
    offer: Option<ShareOffer>,
}

#[derive(Debug, Deserialize)]
struct RespondRequest {
    #[serde(default)]
    offer_id: Option<Uuid>,
    action: OfferAction,
    #[serde(default)]
    shared_content: Option<String>,
}

#[derive(Debug, Serialize)]
struct RespondResponse {
    offer: ShareOffer,
    newly_resolved: bool,
}

#[derive(Debug, Serialize)]
struct ProgressResponse {
    progress: StageProgress,
    revealed: bool,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the full application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/feelings", post(submit_feelings))
        .route("/sessions/{id}/milestones", post(confirm_milestone))
        .route("/sessions/{id}/empathy/draft", post(save_draft))
        .route("/sessions/{id}/empathy/consent", post(consent))
        .route("/sessions/{id}/empathy/resubmit", post(resubmit))
        .route("/sessions/{id}/empathy/skip-refinement", post(skip_refinement))
        .route("/sessions/{id}/reconciler/share-offer", get(get_share_offer))
        .route(
            "/sessions/{id}/reconciler/share-offer/respond",
            post(respond_share_offer),
        )
        .route("/sessions/{id}/stages/{stage}/gates", get(gate_status))
        .route("/sessions/{id}/stages/advance", post(advance_stage))
        .route("/sessions/{id}/events", get(event_stream))
        .route("/sessions/{id}/events/recent", get(recent_events))
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Session handlers
// ---------------------------------------------------------------------------

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    if body.participant_a == body.participant_b {
        return Err(ApiError::BadRequest(
            "participants must be distinct".to_string(),
        ));
    }

    let session = state
        .store
        .create_session(body.participant_a, body.participant_b);
    info!(session_id = %session.id, "session created");
    metrics::record_session_created();
    state.notifier.publish(
        session.id,
        Event::SessionCreated {
            participants: session.participants,
        },
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            participants: session.participants,
            created_at: session.created_at,
        }),
    ))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ProgressResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let session = state.store.get(id)?;
    let response = session.with_state(|s| {
        let index = s.participant_index(user)?;
        Ok::<_, StoreError>(ProgressResponse {
            progress: s.progress[index].clone(),
            revealed: s.revealed,
        })
    })?;
    Ok(Json(response))
}

async fn submit_feelings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ContentRequest>,
) -> Result<StatusCode, ApiError> {
    let user = acting_user(&headers)?;
    let session = state.store.get(id)?;
    session.with_state(|s| s.submit_feelings(user, body.content))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn confirm_milestone(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<MilestoneRequest>,
) -> Result<StatusCode, ApiError> {
    let user = acting_user(&headers)?;
    state.stages.confirm_milestone(id, user, body.milestone)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Empathy handlers
// ---------------------------------------------------------------------------

async fn save_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ContentRequest>,
) -> Result<StatusCode, ApiError> {
    let user = acting_user(&headers)?;
    let session = state.store.get(id)?;
    session.with_state(|s| s.save_draft(user, body.content))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn consent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ConsentResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let session = state.store.get(id)?;

    // Consent and claim under one lock so two concurrent calls cannot
    // spawn the same reconciliation twice.
    let (outcome, claimed) = session.with_state(|s| {
        let outcome = s.consent(user, Utc::now())?;
        let claimed = s.claim_reconciles();
        Ok::<_, StoreError>((outcome, claimed))
    })?;

    if outcome.newly_shared {
        state.notifier.publish(
            id,
            Event::AttemptShared {
                user_id: user,
                attempt_number: outcome.attempt_number,
            },
        );
    }
    state.engine.spawn_reconciles(id, claimed);

    Ok(Json(ConsentResponse {
        attempt_number: outcome.attempt_number,
        newly_shared: outcome.newly_shared,
    }))
}

async fn resubmit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ContentRequest>,
) -> Result<Json<RefinementResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let outcome = state
        .refinements
        .submit(id, user, RefinementInput::Resubmit(body.content))?;
    Ok(Json(RefinementResponse {
        attempt_number: outcome.attempt_number,
    }))
}

async fn skip_refinement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<RefinementResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let outcome = state
        .refinements
        .submit(id, user, RefinementInput::SkipRefinement)?;
    Ok(Json(RefinementResponse {
        attempt_number: outcome.attempt_number,
    }))
}

// ---------------------------------------------------------------------------
// Share offer handlers
// ---------------------------------------------------------------------------

async fn get_share_offer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ShareOfferResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let offer = state.offers.pending_offer(id, user)?;
    Ok(Json(ShareOfferResponse { offer }))
}

async fn respond_share_offer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RespondRequest>,
) -> Result<Json<RespondResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let outcome = state.offers.respond(
        id,
        user,
        body.offer_id,
        body.action,
        body.shared_content,
    )?;
    Ok(Json(RespondResponse {
        offer: outcome.offer,
        newly_resolved: outcome.newly_resolved,
    }))
}

// ---------------------------------------------------------------------------
// Stage handlers
// ---------------------------------------------------------------------------

async fn gate_status(
    State(state): State<AppState>,
    Path((id, stage)): Path<(Uuid, u8)>,
    headers: HeaderMap,
) -> Result<Json<GateOutcome>, ApiError> {
    let user = acting_user(&headers)?;
    let stage = Stage::from_index(stage)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown stage index {stage}")))?;
    let outcome = state.stages.gate_status(id, user, stage)?;
    Ok(Json(outcome))
}

async fn advance_stage(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<AdvanceOutcome>, ApiError> {
    let user = acting_user(&headers)?;
    let outcome = state.stages.advance(id, user)?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// Event handlers
// ---------------------------------------------------------------------------

async fn event_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<
    Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>>,
    ApiError,
> {
    // Reject streams for sessions that do not exist.
    state.store.get(id)?;

    let rx = state.notifier.subscribe(id);
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(
        |result: Result<EventEnvelope, _>| {
            // A lagged receiver drops the missed events; the poll fallback
            // covers the gap.
            result.ok().and_then(|envelope| {
                serde_json::to_string(&envelope)
                    .ok()
                    .map(|data| Ok(SseEvent::default().data(data)))
            })
        },
    );
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn recent_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EventEnvelope>>, ApiError> {
    state.store.get(id)?;
    Ok(Json(state.notifier.recent(id)))
}

// ---------------------------------------------------------------------------
// Health / metrics
// ---------------------------------------------------------------------------

async fn healthz() -> &'static str {
    "ok"
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    state.metrics.as_ref().map_or_else(
        || (StatusCode::NOT_FOUND, "metrics not enabled").into_response(),
        |handle| handle.render().into_response(),
    )
}

// ---------------------------------------------------------------------------
// Server loop
// ---------------------------------------------------------------------------

/// Binds the listener and serves until cancellation.
///
/// # Errors
///
/// Returns [`AttuneError::Server`] if the bind address is invalid or the
/// listener cannot bind, and [`AttuneError::Io`] if serving fails.
pub async fn serve(
    config: &AttuneConfig,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), AttuneError> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|e| AttuneError::Server(format!("invalid bind address: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AttuneError::Server(format!("bind {addr} failed: {e}")))?;
    let bound = listener
        .local_addr()
        .map_err(|e| AttuneError::Server(format!("local_addr failed: {e}")))?;
    info!(%bound, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    debug!("HTTP server shut down");
    Ok(())
}
