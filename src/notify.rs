//! Notification port: at-least-once event delivery to both participants.
//!
//! Events are discrete, typed, and carry a per-session monotonically
//! increasing sequence number so consumers can apply them idempotently.
//! The in-process [`BroadcastNotifier`] pushes over a tokio broadcast
//! channel (fanned out as SSE by the API layer) and also appends to a
//! bounded ring buffer that backs the poll fallback — exact delivery
//! timing is never synchronously observable, so clients may always ask
//! again.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{Direction, ReconcileAction, Stage};

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during session progress.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A session was created.
    SessionCreated {
        /// The two participants.
        participants: [Uuid; 2],
    },

    /// A participant consented to sharing their empathy attempt.
    AttemptShared {
        /// The consenting author.
        user_id: Uuid,
        /// The attempt number now current.
        attempt_number: u32,
    },

    /// A reconciliation cycle finished for one direction.
    ReconcilerComplete {
        /// Direction evaluated.
        direction: Direction,
        /// Classified action.
        action: ReconcileAction,
        /// Guesser attempt number evaluated.
        attempt_number: u32,
        /// Whether the circuit breaker forced the result.
        circuit_breaker_tripped: bool,
    },

    /// A share offer is waiting for the subject.
    ShareOfferOpened {
        /// Offer id for responding.
        offer_id: Uuid,
        /// Direction whose guesser would receive context.
        direction: Direction,
        /// Optional / strong recommendation.
        action: ReconcileAction,
        /// What the analyzer suggested clarifying.
        suggested_share_focus: Option<String>,
    },

    /// A share offer was resolved.
    ShareOfferResolved {
        /// Offer id.
        offer_id: Uuid,
        /// Direction of the offer.
        direction: Direction,
        /// True for accept, false for decline.
        accepted: bool,
    },

    /// Shared context was delivered to the guesser; a refinement window
    /// is now open.
    ContextShared {
        /// Direction the context clarifies.
        direction: Direction,
        /// The guesser who received the context.
        guesser_id: Uuid,
    },

    /// Both directions reached Proceed; empathy content is now mutually
    /// visible.
    SessionRevealed,

    /// A participant advanced a stage.
    StageAdvanced {
        /// Who advanced.
        user_id: Uuid,
        /// Stage left.
        from: Stage,
        /// Stage entered.
        to: Stage,
    },

    /// A participant completed the final stage.
    SessionCompleted {
        /// Who completed.
        user_id: Uuid,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with its session, timestamp, and a per-session
/// monotonically increasing sequence number.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Per-session, zero-based sequence counter — dedupe key for
    /// at-least-once consumers.
    pub sequence: u64,
    /// Owning session.
    pub session_id: Uuid,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// The wrapped event (flattened into the same JSON object).
    #[serde(flatten)]
    pub event: Event,
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// At-least-once event delivery to a session's participants.
///
/// Implementations must keep `publish` non-blocking: the reconciler calls
/// it from background tasks and the API layer from request handlers.
pub trait NotificationPort: Send + Sync {
    /// Publishes an event to everyone following the session.
    fn publish(&self, session_id: Uuid, event: Event);

    /// Recent events for the session, oldest first (poll fallback).
    fn recent(&self, session_id: Uuid) -> Vec<EventEnvelope>;
}

// ---------------------------------------------------------------------------
// Broadcast implementation
// ---------------------------------------------------------------------------

struct SessionChannel {
    tx: broadcast::Sender<EventEnvelope>,
    recent: Mutex<VecDeque<EventEnvelope>>,
    sequence: AtomicU64,
}

/// In-process notifier: broadcast fan-out plus a bounded ring buffer.
pub struct BroadcastNotifier {
    channels: DashMap<Uuid, SessionChannel>,
    buffer_capacity: usize,
}

impl BroadcastNotifier {
    /// Creates a notifier keeping `buffer_capacity` events per session.
    #[must_use]
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer_capacity: buffer_capacity.max(1),
        }
    }

    /// Subscribes to a session's live event stream.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<EventEnvelope> {
        self.channel(session_id, |ch| ch.tx.subscribe())
    }

    fn channel<T>(&self, session_id: Uuid, f: impl FnOnce(&SessionChannel) -> T) -> T {
        let entry = self.channels.entry(session_id).or_insert_with(|| {
            let (tx, _) = broadcast::channel(self.buffer_capacity);
            SessionChannel {
                tx,
                recent: Mutex::new(VecDeque::with_capacity(self.buffer_capacity)),
                sequence: AtomicU64::new(0),
            }
        });
        f(entry.value())
    }
}

impl NotificationPort for BroadcastNotifier {
    fn publish(&self, session_id: Uuid, event: Event) {
        let capacity = self.buffer_capacity;
        self.channel(session_id, |ch| {
            let envelope = EventEnvelope {
                sequence: ch.sequence.fetch_add(1, Ordering::SeqCst),
                session_id,
                timestamp: Utc::now(),
                event,
            };

            {
                let mut recent = ch.recent.lock().expect("event buffer mutex poisoned");
                if recent.len() == capacity {
                    recent.pop_front();
                }
                recent.push_back(envelope.clone());
            }

            // No live subscribers is fine — the ring buffer still has it.
            let _ = ch.tx.send(envelope);
        });
    }

    fn recent(&self, session_id: Uuid) -> Vec<EventEnvelope> {
        self.channels
            .get(&session_id)
            .map(|ch| {
                ch.recent
                    .lock()
                    .expect("event buffer mutex poisoned")
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for BroadcastNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastNotifier")
            .field("sessions", &self.channels.len())
            .field("buffer_capacity", &self.buffer_capacity)
            .finish()
    }
}
