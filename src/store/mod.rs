//! Session store.
//!
//! Sessions live in a `DashMap`; each session's mutable state sits behind
//! its own `std::sync::Mutex`. The lock is held only for short synchronous
//! sections, never across an `.await` — the reconciler captures its inputs
//! under the lock, runs the analyzer without it, and re-locks to apply.

pub mod session;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::StoreError;
pub use session::{
    AppliedResult, ConsentOutcome, DirectionPhase, DirectionState, ReconcileInputs,
    RespondOutcome, SessionState,
};

/// One session: immutable identity plus locked mutable state.
#[derive(Debug)]
pub struct Session {
    /// Session id.
    pub id: Uuid,
    /// The two participants; index 0 is "A".
    pub participants: [Uuid; 2],
    /// Creation time.
    pub created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Runs `f` with the session state locked.
    ///
    /// Poisoned mutex means a thread panicked mid-mutation — the state is
    /// suspect, so panicking here is the correct response.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut guard = self.state.lock().expect("session state mutex poisoned");
        f(&mut guard)
    }
}

/// In-process store of all sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session for two distinct participants.
    #[must_use]
    pub fn create_session(&self, participant_a: Uuid, participant_b: Uuid) -> Arc<Session> {
        let id = Uuid::new_v4();
        let participants = [participant_a, participant_b];
        let session = Arc::new(Session {
            id,
            participants,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::new(id, participants)),
        });
        self.sessions.insert(id, Arc::clone(&session));
        session
    }

    /// Looks up a session by id.
    pub fn get(&self, id: Uuid) -> Result<Arc<Session>, StoreError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::SessionNotFound(id))
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
