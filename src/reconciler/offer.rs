//! Share offer lifecycle: offer → accept/decline.
//!
//! The subject answers an offer opened by an OFFER_* reconciler result.
//! Accepting shares context with the guesser and opens a refinement
//! window; declining is always honored and reveals with the guesser's
//! original attempt. Responding to an already-resolved offer is a no-op
//! success so client retries are harmless.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::SharingDeclinePolicy;
use crate::error::StoreError;
use crate::model::{OfferStatus, ShareOffer};
use crate::notify::{Event, NotificationPort};
use crate::observability::metrics;
use crate::store::{RespondOutcome, SessionStore};

/// The subject's answer to a share offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferAction {
    /// Share context with the guesser.
    Accept,
    /// Reveal as-is; no context produced.
    Decline,
}

/// Coordinates share offer responses.
pub struct ShareOfferCoordinator {
    store: Arc<SessionStore>,
    notifier: Arc<dyn NotificationPort>,
    decline_policy: SharingDeclinePolicy,
}

impl ShareOfferCoordinator {
    /// Creates a coordinator with the configured decline policy.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        notifier: Arc<dyn NotificationPort>,
        decline_policy: SharingDeclinePolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            decline_policy,
        }
    }

    /// The unresolved offer currently addressed to `user`, if any.
    pub fn pending_offer(&self, session_id: Uuid, user: Uuid) -> Result<Option<ShareOffer>, StoreError> {
        let session = self.store.get(session_id)?;
        session.with_state(|state| {
            let index = state.participant_index(user)?;
            Ok(state.pending_offer_for(index).cloned())
        })
    }

    /// Resolves an offer on behalf of its subject.
    ///
    /// `offer_id` may be omitted; the user's most recent offer (pending or
    /// resolved, for retry idempotence) is used instead.
    pub fn respond(
        &self,
        session_id: Uuid,
        user: Uuid,
        offer_id: Option<Uuid>,
        action: OfferAction,
        shared_content: Option<String>,
    ) -> Result<RespondOutcome, StoreError> {
        let session = self.store.get(session_id)?;

        let outcome = session.with_state(|state| {
            let index = state.participant_index(user)?;
            let target = match offer_id {
                Some(id) => id,
                None => state
                    .offers
                    .iter()
                    .rev()
                    .find(|o| o.direction.subject_index() == index)
                    .map(|o| o.id)
                    .ok_or(StoreError::OfferNotFound(Uuid::nil()))?,
            };
            state.respond_to_offer(
                user,
                target,
                action == OfferAction::Accept,
                shared_content,
                self.decline_policy,
                chrono::Utc::now(),
            )
        })?;

        if outcome.newly_resolved {
            let accepted = outcome.offer.status == OfferStatus::Accepted;
            info!(
                %session_id,
                offer_id = %outcome.offer.id,
                direction = %outcome.offer.direction,
                accepted,
                "share offer resolved"
            );
            metrics::record_offer_resolved(accepted);

            self.notifier.publish(
                session_id,
                Event::ShareOfferResolved {
                    offer_id: outcome.offer.id,
                    direction: outcome.offer.direction,
                    accepted,
                },
            );

            if let Some(context) = &outcome.context {
                let guesser =
                    session.participants[outcome.offer.direction.guesser_index()];
                self.notifier.publish(
                    session_id,
                    Event::ContextShared {
                        direction: context.direction,
                        guesser_id: guesser,
                    },
                );
            }

            if outcome.newly_revealed {
                self.notifier.publish(session_id, Event::SessionRevealed);
            }
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for ShareOfferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareOfferCoordinator")
            .field("decline_policy", &self.decline_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, ReconcileAction};
    use crate::notify::BroadcastNotifier;
    use chrono::Utc;

    fn setup() -> (Arc<SessionStore>, ShareOfferCoordinator, Uuid, Uuid, Uuid, Uuid) {
        let store = Arc::new(SessionStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(32));
        let coordinator = ShareOfferCoordinator::new(
            Arc::clone(&store),
            notifier,
            SharingDeclinePolicy::PerCycle,
        );

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let session = store.create_session(a, b);
        let session_id = session.id;

        // Walk the session to an open AToB offer.
        let offer_id = session.with_state(|s| {
            s.submit_feelings(a, "my feelings".into()).unwrap();
            s.submit_feelings(b, "their feelings".into()).unwrap();
            s.save_draft(a, "guess about b".into()).unwrap();
            s.consent(a, Utc::now()).unwrap();
            s.save_draft(b, "guess about a".into()).unwrap();
            s.consent(b, Utc::now()).unwrap();
            s.claim_reconciles();
            s.apply_reconcile_result(
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
            .unwrap()
            .id
        });

        (store, coordinator, session_id, a, b, offer_id)
    }

    #[test]
    fn pending_offer_addressed_to_subject() {
        let (_store, coordinator, session_id, a, b, offer_id) = setup();
        let pending = coordinator.pending_offer(session_id, b).unwrap().unwrap();
        assert_eq!(pending.id, offer_id);
        assert!(coordinator.pending_offer(session_id, a).unwrap().is_none());
    }

    #[test]
    fn accept_creates_context_once() {
        let (store, coordinator, session_id, _a, b, offer_id) = setup();
        let outcome = coordinator
            .respond(
                session_id,
                b,
                Some(offer_id),
                OfferAction::Accept,
                Some("what I meant".into()),
            )
            .unwrap();
        assert!(outcome.newly_resolved);
        assert!(outcome.context.is_some());

        // Retry: idempotent, still one context row.
        let retry = coordinator
            .respond(
                session_id,
                b,
                Some(offer_id),
                OfferAction::Accept,
                Some("retry content".into()),
            )
            .unwrap();
        assert!(!retry.newly_resolved);
        let contexts = store
            .get(session_id)
            .unwrap()
            .with_state(|s| s.contexts.len());
        assert_eq!(contexts, 1);
    }

    #[test]
    fn respond_without_offer_id_targets_latest() {
        let (_store, coordinator, session_id, _a, b, offer_id) = setup();
        let outcome = coordinator
            .respond(session_id, b, None, OfferAction::Decline, None)
            .unwrap();
        assert_eq!(outcome.offer.id, offer_id);
        assert_eq!(outcome.offer.status, OfferStatus::Declined);
    }

    #[test]
    fn decline_emits_resolution_event() {
        let store = Arc::new(SessionStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(32));
        let coordinator = ShareOfferCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&notifier) as Arc<dyn NotificationPort>,
            SharingDeclinePolicy::PerCycle,
        );
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let session = store.create_session(a, b);
        let offer_id = session.with_state(|s| {
            s.submit_feelings(a, "fa".into()).unwrap();
            s.submit_feelings(b, "fb".into()).unwrap();
            s.save_draft(a, "ga".into()).unwrap();
            s.consent(a, Utc::now()).unwrap();
            s.save_draft(b, "gb".into()).unwrap();
            s.consent(b, Utc::now()).unwrap();
            s.claim_reconciles();
            s.apply_reconcile_result(
                Direction::AToB,
                ReconcileAction::OfferOptional,
                "gap".into(),
                None,
                1,
                false,
                Utc::now(),
            )
            .unwrap()
            .offer
            .unwrap()
            .id
        });

        coordinator
            .respond(session.id, b, Some(offer_id), OfferAction::Decline, None)
            .unwrap();

        let events = notifier.recent(session.id);
        assert!(events.iter().any(|e| matches!(
            e.event,
            Event::ShareOfferResolved { accepted: false, .. }
        )));
        // No ContextShared for a decline.
        assert!(!events
            .iter()
            .any(|e| matches!(e.event, Event::ContextShared { .. })));
    }

    #[test]
    fn unknown_session_rejected() {
        let (_store, coordinator, _session_id, _a, b, _offer_id) = setup();
        assert!(matches!(
            coordinator.respond(Uuid::new_v4(), b, None, OfferAction::Decline, None),
            Err(StoreError::SessionNotFound(_))
        ));
    }
}
