//! Session tracker: presence of connected devices.
//!
//! Heartbeats go straight to the store and never pass through a
//! conversation actor. The store only ever touches sessions that still
//! exist, so a close always wins over a late heartbeat.

use crate::call_state::aggregate_flags;
use crate::crypto;
use crate::errors::RoomError;
use crate::events::{DomainEvent, EventPublisher, SessionCloseReason};
use crate::model::{Attendee, Conversation, InCallFlags, Session};
use crate::store::RoomStore;
use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::types::{AttendeeId, ConversationId, SessionId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SessionTracker {
    store: Arc<dyn RoomStore>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
}

impl SessionTracker {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, clock: Arc<dyn Clock>, events: EventPublisher) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Open a session for `attendee`. A fresh token is generated when the
    /// transport does not supply one.
    pub async fn open_session(
        &self,
        conversation: &Conversation,
        attendee: &Attendee,
        token: Option<String>,
    ) -> Result<Session, RoomError> {
        if !attendee.actor.actor_type.capabilities().can_connect {
            return Err(RoomError::Forbidden(format!(
                "{} actors cannot connect",
                attendee.actor.actor_type
            )));
        }

        let token = match token {
            Some(token) => token,
            None => crypto::session_token()?,
        };
        let session = Session {
            id: SessionId::new(),
            conversation_id: conversation.id,
            attendee_id: attendee.id,
            token,
            in_call: InCallFlags::DISCONNECTED,
            last_heartbeat: self.clock.now(),
        };
        self.store.insert_session(&session).await?;

        debug!(
            target: "rs.sessions",
            token = %conversation.token,
            attendee_id = %attendee.id,
            session_id = %session.id,
            "Session opened"
        );

        self.events.publish(DomainEvent::SessionOpened {
            conversation: conversation.clone(),
            attendee: attendee.clone(),
            session: session.clone(),
        });
        Ok(session)
    }

    /// Refresh one session. `SessionNotFound` when it no longer exists.
    pub async fn heartbeat(&self, token: &str) -> Result<(), RoomError> {
        if self.store.touch_session(token, self.clock.now()).await? {
            Ok(())
        } else {
            Err(RoomError::SessionNotFound("heartbeat for unknown session".to_string()))
        }
    }

    /// Refresh many sessions. Returns the tokens that no longer exist.
    pub async fn heartbeat_many(&self, tokens: &[String]) -> Result<Vec<String>, RoomError> {
        let now = self.clock.now();
        let mut missing = Vec::new();
        for token in tokens {
            if !self.store.touch_session(token, now).await? {
                missing.push(token.clone());
            }
        }
        if !missing.is_empty() {
            debug!(
                target: "rs.sessions",
                requested = tokens.len(),
                missing = missing.len(),
                "Heartbeats for unknown sessions ignored"
            );
        }
        Ok(missing)
    }

    /// Close a session and publish `SessionClosed` with the recomputed
    /// presence of its attendee.
    pub async fn close_session(
        &self,
        conversation: &Conversation,
        session_id: SessionId,
        reason: SessionCloseReason,
    ) -> Result<Session, RoomError> {
        let session = self
            .store
            .delete_session(session_id)
            .await?
            .ok_or_else(|| RoomError::SessionNotFound(session_id.to_string()))?;
        self.publish_closed(conversation, &session, reason).await?;
        Ok(session)
    }

    /// Close a session only if it is still past the liveness window.
    /// `None` when a heartbeat landed in the meantime or it is gone.
    pub async fn expire_session(
        &self,
        conversation: &Conversation,
        session_id: SessionId,
    ) -> Result<Option<Session>, RoomError> {
        let cutoff = Session::liveness_cutoff(self.clock.now());
        let Some(session) = self.store.delete_session_if_stale(session_id, cutoff).await? else {
            return Ok(None);
        };
        self.publish_closed(conversation, &session, SessionCloseReason::Expired)
            .await?;
        Ok(Some(session))
    }

    async fn publish_closed(
        &self,
        conversation: &Conversation,
        session: &Session,
        reason: SessionCloseReason,
    ) -> Result<(), RoomError> {
        let now = self.clock.now();
        let remaining = self.store.sessions(conversation.id).await?;
        let attendee_present = remaining
            .iter()
            .any(|s| s.attendee_id == session.attendee_id && s.is_live_at(now));
        let call_flags = aggregate_flags(&remaining, now);
        let attendee = self.store.attendee(session.attendee_id).await?;

        info!(
            target: "rs.sessions",
            token = %conversation.token,
            session_id = %session.id,
            attendee_present,
            reason = ?reason,
            "Session closed"
        );

        self.events.publish(DomainEvent::SessionClosed {
            conversation: conversation.clone(),
            attendee,
            session: session.clone(),
            reason,
            attendee_present,
            call_flags,
        });
        Ok(())
    }

    /// Sessions of a conversation within the liveness window.
    pub async fn list_live_sessions(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Session>, RoomError> {
        let now = self.clock.now();
        let mut sessions = self.store.sessions(conversation_id).await?;
        sessions.retain(|s| s.is_live_at(now));
        Ok(sessions)
    }

    pub async fn live_sessions_of(
        &self,
        conversation_id: ConversationId,
        attendee_id: AttendeeId,
    ) -> Result<Vec<Session>, RoomError> {
        let mut sessions = self.list_live_sessions(conversation_id).await?;
        sessions.retain(|s| s.attendee_id == attendee_id);
        Ok(sessions)
    }

    /// A live session of `conversation_id`, or `SessionNotFound`.
    pub async fn live_session(
        &self,
        conversation_id: ConversationId,
        session_id: SessionId,
    ) -> Result<Session, RoomError> {
        let session = self.store.session(session_id).await?;
        if session.conversation_id != conversation_id || !session.is_live_at(self.clock.now()) {
            return Err(RoomError::SessionNotFound(session_id.to_string()));
        }
        Ok(session)
    }

    /// Distinct attendees with at least one live session.
    pub async fn count_active_attendees(
        &self,
        conversation_id: ConversationId,
    ) -> Result<usize, RoomError> {
        let sessions = self.list_live_sessions(conversation_id).await?;
        Ok(sessions
            .iter()
            .map(|s| s.attendee_id)
            .collect::<HashSet<_>>()
            .len())
    }

    /// Sessions past the liveness window, across all conversations.
    pub async fn sweep(&self) -> Result<Vec<Session>, RoomError> {
        self.store
            .stale_sessions(Session::liveness_cutoff(self.clock.now()))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::{event_channel, EventReceiver};
    use crate::model::{ActorRef, ConversationType, ParticipantRole};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use common::clock::ManualClock;

    struct Fixture {
        tracker: SessionTracker,
        store: Arc<MemoryStore>,
        clock: ManualClock,
        events: EventReceiver,
        conversation: Conversation,
        alice: Attendee,
        bob: Attendee,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::starting_now();
        let conversation = Conversation::new("room1234", ConversationType::Group, clock.now());
        store.insert_conversation(&conversation).await.unwrap();
        let alice = Attendee::new(conversation.id, ActorRef::user("alice"), "Alice", ParticipantRole::Owner);
        let bob = Attendee::new(conversation.id, ActorRef::user("bob"), "Bob", ParticipantRole::User);
        store.insert_attendees(&[alice.clone(), bob.clone()]).await.unwrap();
        let (publisher, events) = event_channel();
        let tracker = SessionTracker::new(
            Arc::clone(&store) as Arc<dyn RoomStore>,
            Arc::new(clock.clone()),
            publisher,
        );
        Fixture {
            tracker,
            store,
            clock,
            events,
            conversation,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn test_heartbeat_after_close_never_resurrects() {
        let f = fixture().await;
        let session = f
            .tracker
            .open_session(&f.conversation, &f.alice, Some("s1".to_string()))
            .await
            .unwrap();

        f.tracker
            .close_session(&f.conversation, session.id, SessionCloseReason::Disconnected)
            .await
            .unwrap();

        let result = f.tracker.heartbeat("s1").await;
        assert!(matches!(result, Err(RoomError::SessionNotFound(_))));
        assert!(f
            .tracker
            .list_live_sessions(f.conversation.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_heartbeats_do_not_survive_close() {
        let f = fixture().await;
        let session = f
            .tracker
            .open_session(&f.conversation, &f.alice, Some("s1".to_string()))
            .await
            .unwrap();

        let mut heartbeats = Vec::new();
        for _ in 0..50 {
            let tracker = f.tracker.clone();
            heartbeats.push(tokio::spawn(async move { tracker.heartbeat("s1").await }));
        }
        let tracker = f.tracker.clone();
        let conversation = f.conversation.clone();
        let close = tokio::spawn(async move {
            tracker
                .close_session(&conversation, session.id, SessionCloseReason::Disconnected)
                .await
        });

        assert_eq!(close.await.unwrap().unwrap().id, session.id);
        for heartbeat in heartbeats {
            // Each one either landed before the close or was rejected.
            let result = heartbeat.await.unwrap();
            assert!(matches!(result, Ok(()) | Err(RoomError::SessionNotFound(_))));
        }

        assert!(f
            .tracker
            .list_live_sessions(f.conversation.id)
            .await
            .unwrap()
            .is_empty());
        assert!(f.store.session(session.id).await.is_err());
        assert!(f.store.session_by_token("s1").await.is_err());
        let late = f.tracker.heartbeat("s1").await;
        assert!(matches!(late, Err(RoomError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_liveness_window_excludes_stale_sessions() {
        let f = fixture().await;
        f.tracker
            .open_session(&f.conversation, &f.alice, Some("a1".to_string()))
            .await
            .unwrap();
        f.tracker
            .open_session(&f.conversation, &f.bob, Some("b1".to_string()))
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(45));
        f.tracker.heartbeat("b1").await.unwrap();
        f.clock.advance(Duration::seconds(20));

        assert_eq!(f.tracker.count_active_attendees(f.conversation.id).await.unwrap(), 1);
        let stale = f.tracker.sweep().await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].token, "a1");
    }

    #[tokio::test]
    async fn test_close_reports_presence_of_remaining_sessions() {
        let mut f = fixture().await;
        let first = f
            .tracker
            .open_session(&f.conversation, &f.alice, None)
            .await
            .unwrap();
        f.tracker
            .open_session(&f.conversation, &f.alice, None)
            .await
            .unwrap();
        while f.events.try_recv().is_ok() {}

        f.tracker
            .close_session(&f.conversation, first.id, SessionCloseReason::Disconnected)
            .await
            .unwrap();

        match f.events.try_recv().unwrap() {
            DomainEvent::SessionClosed {
                attendee_present, ..
            } => assert!(attendee_present),
            other => panic!("unexpected event {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_expire_skips_session_with_fresh_heartbeat() {
        let f = fixture().await;
        let session = f
            .tracker
            .open_session(&f.conversation, &f.alice, Some("a1".to_string()))
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(90));
        assert_eq!(f.tracker.sweep().await.unwrap().len(), 1);

        f.tracker.heartbeat("a1").await.unwrap();

        assert!(f
            .tracker
            .expire_session(&f.conversation, session.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_group_actors_cannot_connect() {
        let f = fixture().await;
        let group = Attendee::new(
            f.conversation.id,
            ActorRef::new(crate::model::ActorType::Group, "admins"),
            "Admins",
            ParticipantRole::User,
        );
        let result = f.tracker.open_session(&f.conversation, &group, None).await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_many_reports_missing() {
        let f = fixture().await;
        f.tracker
            .open_session(&f.conversation, &f.alice, Some("a1".to_string()))
            .await
            .unwrap();

        let missing = f
            .tracker
            .heartbeat_many(&["a1".to_string(), "gone".to_string()])
            .await
            .unwrap();
        assert_eq!(missing, vec!["gone".to_string()]);
    }
}
