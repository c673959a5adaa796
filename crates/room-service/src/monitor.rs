//! Read-only presence and call statistics.
//!
//! Queries go straight to the store and never pass through a conversation
//! actor, so monitoring load cannot delay mutations.

use crate::call_state::count_in_call;
use crate::errors::RoomError;
use crate::model::Session;
use crate::store::RoomStore;
use common::clock::Clock;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Presence counts of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoomStats {
    pub attendees: usize,
    /// Live sessions.
    pub sessions: usize,
    /// Live sessions currently in the call.
    pub sessions_in_call: usize,
}

/// Call activity across all conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallsSummary {
    pub conversations_in_call: usize,
    pub sessions_in_call: usize,
}

#[derive(Debug, Clone)]
pub struct Monitor {
    store: Arc<dyn RoomStore>,
    clock: Arc<dyn Clock>,
}

impl Monitor {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip_all, fields(token = %token))]
    pub async fn room_stats(&self, token: &str) -> Result<RoomStats, RoomError> {
        let conversation = self.store.conversation_by_token(token).await?;
        let attendees = self.store.attendees(conversation.id).await?;
        let sessions = self.store.sessions(conversation.id).await?;
        let now = self.clock.now();

        Ok(RoomStats {
            attendees: attendees.len(),
            sessions: sessions.iter().filter(|s| s.is_live_at(now)).count(),
            sessions_in_call: count_in_call(&sessions, now),
        })
    }

    #[instrument(skip_all)]
    pub async fn calls_summary(&self) -> Result<CallsSummary, RoomError> {
        let now = self.clock.now();
        let mut summary = CallsSummary {
            conversations_in_call: 0,
            sessions_in_call: 0,
        };
        for id in self.store.conversation_ids().await? {
            let sessions: Vec<Session> = self.store.sessions(id).await?;
            let in_call = count_in_call(&sessions, now);
            if in_call > 0 {
                summary.conversations_in_call += 1;
                summary.sessions_in_call += in_call;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::{ActorRef, Attendee, Conversation, ConversationType, InCallFlags, ParticipantRole};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use common::clock::ManualClock;
    use common::types::SessionId;

    async fn seed(store: &MemoryStore, clock: &ManualClock, token: &str) -> (Conversation, Attendee) {
        let conversation = Conversation::new(token, ConversationType::Group, clock.now());
        store.insert_conversation(&conversation).await.unwrap();
        let attendee = Attendee::new(conversation.id, ActorRef::user("alice"), "Alice", ParticipantRole::Owner);
        store.insert_attendees(std::slice::from_ref(&attendee)).await.unwrap();
        (conversation, attendee)
    }

    fn session(conversation: &Conversation, attendee: &Attendee, in_call: InCallFlags, age: i64, clock: &ManualClock) -> Session {
        Session {
            id: SessionId::new(),
            conversation_id: conversation.id,
            attendee_id: attendee.id,
            token: format!("tok-{age}-{}", in_call.bits()),
            in_call,
            last_heartbeat: clock.now() - Duration::seconds(age),
        }
    }

    #[tokio::test]
    async fn test_room_stats_counts_live_sessions_only() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::starting_now();
        let (conversation, alice) = seed(&store, &clock, "room1234").await;
        let in_call = InCallFlags::IN_CALL.with(InCallFlags::WITH_AUDIO);
        store.insert_session(&session(&conversation, &alice, in_call, 0, &clock)).await.unwrap();
        store.insert_session(&session(&conversation, &alice, InCallFlags::DISCONNECTED, 5, &clock)).await.unwrap();
        store.insert_session(&session(&conversation, &alice, in_call, 120, &clock)).await.unwrap();

        let monitor = Monitor::new(store, Arc::new(clock));
        let stats = monitor.room_stats("room1234").await.unwrap();

        assert_eq!(
            stats,
            RoomStats {
                attendees: 1,
                sessions: 2,
                sessions_in_call: 1,
            }
        );
        assert!(monitor.room_stats("missing1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_calls_summary_skips_idle_conversations() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::starting_now();
        let (busy, alice) = seed(&store, &clock, "busy1234").await;
        let (idle, bob) = seed(&store, &clock, "idle1234").await;
        store.insert_session(&session(&busy, &alice, InCallFlags::IN_CALL, 0, &clock)).await.unwrap();
        store.insert_session(&session(&busy, &alice, InCallFlags::IN_CALL, 1, &clock)).await.unwrap();
        store.insert_session(&session(&idle, &bob, InCallFlags::DISCONNECTED, 0, &clock)).await.unwrap();

        let summary = Monitor::new(store, Arc::new(clock)).calls_summary().await.unwrap();

        assert_eq!(summary.conversations_in_call, 1);
        assert_eq!(summary.sessions_in_call, 2);
    }
}
