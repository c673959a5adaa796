//! Conversation-level call state.
//!
//! Always recomputed from stored sessions; nothing here is cached.

use crate::errors::RoomError;
use crate::model::{InCallFlags, Session};
use crate::store::RoomStore;
use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::types::ConversationId;
use std::sync::Arc;

/// Union of the in-call flags of every session live at `now`.
pub fn aggregate_flags<'a>(
    sessions: impl IntoIterator<Item = &'a Session>,
    now: DateTime<Utc>,
) -> InCallFlags {
    sessions
        .into_iter()
        .filter(|s| s.is_live_at(now))
        .fold(InCallFlags::DISCONNECTED, |flags, s| flags.with(s.in_call))
}

/// Number of sessions live at `now` that are in the call.
pub fn count_in_call<'a>(sessions: impl IntoIterator<Item = &'a Session>, now: DateTime<Utc>) -> usize {
    sessions
        .into_iter()
        .filter(|s| s.is_live_at(now) && s.in_call.is_in_call())
        .count()
}

#[derive(Debug, Clone)]
pub struct CallStateAggregator {
    store: Arc<dyn RoomStore>,
    clock: Arc<dyn Clock>,
}

impl CallStateAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current call flags of a conversation.
    pub async fn aggregate(&self, conversation_id: ConversationId) -> Result<InCallFlags, RoomError> {
        let sessions = self.store.sessions(conversation_id).await?;
        Ok(aggregate_flags(&sessions, self.clock.now()))
    }

    pub async fn is_call_active(&self, conversation_id: ConversationId) -> Result<bool, RoomError> {
        Ok(self.aggregate(conversation_id).await?.is_in_call())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::types::{AttendeeId, SessionId};

    fn session(in_call: InCallFlags, age_seconds: i64, now: DateTime<Utc>) -> Session {
        Session {
            id: SessionId::new(),
            conversation_id: ConversationId::new(),
            attendee_id: AttendeeId::new(),
            token: "t".to_string(),
            in_call,
            last_heartbeat: now - Duration::seconds(age_seconds),
        }
    }

    #[test]
    fn test_stale_sessions_do_not_contribute() {
        let now = Utc::now();
        let sessions = vec![
            session(InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO, 0, now),
            session(
                InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO | InCallFlags::WITH_VIDEO,
                120,
                now,
            ),
        ];
        assert_eq!(
            aggregate_flags(&sessions, now),
            InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO
        );
        assert_eq!(count_in_call(&sessions, now), 1);
    }

    #[test]
    fn test_no_live_sessions_is_disconnected() {
        let now = Utc::now();
        let sessions = vec![session(InCallFlags::IN_CALL, 61, now)];
        assert_eq!(aggregate_flags(&sessions, now), InCallFlags::DISCONNECTED);
        assert_eq!(aggregate_flags(&[], now), InCallFlags::DISCONNECTED);
    }

    #[test]
    fn test_union_of_live_sessions() {
        let now = Utc::now();
        let sessions = vec![
            session(InCallFlags::IN_CALL | InCallFlags::WITH_VIDEO, 10, now),
            session(InCallFlags::IN_CALL | InCallFlags::WITH_PHONE, 60, now),
            session(InCallFlags::DISCONNECTED, 0, now),
        ];
        assert_eq!(
            aggregate_flags(&sessions, now),
            InCallFlags::IN_CALL | InCallFlags::WITH_VIDEO | InCallFlags::WITH_PHONE
        );
        assert_eq!(count_in_call(&sessions, now), 2);
    }
}
