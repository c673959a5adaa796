//! In-memory [`RoomStore`].
//!
//! All tables live behind one async mutex, so every trait method is atomic
//! with respect to every other. The lock is never held across an await
//! point outside this module.

use super::RoomStore;
use crate::errors::RoomError;
use crate::model::{ActorRef, Attendee, Conversation, ConversationType, InCallFlags, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{AttendeeId, ConversationId, SessionId};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    conversations: HashMap<ConversationId, Conversation>,
    tokens: HashMap<String, ConversationId>,
    attendees: HashMap<AttendeeId, Attendee>,
    sessions: HashMap<SessionId, Session>,
    session_tokens: HashMap<String, SessionId>,
}

impl Tables {
    fn attendees_of(&self, conversation_id: ConversationId) -> impl Iterator<Item = &Attendee> {
        self.attendees
            .values()
            .filter(move |a| a.conversation_id == conversation_id)
    }

    fn remove_session(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.session_tokens.remove(&session.token);
        Some(session)
    }

    fn remove_sessions_of(&mut self, attendee_ids: &HashSet<AttendeeId>) -> Vec<Session> {
        let ids: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| attendee_ids.contains(&s.attendee_id))
            .map(|s| s.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.remove_session(id))
            .collect()
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), RoomError> {
        let mut tables = self.tables.lock().await;
        if tables.tokens.contains_key(&conversation.token) {
            return Err(RoomError::Conflict("Conversation token already in use".to_string()));
        }
        tables
            .tokens
            .insert(conversation.token.clone(), conversation.id);
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn conversation(&self, id: ConversationId) -> Result<Conversation, RoomError> {
        let tables = self.tables.lock().await;
        tables
            .conversations
            .get(&id)
            .cloned()
            .ok_or_else(|| RoomError::ConversationNotFound(id.to_string()))
    }

    async fn conversation_by_token(&self, token: &str) -> Result<Conversation, RoomError> {
        let tables = self.tables.lock().await;
        tables
            .tokens
            .get(token)
            .and_then(|id| tables.conversations.get(id))
            .cloned()
            .ok_or_else(|| RoomError::ConversationNotFound(token.to_string()))
    }

    async fn conversation_with_members(
        &self,
        room_types: &[ConversationType],
        members: &[ActorRef],
    ) -> Result<Option<Conversation>, RoomError> {
        let tables = self.tables.lock().await;
        let wanted: HashSet<&ActorRef> = members.iter().collect();
        let found = tables
            .conversations
            .values()
            .filter(|c| room_types.contains(&c.room_type))
            .find(|c| {
                let actual: HashSet<&ActorRef> =
                    tables.attendees_of(c.id).map(|a| &a.actor).collect();
                actual == wanted
            })
            .cloned();
        Ok(found)
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), RoomError> {
        let mut tables = self.tables.lock().await;
        match tables.conversations.get_mut(&conversation.id) {
            Some(stored) => {
                *stored = conversation.clone();
                Ok(())
            }
            None => Err(RoomError::ConversationNotFound(conversation.token.clone())),
        }
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<(), RoomError> {
        let mut tables = self.tables.lock().await;
        let conversation = tables
            .conversations
            .remove(&id)
            .ok_or_else(|| RoomError::ConversationNotFound(id.to_string()))?;
        tables.tokens.remove(&conversation.token);

        let attendee_ids: HashSet<AttendeeId> = tables.attendees_of(id).map(|a| a.id).collect();
        tables.remove_sessions_of(&attendee_ids);
        tables.attendees.retain(|_, a| a.conversation_id != id);
        Ok(())
    }

    async fn conversation_ids(&self) -> Result<Vec<ConversationId>, RoomError> {
        let tables = self.tables.lock().await;
        Ok(tables.conversations.keys().copied().collect())
    }

    async fn insert_attendees(&self, attendees: &[Attendee]) -> Result<(), RoomError> {
        let mut tables = self.tables.lock().await;

        let mut seen: HashSet<(ConversationId, &ActorRef)> = HashSet::new();
        for attendee in attendees {
            if !tables.conversations.contains_key(&attendee.conversation_id) {
                return Err(RoomError::ConversationNotFound(
                    attendee.conversation_id.to_string(),
                ));
            }
            let exists = tables
                .attendees_of(attendee.conversation_id)
                .any(|a| a.actor == attendee.actor);
            if exists || !seen.insert((attendee.conversation_id, &attendee.actor)) {
                return Err(RoomError::Conflict(format!(
                    "Attendee {} already exists",
                    attendee.actor
                )));
            }
        }

        for attendee in attendees {
            tables.attendees.insert(attendee.id, attendee.clone());
        }
        Ok(())
    }

    async fn attendee(&self, id: AttendeeId) -> Result<Attendee, RoomError> {
        let tables = self.tables.lock().await;
        tables
            .attendees
            .get(&id)
            .cloned()
            .ok_or_else(|| RoomError::AttendeeNotFound(id.to_string()))
    }

    async fn attendee_by_actor(
        &self,
        conversation_id: ConversationId,
        actor: &ActorRef,
    ) -> Result<Attendee, RoomError> {
        let tables = self.tables.lock().await;
        let attendee = tables
            .attendees_of(conversation_id)
            .find(|a| &a.actor == actor)
            .cloned()
            .ok_or_else(|| RoomError::AttendeeNotFound(actor.to_string()));
        attendee
    }

    async fn attendees(&self, conversation_id: ConversationId) -> Result<Vec<Attendee>, RoomError> {
        let tables = self.tables.lock().await;
        let mut attendees: Vec<Attendee> = tables.attendees_of(conversation_id).cloned().collect();
        attendees.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(attendees)
    }

    async fn update_attendee(&self, attendee: &Attendee) -> Result<(), RoomError> {
        let mut tables = self.tables.lock().await;
        match tables.attendees.get_mut(&attendee.id) {
            Some(stored) => {
                *stored = attendee.clone();
                Ok(())
            }
            None => Err(RoomError::AttendeeNotFound(attendee.id.to_string())),
        }
    }

    async fn delete_attendees(&self, ids: &[AttendeeId]) -> Result<Vec<Session>, RoomError> {
        let mut tables = self.tables.lock().await;
        let ids: HashSet<AttendeeId> = ids.iter().copied().collect();
        let sessions = tables.remove_sessions_of(&ids);
        tables.attendees.retain(|id, _| !ids.contains(id));
        Ok(sessions)
    }

    async fn insert_session(&self, session: &Session) -> Result<(), RoomError> {
        let mut tables = self.tables.lock().await;
        if !tables.attendees.contains_key(&session.attendee_id) {
            return Err(RoomError::AttendeeNotFound(session.attendee_id.to_string()));
        }
        if tables.session_tokens.contains_key(&session.token) {
            return Err(RoomError::Conflict("Session token already in use".to_string()));
        }
        tables
            .session_tokens
            .insert(session.token.clone(), session.id);
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn session(&self, id: SessionId) -> Result<Session, RoomError> {
        let tables = self.tables.lock().await;
        tables
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| RoomError::SessionNotFound(id.to_string()))
    }

    async fn session_by_token(&self, token: &str) -> Result<Session, RoomError> {
        let tables = self.tables.lock().await;
        tables
            .session_tokens
            .get(token)
            .and_then(|id| tables.sessions.get(id))
            .cloned()
            .ok_or_else(|| RoomError::SessionNotFound("by token".to_string()))
    }

    async fn sessions(&self, conversation_id: ConversationId) -> Result<Vec<Session>, RoomError> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| s.conversation_id == conversation_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    async fn touch_session(&self, token: &str, at: DateTime<Utc>) -> Result<bool, RoomError> {
        let mut tables = self.tables.lock().await;
        let Some(id) = tables.session_tokens.get(token).copied() else {
            return Ok(false);
        };
        match tables.sessions.get_mut(&id) {
            Some(session) => {
                // Duplicate or reordered heartbeats never move time backwards.
                if at > session.last_heartbeat {
                    session.last_heartbeat = at;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_session_in_call(
        &self,
        id: SessionId,
        flags: InCallFlags,
    ) -> Result<Session, RoomError> {
        let mut tables = self.tables.lock().await;
        let session = tables
            .sessions
            .get_mut(&id)
            .ok_or_else(|| RoomError::SessionNotFound(id.to_string()))?;
        let before = session.clone();
        session.in_call = flags;
        Ok(before)
    }

    async fn delete_session(&self, id: SessionId) -> Result<Option<Session>, RoomError> {
        let mut tables = self.tables.lock().await;
        Ok(tables.remove_session(id))
    }

    async fn delete_session_if_stale(
        &self,
        id: SessionId,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Session>, RoomError> {
        let mut tables = self.tables.lock().await;
        let stale = tables
            .sessions
            .get(&id)
            .is_some_and(|s| s.last_heartbeat < cutoff);
        if stale {
            Ok(tables.remove_session(id))
        } else {
            Ok(None)
        }
    }

    async fn stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>, RoomError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.last_heartbeat < cutoff)
            .cloned()
            .collect())
    }
}
