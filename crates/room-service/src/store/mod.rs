//! Durable storage for conversations, attendees and sessions.
//!
//! Every method is a single atomic round trip. Callers never hold an
//! in-process lock across these calls; concurrency control beyond the
//! atomicity of each call comes from the per-conversation actor.

pub mod memory;

pub use memory::MemoryStore;

use crate::errors::RoomError;
use crate::model::{ActorRef, Attendee, Conversation, ConversationType, InCallFlags, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{AttendeeId, ConversationId, SessionId};

/// Storage backend for the engine.
#[async_trait]
pub trait RoomStore: Send + Sync + std::fmt::Debug {
    // --- conversations ---

    /// Insert a new conversation. `Conflict` when the token is taken.
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), RoomError>;

    async fn conversation(&self, id: ConversationId) -> Result<Conversation, RoomError>;

    async fn conversation_by_token(&self, token: &str) -> Result<Conversation, RoomError>;

    /// Conversation of one of `room_types` whose attendee set is exactly
    /// `members`, if any.
    async fn conversation_with_members(
        &self,
        room_types: &[ConversationType],
        members: &[ActorRef],
    ) -> Result<Option<Conversation>, RoomError>;

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), RoomError>;

    /// Delete a conversation with all its attendees and sessions.
    async fn delete_conversation(&self, id: ConversationId) -> Result<(), RoomError>;

    async fn conversation_ids(&self) -> Result<Vec<ConversationId>, RoomError>;

    // --- attendees ---

    /// Insert all attendees or none. `Conflict` when any (actor type,
    /// actor id) pair already exists in its conversation.
    async fn insert_attendees(&self, attendees: &[Attendee]) -> Result<(), RoomError>;

    async fn attendee(&self, id: AttendeeId) -> Result<Attendee, RoomError>;

    async fn attendee_by_actor(
        &self,
        conversation_id: ConversationId,
        actor: &ActorRef,
    ) -> Result<Attendee, RoomError>;

    async fn attendees(&self, conversation_id: ConversationId) -> Result<Vec<Attendee>, RoomError>;

    async fn update_attendee(&self, attendee: &Attendee) -> Result<(), RoomError>;

    /// Delete attendees and cascade their sessions. Returns the removed
    /// sessions. Ids that no longer exist are skipped.
    async fn delete_attendees(&self, ids: &[AttendeeId]) -> Result<Vec<Session>, RoomError>;

    // --- sessions ---

    /// `Conflict` when the transport token is already in use.
    async fn insert_session(&self, session: &Session) -> Result<(), RoomError>;

    async fn session(&self, id: SessionId) -> Result<Session, RoomError>;

    async fn session_by_token(&self, token: &str) -> Result<Session, RoomError>;

    /// All stored sessions of a conversation, live or not.
    async fn sessions(&self, conversation_id: ConversationId) -> Result<Vec<Session>, RoomError>;

    /// Set the heartbeat of an existing session. Returns `false` when the
    /// session is gone; never creates one.
    async fn touch_session(&self, token: &str, at: DateTime<Utc>) -> Result<bool, RoomError>;

    /// Replace the in-call flags. Returns the session as it was before.
    async fn set_session_in_call(
        &self,
        id: SessionId,
        flags: InCallFlags,
    ) -> Result<Session, RoomError>;

    /// Delete a session. `None` when it was already gone.
    async fn delete_session(&self, id: SessionId) -> Result<Option<Session>, RoomError>;

    /// Delete a session only if its heartbeat is still older than `cutoff`.
    async fn delete_session_if_stale(
        &self,
        id: SessionId,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Session>, RoomError>;

    /// Sessions across all conversations with a heartbeat older than
    /// `cutoff`.
    async fn stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>, RoomError>;
}
