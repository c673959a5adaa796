//! Attendee registry: durable membership.
//!
//! Every mutation here publishes exactly one event. Callers are expected to
//! run inside the owning conversation actor, which serialises them.

use crate::crypto;
use crate::errors::RoomError;
use crate::events::{DomainEvent, EventPublisher, ParticipantProperty, PropertyValue, RemovalReason};
use crate::model::{ActorRef, Attendee, Conversation, ParticipantRole, Permissions, Session};
use crate::store::RoomStore;
use common::secret::SecretString;
use common::types::{AttendeeId, ConversationId};
use std::sync::Arc;
use tracing::{debug, info};

/// Request to add one attendee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendeeSpec {
    pub actor: ActorRef,
    pub display_name: String,
    pub role: ParticipantRole,
    pub permissions: Permissions,
}

impl AttendeeSpec {
    /// Spec with the actor id as display name and inherited permissions.
    #[must_use]
    pub fn new(actor: ActorRef, role: ParticipantRole) -> Self {
        Self {
            display_name: actor.actor_id.clone(),
            actor,
            role,
            permissions: Permissions::DEFAULT,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct AttendeeRegistry {
    store: Arc<dyn RoomStore>,
    events: EventPublisher,
    default_read_privacy: bool,
}

impl AttendeeRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, events: EventPublisher, default_read_privacy: bool) -> Self {
        Self {
            store,
            events,
            default_read_privacy,
        }
    }

    /// Build, but do not store, the attendee record for `spec`.
    pub fn build(&self, conversation: &Conversation, spec: AttendeeSpec) -> Result<Attendee, RoomError> {
        let needs_token = spec.actor.actor_type.capabilities().needs_access_token;
        let mut attendee = Attendee::new(conversation.id, spec.actor, spec.display_name, spec.role);
        attendee.permissions = spec.permissions;
        attendee.last_read_message = conversation.last_message_id;
        attendee.read_privacy = self.default_read_privacy;
        if needs_token {
            attendee.access_token = Some(SecretString::from(crypto::access_token()?));
        }
        Ok(attendee)
    }

    /// Add one attendee per spec, all or none.
    pub async fn add_attendees(
        &self,
        conversation: &Conversation,
        specs: Vec<AttendeeSpec>,
    ) -> Result<Vec<Attendee>, RoomError> {
        let attendees = specs
            .into_iter()
            .map(|spec| self.build(conversation, spec))
            .collect::<Result<Vec<_>, _>>()?;
        self.insert(conversation, attendees).await
    }

    /// Store prebuilt attendees and publish `AttendeesAdded`.
    pub async fn insert(
        &self,
        conversation: &Conversation,
        attendees: Vec<Attendee>,
    ) -> Result<Vec<Attendee>, RoomError> {
        if attendees.is_empty() {
            return Ok(attendees);
        }
        self.store.insert_attendees(&attendees).await?;

        info!(
            target: "rs.attendees",
            token = %conversation.token,
            count = attendees.len(),
            "Attendees added"
        );

        self.events.publish(DomainEvent::AttendeesAdded {
            conversation: conversation.clone(),
            attendees: attendees.clone(),
        });
        Ok(attendees)
    }

    /// Delete attendees with all their sessions. Returns the closed
    /// sessions.
    pub async fn remove_attendees(
        &self,
        conversation: &Conversation,
        attendees: Vec<Attendee>,
        reason: RemovalReason,
    ) -> Result<Vec<Session>, RoomError> {
        if attendees.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<AttendeeId> = attendees.iter().map(|a| a.id).collect();
        let sessions = self.store.delete_attendees(&ids).await?;

        info!(
            target: "rs.attendees",
            token = %conversation.token,
            count = attendees.len(),
            sessions = sessions.len(),
            reason = reason.as_str(),
            "Attendees removed"
        );

        self.events.publish(DomainEvent::AttendeesRemoved {
            conversation: conversation.clone(),
            attendees,
            sessions: sessions.clone(),
            reason,
        });
        Ok(sessions)
    }

    pub async fn find_by_actor(
        &self,
        conversation_id: ConversationId,
        actor: &ActorRef,
    ) -> Result<Attendee, RoomError> {
        self.store.attendee_by_actor(conversation_id, actor).await
    }

    /// Like [`Self::find_by_actor`], mapping absence to `None`.
    pub async fn lookup_actor(
        &self,
        conversation_id: ConversationId,
        actor: &ActorRef,
    ) -> Result<Option<Attendee>, RoomError> {
        match self.store.attendee_by_actor(conversation_id, actor).await {
            Ok(attendee) => Ok(Some(attendee)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attendee by id, only if it belongs to `conversation_id`.
    pub async fn find(
        &self,
        conversation_id: ConversationId,
        id: AttendeeId,
    ) -> Result<Attendee, RoomError> {
        let attendee = self.store.attendee(id).await?;
        if attendee.conversation_id != conversation_id {
            return Err(RoomError::AttendeeNotFound(id.to_string()));
        }
        Ok(attendee)
    }

    pub async fn list(&self, conversation_id: ConversationId) -> Result<Vec<Attendee>, RoomError> {
        self.store.attendees(conversation_id).await
    }

    /// Persist a changed attendee and publish `ParticipantModified`.
    pub async fn update_attendee(
        &self,
        conversation: &Conversation,
        attendee: Attendee,
        change: AttendeeChange,
    ) -> Result<Attendee, RoomError> {
        self.store.update_attendee(&attendee).await?;

        debug!(
            target: "rs.attendees",
            token = %conversation.token,
            attendee_id = %attendee.id,
            property = change.property.as_str(),
            "Attendee modified"
        );

        self.events.publish(DomainEvent::ParticipantModified {
            conversation: conversation.clone(),
            attendee: attendee.clone(),
            session: change.session,
            property: change.property,
            old: change.old,
            new: change.new,
        });
        Ok(attendee)
    }

    /// Persist bookkeeping fields that nobody is notified about (read
    /// markers, last call join).
    pub async fn persist(&self, attendee: &Attendee) -> Result<(), RoomError> {
        self.store.update_attendee(attendee).await
    }
}

/// What changed in an [`AttendeeRegistry::update_attendee`] call.
#[derive(Debug, Clone)]
pub struct AttendeeChange {
    pub property: ParticipantProperty,
    pub old: PropertyValue,
    pub new: PropertyValue,
    pub session: Option<Session>,
}

impl AttendeeChange {
    #[must_use]
    pub fn new(property: ParticipantProperty, old: impl Into<PropertyValue>, new: impl Into<PropertyValue>) -> Self {
        Self {
            property,
            old: old.into(),
            new: new.into(),
            session: None,
        }
    }

    #[must_use]
    pub fn for_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::model::{ActorType, ConversationType};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use common::secret::ExposeSecret;

    async fn setup() -> (AttendeeRegistry, crate::events::EventReceiver, Conversation) {
        let store = Arc::new(MemoryStore::new());
        let mut conversation = Conversation::new("room1234", ConversationType::Group, Utc::now());
        conversation.last_message_id = 42;
        store.insert_conversation(&conversation).await.unwrap();
        let (events, receiver) = event_channel();
        (AttendeeRegistry::new(store, events, true), receiver, conversation)
    }

    #[tokio::test]
    async fn test_add_attendees_sets_defaults_and_emits_once() {
        let (registry, mut events, conversation) = setup().await;

        let added = registry
            .add_attendees(
                &conversation,
                vec![
                    AttendeeSpec::new(ActorRef::user("alice"), ParticipantRole::Owner),
                    AttendeeSpec::new(ActorRef::new(ActorType::Email, "x@example.com"), ParticipantRole::User),
                ],
            )
            .await
            .unwrap();

        assert_eq!(added.len(), 2);
        assert!(added.iter().all(|a| a.last_read_message == 42 && a.read_privacy));
        assert!(added[0].access_token.is_none());
        assert_eq!(added[1].access_token.as_ref().unwrap().expose_secret().len(), 64);

        match events.try_recv().unwrap() {
            DomainEvent::AttendeesAdded { attendees, .. } => assert_eq!(attendees.len(), 2),
            other => panic!("unexpected event {}", other.kind()),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_actor_is_conflict_without_event() {
        let (registry, mut events, conversation) = setup().await;
        registry
            .add_attendees(
                &conversation,
                vec![AttendeeSpec::new(ActorRef::user("alice"), ParticipantRole::User)],
            )
            .await
            .unwrap();
        let _ = events.try_recv();

        let result = registry
            .add_attendees(
                &conversation,
                vec![AttendeeSpec::new(ActorRef::user("alice"), ParticipantRole::Moderator)],
            )
            .await;

        assert!(matches!(result, Err(RoomError::Conflict(_))));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_find_rejects_attendee_of_other_conversation() {
        let (registry, _events, conversation) = setup().await;
        let added = registry
            .add_attendees(
                &conversation,
                vec![AttendeeSpec::new(ActorRef::user("alice"), ParticipantRole::User)],
            )
            .await
            .unwrap();

        let result = registry.find(ConversationId::new(), added[0].id).await;
        assert!(matches!(result, Err(RoomError::AttendeeNotFound(_))));
        assert!(registry.find(conversation.id, added[0].id).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_emits_reason() {
        let (registry, mut events, conversation) = setup().await;
        let added = registry
            .add_attendees(
                &conversation,
                vec![AttendeeSpec::new(ActorRef::guest("g1"), ParticipantRole::Guest)],
            )
            .await
            .unwrap();
        let _ = events.try_recv();

        registry
            .remove_attendees(&conversation, added, RemovalReason::GuestsCleaned)
            .await
            .unwrap();

        match events.try_recv().unwrap() {
            DomainEvent::AttendeesRemoved { reason, .. } => {
                assert_eq!(reason, RemovalReason::GuestsCleaned);
            }
            other => panic!("unexpected event {}", other.kind()),
        }
        assert!(registry
            .lookup_actor(conversation.id, &ActorRef::guest("g1"))
            .await
            .unwrap()
            .is_none());
    }
}
