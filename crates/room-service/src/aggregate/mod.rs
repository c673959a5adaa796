//! Conversation aggregate: the state machine for one conversation.
//!
//! ```text
//! Created --first member--> Active --one-to-one leave--> SoftRetired
//!    |                        |                              |
//!    +------------------------+--------- delete -------------+--> Deleted
//! ```
//!
//! The aggregate is owned by exactly one conversation actor, which calls it
//! one message at a time. Every successful mutation is persisted before its
//! event is published.

mod activity;
mod calls;
mod membership;
mod settings;

pub use activity::MessageKind;
pub use membership::JoinRequest;
pub use settings::RoomChange;

use crate::attendees::{AttendeeRegistry, AttendeeSpec};
use crate::call_state::{aggregate_flags, CallStateAggregator};
use crate::crypto;
use crate::errors::RoomError;
use crate::events::{DomainEvent, PropertyValue, RoomProperty};
use crate::model::{
    ActorRef, Attendee, Conversation, ConversationLifecycle, ConversationType, InCallFlags,
    Listable, LobbyState, MentionPermissions, ParticipantRole, Permissions, ReadOnlyState,
    RecordingConsent, Session, SipState,
};
use crate::context::RoomContext;
use crate::sessions::SessionTracker;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::AttendeeId;
use tracing::{debug, info, instrument};

/// Attempts at finding an unused conversation token.
const TOKEN_ATTEMPTS: usize = 5;

/// Longest accepted conversation name, in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// Longest accepted conversation description, in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Who asked for a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    /// The server itself (background tasks, backend callbacks).
    System,
    /// An attendee of the conversation.
    Attendee(AttendeeId),
}

/// Parameters for a new conversation. Unset values come from the default
/// preset, then from built-in neutral values.
#[derive(Debug, Clone, Default)]
pub struct CreateConversation {
    pub room_type: Option<ConversationType>,
    pub name: String,
    pub description: String,
    /// Added with the owner role.
    pub owner: Option<AttendeeSpec>,
    pub members: Vec<AttendeeSpec>,
    pub read_only: Option<ReadOnlyState>,
    pub listable: Option<Listable>,
    pub lobby: Option<LobbyState>,
    pub sip: Option<SipState>,
    pub message_expiration: Option<u32>,
    pub recording_consent: Option<RecordingConsent>,
    pub mention_permissions: Option<MentionPermissions>,
    pub default_permissions: Option<Permissions>,
    pub password: Option<SecretString>,
}

impl CreateConversation {
    #[must_use]
    pub fn new(room_type: ConversationType, name: impl Into<String>) -> Self {
        Self {
            room_type: Some(room_type),
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_owner(mut self, actor: ActorRef) -> Self {
        self.owner = Some(AttendeeSpec::new(actor, ParticipantRole::Owner));
        self
    }

    #[must_use]
    pub fn with_member(mut self, actor: ActorRef, role: ParticipantRole) -> Self {
        self.members.push(AttendeeSpec::new(actor, role));
        self
    }
}

/// Snapshot of a conversation for callers.
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// As callers observe it (forced preset applied).
    pub conversation: Conversation,
    pub attendees: Vec<Attendee>,
    pub live_sessions: Vec<Session>,
    pub call_flags: InCallFlags,
    pub active_attendees: usize,
}

#[derive(Debug)]
pub struct ConversationAggregate {
    ctx: RoomContext,
    /// Stored values; the forced preset is applied on read-back.
    conversation: Conversation,
    registry: AttendeeRegistry,
    tracker: SessionTracker,
    call_state: CallStateAggregator,
}

impl ConversationAggregate {
    #[must_use]
    pub fn new(ctx: RoomContext, conversation: Conversation) -> Self {
        Self {
            registry: ctx.registry(),
            tracker: ctx.tracker(),
            call_state: ctx.call_state(),
            ctx,
            conversation,
        }
    }

    /// Load an existing conversation.
    pub async fn load(ctx: RoomContext, token: &str) -> Result<Self, RoomError> {
        let conversation = ctx.store.conversation_by_token(token).await?;
        Ok(Self::new(ctx, conversation))
    }

    /// Create and store a new conversation, then add its initial members.
    #[instrument(skip_all, fields(room_type = ?request.room_type))]
    pub async fn create(ctx: RoomContext, request: CreateConversation) -> Result<Self, RoomError> {
        let conversation = Self::build_conversation(&ctx, &request).await?;
        let mut initial: Vec<AttendeeSpec> = Vec::new();
        if let Some(mut owner) = request.owner {
            owner.role = ParticipantRole::Owner;
            initial.push(owner);
        }
        initial.extend(request.members);
        Self::validate_initial_members(conversation.room_type, &initial)?;

        let conversation = Self::insert_with_fresh_token(&ctx, conversation).await?;
        let mut aggregate = Self::new(ctx, conversation);

        info!(
            target: "rs.aggregate",
            token = %aggregate.conversation.token,
            room_type = ?aggregate.conversation.room_type,
            "Conversation created"
        );
        aggregate.publish(DomainEvent::RoomCreated {
            conversation: aggregate.snapshot(),
        });

        if !initial.is_empty() {
            aggregate.mark_active().await?;
            let snapshot = aggregate.snapshot();
            aggregate.registry.add_attendees(&snapshot, initial).await?;
        }
        Ok(aggregate)
    }

    /// Default preset, then requested values, then type constraints, then
    /// the forced preset.
    async fn build_conversation(
        ctx: &RoomContext,
        request: &CreateConversation,
    ) -> Result<Conversation, RoomError> {
        let defaults = &ctx.presets.defaults;
        let room_type = request
            .room_type
            .or(defaults.room_type)
            .unwrap_or(ConversationType::Group);
        if room_type == ConversationType::OneToOneFormer {
            return Err(RoomError::Conflict(
                "Former one-to-one conversations cannot be created".to_string(),
            ));
        }

        let name = request.name.trim();
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(RoomError::Conflict("Conversation name is too long".to_string()));
        }
        if request.description.chars().count() > MAX_DESCRIPTION_LENGTH {
            return Err(RoomError::Conflict("Description is too long".to_string()));
        }

        let mut conversation = Conversation::new(String::new(), room_type, ctx.clock.now());
        conversation.name = name.to_string();
        conversation.description = request.description.clone();
        conversation.read_only = request
            .read_only
            .or(defaults.read_only)
            .unwrap_or(ReadOnlyState::ReadWrite);
        conversation.listable = request
            .listable
            .or(defaults.listable)
            .unwrap_or(Listable::None);
        conversation.lobby = request.lobby.or(defaults.lobby).unwrap_or(LobbyState::None);
        conversation.sip = request.sip.or(defaults.sip).unwrap_or(SipState::Disabled);
        conversation.message_expiration = request
            .message_expiration
            .or(defaults.message_expiration)
            .unwrap_or(0);
        conversation.recording_consent = request
            .recording_consent
            .or(defaults.recording_consent)
            .unwrap_or(RecordingConsent::Off);
        conversation.mention_permissions = request
            .mention_permissions
            .or(defaults.mention_permissions)
            .unwrap_or(MentionPermissions::Everyone);
        conversation.default_permissions = request
            .default_permissions
            .or(defaults.permissions)
            .unwrap_or(Permissions::DEFAULT);

        if let Some(password) = &request.password {
            if room_type != ConversationType::Public {
                return Err(RoomError::Conflict(
                    "Only public conversations can have a password".to_string(),
                ));
            }
            if !password.expose_secret().is_empty() {
                conversation.password_hash = Some(
                    crypto::spawn_hash_password(
                        SecretString::from(password.expose_secret()),
                        ctx.password_cost,
                    )
                    .await?,
                );
            }
        }

        if !room_type.is_group_like() {
            conversation.listable = Listable::None;
            conversation.lobby = LobbyState::None;
            conversation.sip = SipState::Disabled;
        }
        if room_type == ConversationType::Changelog {
            conversation.read_only = ReadOnlyState::ReadOnly;
        }

        ctx.presets.forced.apply_to(&mut conversation);
        Ok(conversation)
    }

    fn validate_initial_members(
        room_type: ConversationType,
        members: &[AttendeeSpec],
    ) -> Result<(), RoomError> {
        match room_type {
            ConversationType::OneToOne => {
                let users = members
                    .iter()
                    .filter(|m| m.actor.actor_type.capabilities().is_local_user)
                    .count();
                let distinct = members.first().map(|m| &m.actor) != members.get(1).map(|m| &m.actor);
                if users != 2 || members.len() != 2 || !distinct {
                    return Err(RoomError::Conflict(
                        "One-to-one conversations need exactly two distinct users".to_string(),
                    ));
                }
            }
            ConversationType::Changelog => {
                if members.len() != 1 {
                    return Err(RoomError::Conflict(
                        "Changelog conversations belong to exactly one user".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn insert_with_fresh_token(
        ctx: &RoomContext,
        mut conversation: Conversation,
    ) -> Result<Conversation, RoomError> {
        for _ in 0..TOKEN_ATTEMPTS {
            conversation.token = crypto::conversation_token()?;
            match ctx.store.insert_conversation(&conversation).await {
                Ok(()) => return Ok(conversation),
                Err(RoomError::Conflict(_)) => {
                    debug!(target: "rs.aggregate", "Conversation token collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(RoomError::Internal(
            "Could not allocate a conversation token".to_string(),
        ))
    }

    /// Stored values.
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.conversation.token
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.conversation.lifecycle == ConversationLifecycle::Deleted
    }

    /// The conversation as callers observe it.
    #[must_use]
    pub fn snapshot(&self) -> Conversation {
        self.ctx.effective(&self.conversation)
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    fn publish(&self, event: DomainEvent) {
        self.ctx.events.publish(event);
    }

    fn ensure_alive(&self) -> Result<(), RoomError> {
        if self.is_deleted() {
            return Err(RoomError::ConversationNotFound(self.conversation.token.clone()));
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), RoomError> {
        self.ctx.store.update_conversation(&self.conversation).await
    }

    /// `Created` becomes `Active` once anybody is a member.
    async fn mark_active(&mut self) -> Result<(), RoomError> {
        if self.conversation.lifecycle == ConversationLifecycle::Created {
            self.conversation.lifecycle = ConversationLifecycle::Active;
            self.persist().await?;
        }
        Ok(())
    }

    /// Effective permissions of an attendee right now.
    #[must_use]
    pub fn resolve(&self, attendee: &Attendee) -> Permissions {
        self.ctx.resolver.resolve(&self.conversation, attendee)
    }

    pub async fn effective_permissions(&self, attendee_id: AttendeeId) -> Result<Permissions, RoomError> {
        self.ensure_alive()?;
        let attendee = self.registry.find(self.conversation.id, attendee_id).await?;
        Ok(self.resolve(&attendee))
    }

    /// Fails with `Forbidden` unless the initiator is the system or a
    /// moderator of this conversation. Returns the moderator, if any.
    async fn require_moderator(&self, initiator: Initiator) -> Result<Option<Attendee>, RoomError> {
        match initiator {
            Initiator::System => Ok(None),
            Initiator::Attendee(id) => {
                let attendee = self
                    .registry
                    .find(self.conversation.id, id)
                    .await
                    .map_err(|e| {
                        if e.is_not_found() {
                            RoomError::Forbidden("Not a participant".to_string())
                        } else {
                            e
                        }
                    })?;
                if !attendee.role.is_moderator() {
                    return Err(RoomError::Forbidden("Moderator required".to_string()));
                }
                Ok(Some(attendee))
            }
        }
    }

    async fn room_modified(
        &self,
        property: RoomProperty,
        old: PropertyValue,
        new: PropertyValue,
        actor: Option<ActorRef>,
    ) -> Result<(), RoomError> {
        let federated = self
            .registry
            .list(self.conversation.id)
            .await?
            .into_iter()
            .filter(Attendee::is_federated)
            .collect();
        info!(
            target: "rs.aggregate",
            token = %self.conversation.token,
            property = property.as_str(),
            "Conversation modified"
        );
        self.publish(DomainEvent::RoomModified {
            conversation: self.snapshot(),
            property,
            old,
            new,
            actor,
            federated,
        });
        Ok(())
    }

    /// Open the lobby if its timer has passed.
    ///
    /// Applied lazily before every operation and on the actor's periodic
    /// tick. Returns whether anything changed.
    pub async fn apply_lobby_timer(&mut self) -> Result<bool, RoomError> {
        if self.is_deleted()
            || self.conversation.lobby != LobbyState::NonModerators
            || !self.conversation.lobby_timer_reached(self.now())
        {
            return Ok(false);
        }

        let timer = self.conversation.lobby_timer.take();
        self.conversation.lobby = LobbyState::None;
        self.persist().await?;

        info!(
            target: "rs.aggregate",
            token = %self.conversation.token,
            "Lobby timer reached, lobby disabled"
        );
        self.publish(DomainEvent::LobbyModified {
            conversation: self.snapshot(),
            old: LobbyState::NonModerators,
            new: LobbyState::None,
            timer,
            timer_reached: true,
        });
        Ok(true)
    }

    /// Current state for callers.
    pub async fn state(&self) -> Result<ConversationState, RoomError> {
        self.ensure_alive()?;
        let attendees = self.registry.list(self.conversation.id).await?;
        let live_sessions = self.tracker.list_live_sessions(self.conversation.id).await?;
        let call_flags = aggregate_flags(&live_sessions, self.now());
        let active_attendees = self.tracker.count_active_attendees(self.conversation.id).await?;
        Ok(ConversationState {
            conversation: self.snapshot(),
            attendees,
            live_sessions,
            call_flags,
            active_attendees,
        })
    }

    /// Emit `BeforeRoomDeleted`, remove everything, emit `RoomDeleted`.
    async fn destroy(&mut self) -> Result<(), RoomError> {
        let attendees = self.registry.list(self.conversation.id).await?;
        let sessions = self.ctx.store.sessions(self.conversation.id).await?;
        self.publish(DomainEvent::BeforeRoomDeleted {
            conversation: self.snapshot(),
            attendees,
            sessions,
        });

        self.ctx.store.delete_conversation(self.conversation.id).await?;
        self.conversation.lifecycle = ConversationLifecycle::Deleted;

        info!(
            target: "rs.aggregate",
            token = %self.conversation.token,
            "Conversation deleted"
        );
        self.publish(DomainEvent::RoomDeleted {
            conversation: self.snapshot(),
        });
        Ok(())
    }

    /// Delete the conversation.
    #[instrument(skip_all, fields(token = %self.conversation.token))]
    pub async fn delete(&mut self, initiator: Initiator) -> Result<(), RoomError> {
        self.ensure_alive()?;
        self.require_moderator(initiator).await?;
        self.destroy().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_support {
    use super::*;
    use crate::events::{event_channel, EventReceiver};
    use crate::presets::PresetConfig;
    use crate::store::{MemoryStore, RoomStore};
    use common::clock::ManualClock;
    use std::sync::Arc;

    pub struct Harness {
        pub ctx: RoomContext,
        pub clock: ManualClock,
        pub events: EventReceiver,
        pub store: Arc<MemoryStore>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_presets(PresetConfig::default())
        }

        pub fn with_presets(presets: PresetConfig) -> Self {
            let store = Arc::new(MemoryStore::new());
            let clock = ManualClock::starting_now();
            let (publisher, events) = event_channel();
            let ctx = RoomContext::new(
                Arc::clone(&store) as Arc<dyn RoomStore>,
                Arc::new(clock.clone()),
                publisher,
                presets,
                Permissions::DEFAULT,
            )
            .with_password_cost(crypto::MIN_BCRYPT_COST);
            Self {
                ctx,
                clock,
                events,
                store,
            }
        }

        pub fn drain(&mut self) -> Vec<DomainEvent> {
            let mut drained = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                drained.push(event);
            }
            drained
        }

        pub fn kinds(&mut self) -> Vec<&'static str> {
            self.drain().iter().map(DomainEvent::kind).collect()
        }

        /// Group conversation with alice as owner and bob as user.
        pub async fn group(&mut self) -> (ConversationAggregate, Attendee, Attendee) {
            self.conversation(ConversationType::Group).await
        }

        pub async fn conversation(
            &mut self,
            room_type: ConversationType,
        ) -> (ConversationAggregate, Attendee, Attendee) {
            let request = CreateConversation::new(room_type, "Team")
                .with_owner(ActorRef::user("alice"))
                .with_member(ActorRef::user("bob"), ParticipantRole::User);
            let aggregate = ConversationAggregate::create(self.ctx.clone(), request)
                .await
                .unwrap();
            let alice = self
                .ctx
                .store
                .attendee_by_actor(aggregate.conversation().id, &ActorRef::user("alice"))
                .await
                .unwrap();
            let bob = self
                .ctx
                .store
                .attendee_by_actor(aggregate.conversation().id, &ActorRef::user("bob"))
                .await
                .unwrap();
            self.drain();
            (aggregate, alice, bob)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::test_support::Harness;
    use super::*;
    use crate::presets::{ForcedPreset, PresetConfig};
    use crate::store::RoomStore;
    use chrono::Duration;
    use common::clock::Clock;

    #[tokio::test]
    async fn test_create_emits_room_created_then_attendees_added() {
        let mut h = Harness::new();
        let request = CreateConversation::new(ConversationType::Group, "  Team  ")
            .with_owner(ActorRef::user("alice"));

        let aggregate = ConversationAggregate::create(h.ctx.clone(), request)
            .await
            .unwrap();

        assert_eq!(aggregate.conversation().name, "Team");
        assert_eq!(aggregate.conversation().lifecycle, ConversationLifecycle::Active);
        assert_eq!(h.kinds(), vec!["room_created", "attendees_added"]);
    }

    #[tokio::test]
    async fn test_forced_listable_wins_over_request() {
        let mut presets = PresetConfig::default();
        presets.defaults.listable = Some(Listable::All);
        presets.forced = ForcedPreset {
            listable: Some(Listable::Users),
            ..ForcedPreset::default()
        };
        let h = Harness::with_presets(presets);

        let mut request = CreateConversation::new(ConversationType::Group, "Team");
        request.listable = Some(Listable::None);
        let aggregate = ConversationAggregate::create(h.ctx.clone(), request)
            .await
            .unwrap();

        assert_eq!(aggregate.snapshot().listable, Listable::Users);
        let stored = h
            .ctx
            .store
            .conversation_by_token(aggregate.token())
            .await
            .unwrap();
        assert_eq!(h.ctx.effective(&stored).listable, Listable::Users);
    }

    #[tokio::test]
    async fn test_default_preset_fills_unrequested_values() {
        let mut presets = PresetConfig::default();
        presets.defaults.room_type = Some(ConversationType::Public);
        presets.defaults.message_expiration = Some(3600);
        let h = Harness::with_presets(presets);

        let mut request = CreateConversation::default();
        request.message_expiration = Some(60);
        let aggregate = ConversationAggregate::create(h.ctx.clone(), request)
            .await
            .unwrap();

        assert_eq!(aggregate.conversation().room_type, ConversationType::Public);
        assert_eq!(aggregate.conversation().message_expiration, 60);
        assert_eq!(aggregate.conversation().lifecycle, ConversationLifecycle::Created);
    }

    #[tokio::test]
    async fn test_one_to_one_needs_two_users() {
        let h = Harness::new();
        let request = CreateConversation::new(ConversationType::OneToOne, "")
            .with_owner(ActorRef::user("alice"));
        let result = ConversationAggregate::create(h.ctx.clone(), request).await;
        assert!(matches!(result, Err(RoomError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_password_only_on_public() {
        let h = Harness::new();
        let mut request = CreateConversation::new(ConversationType::Group, "Team");
        request.password = Some(SecretString::from("hunter2"));
        let result = ConversationAggregate::create(h.ctx.clone(), request).await;
        assert!(matches!(result, Err(RoomError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_lobby_timer_applied_lazily() {
        let mut h = Harness::new();
        let (mut aggregate, alice, _) = h.group().await;
        let timer = h.clock.now() + Duration::minutes(5);
        aggregate
            .set_lobby(Initiator::Attendee(alice.id), LobbyState::NonModerators, Some(timer))
            .await
            .unwrap();
        h.drain();

        assert!(!aggregate.apply_lobby_timer().await.unwrap());
        h.clock.advance(Duration::minutes(6));
        assert!(aggregate.apply_lobby_timer().await.unwrap());

        assert_eq!(aggregate.conversation().lobby, LobbyState::None);
        match h.drain().pop().unwrap() {
            DomainEvent::LobbyModified { timer_reached, .. } => assert!(timer_reached),
            other => panic!("unexpected event {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_delete_emits_before_and_after_with_data() {
        let mut h = Harness::new();
        let (mut aggregate, alice, _) = h.group().await;

        aggregate.delete(Initiator::Attendee(alice.id)).await.unwrap();

        let events = h.drain();
        assert_eq!(events.len(), 2);
        match &events[0] {
            DomainEvent::BeforeRoomDeleted { attendees, .. } => assert_eq!(attendees.len(), 2),
            other => panic!("unexpected event {}", other.kind()),
        }
        assert_eq!(events[1].kind(), "room_deleted");
        assert!(aggregate.is_deleted());
        assert!(h.store.conversation_by_token(aggregate.token()).await.is_err());
        assert!(matches!(
            aggregate.state().await,
            Err(RoomError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_requires_moderator() {
        let mut h = Harness::new();
        let (mut aggregate, _, bob) = h.group().await;
        let result = aggregate.delete(Initiator::Attendee(bob.id)).await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));
        assert!(h.drain().is_empty());
    }
}
