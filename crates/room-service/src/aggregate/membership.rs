//! Joining, leaving and role management.

use super::{ConversationAggregate, Initiator};
use crate::attendees::{AttendeeChange, AttendeeSpec};
use crate::crypto;
use crate::errors::RoomError;
use crate::events::{DomainEvent, ParticipantProperty, RemovalReason};
use crate::model::{
    ActorRef, ActorType, Attendee, ConversationLifecycle, ConversationType, Listable,
    Participant, ParticipantRole, Permissions,
};
use crate::permissions::{apply_change, PermissionMethod};
use common::secret::{ExposeSecret, SecretString};
use common::types::AttendeeId;
use tracing::{info, instrument};

/// An actor asking to enter a conversation through one device.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub actor: ActorRef,
    pub display_name: Option<String>,
    pub password: Option<SecretString>,
    /// Transport session token; generated when absent.
    pub session_token: Option<String>,
}

impl JoinRequest {
    #[must_use]
    pub fn new(actor: ActorRef) -> Self {
        Self {
            actor,
            display_name: None,
            password: None,
            session_token: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl ConversationAggregate {
    /// Role a new actor gets when joining on its own, if it may.
    fn self_join_role(&self, actor: &ActorRef) -> Result<ParticipantRole, RoomError> {
        let conversation = self.snapshot();
        if !conversation.room_type.is_group_like() {
            return Err(RoomError::Forbidden(
                "Conversation does not accept new participants".to_string(),
            ));
        }
        if conversation.is_read_only() {
            return Err(RoomError::Forbidden("Conversation is read-only".to_string()));
        }

        let public = conversation.room_type == ConversationType::Public;
        match actor.actor_type {
            ActorType::User if conversation.listable != Listable::None => Ok(ParticipantRole::User),
            ActorType::User if public => Ok(ParticipantRole::UserSelfJoined),
            ActorType::Guest if public => Ok(ParticipantRole::Guest),
            _ => Err(RoomError::Forbidden(
                "Not allowed to join this conversation".to_string(),
            )),
        }
    }

    async fn check_password(&self, password: Option<&SecretString>) -> Result<(), RoomError> {
        let Some(hash) = &self.conversation.password_hash else {
            return Ok(());
        };
        let supplied = SecretString::from(password.map(|p| p.expose_secret()).unwrap_or_default());
        if crypto::spawn_verify_password(supplied, hash.clone()).await? {
            Ok(())
        } else {
            Err(RoomError::Forbidden("Wrong password".to_string()))
        }
    }

    fn check_lobby(&self, attendee: &Attendee) -> Result<(), RoomError> {
        if self.conversation.lobby_active(self.now())
            && !attendee.role.is_moderator()
            && !self.resolve(attendee).has(Permissions::LOBBY_IGNORE)
        {
            return Err(RoomError::Forbidden("Conversation lobby is active".to_string()));
        }
        Ok(())
    }

    /// Enter the conversation with a new session, adding the actor as an
    /// attendee first when the conversation allows self-joining.
    #[instrument(skip_all, fields(token = %self.conversation.token, actor = %request.actor))]
    pub async fn join(&mut self, request: JoinRequest) -> Result<Participant, RoomError> {
        self.ensure_alive()?;
        self.apply_lobby_timer().await?;

        let attendee = match self
            .registry
            .lookup_actor(self.conversation.id, &request.actor)
            .await?
        {
            Some(attendee) if attendee.former => {
                return Err(RoomError::Forbidden(
                    "Participant has left this conversation".to_string(),
                ));
            }
            Some(attendee) => {
                self.check_lobby(&attendee)?;
                attendee
            }
            None => {
                let role = self.self_join_role(&request.actor)?;
                self.check_password(request.password.as_ref()).await?;
                let mut spec = AttendeeSpec::new(request.actor.clone(), role);
                if let Some(name) = request.display_name.clone() {
                    spec = spec.with_display_name(name);
                }
                let candidate = self.registry.build(&self.conversation, spec)?;
                self.check_lobby(&candidate)?;

                self.mark_active().await?;
                let snapshot = self.snapshot();
                let mut added = self.registry.insert(&snapshot, vec![candidate]).await?;
                added
                    .pop()
                    .ok_or_else(|| RoomError::Internal("Attendee insert returned nothing".to_string()))?
            }
        };

        let session = self
            .tracker
            .open_session(&self.snapshot(), &attendee, request.session_token)
            .await?;
        let permissions = self.resolve(&attendee);
        Ok(Participant {
            attendee,
            session: Some(session),
            permissions,
        })
    }

    /// Leave the conversation for good.
    ///
    /// One-to-one attendees are kept as former until both sides have left.
    #[instrument(skip_all, fields(token = %self.conversation.token, attendee_id = %attendee_id))]
    pub async fn leave(&mut self, attendee_id: AttendeeId) -> Result<(), RoomError> {
        self.ensure_alive()?;
        let attendee = self.registry.find(self.conversation.id, attendee_id).await?;

        if self.conversation.room_type.is_one_to_one() {
            return self.leave_one_to_one(attendee).await;
        }

        let attendees = self.registry.list(self.conversation.id).await?;
        if attendee.role.is_moderator() && !attendee.role.is_guest() {
            let other_moderators = attendees.iter().any(|a| {
                a.id != attendee.id && a.role.is_moderator() && !a.role.is_guest()
            });
            let other_members = attendees
                .iter()
                .any(|a| a.id != attendee.id && !a.role.is_guest());
            if !other_moderators && other_members {
                return Err(RoomError::Conflict(
                    "Last moderator cannot leave while others remain".to_string(),
                ));
            }
        }

        let snapshot = self.snapshot();
        self.registry
            .remove_attendees(&snapshot, vec![attendee], RemovalReason::Left)
            .await?;

        if attendees.len() <= 1 {
            self.destroy().await?;
        }
        Ok(())
    }

    async fn leave_one_to_one(&mut self, mut attendee: Attendee) -> Result<(), RoomError> {
        if attendee.former {
            return Ok(());
        }
        attendee.former = true;
        self.registry.persist(&attendee).await?;
        let mut sessions = Vec::new();
        for session in self.ctx.store.sessions(self.conversation.id).await? {
            if session.attendee_id != attendee.id {
                continue;
            }
            if let Some(deleted) = self.ctx.store.delete_session(session.id).await? {
                sessions.push(deleted);
            }
        }

        self.conversation.room_type = ConversationType::OneToOneFormer;
        self.conversation.lifecycle = ConversationLifecycle::SoftRetired;
        self.persist().await?;

        info!(
            target: "rs.aggregate",
            token = %self.conversation.token,
            attendee_id = %attendee.id,
            "One-to-one participant left"
        );
        self.publish(DomainEvent::AttendeesRemoved {
            conversation: self.snapshot(),
            attendees: vec![attendee],
            sessions,
            reason: RemovalReason::Left,
        });

        let attendees = self.registry.list(self.conversation.id).await?;
        if attendees.iter().all(|a| a.former) {
            self.destroy().await?;
        }
        Ok(())
    }

    /// Bring former one-to-one attendees back, e.g. when either side writes
    /// again.
    pub async fn ensure_filled(&mut self) -> Result<(), RoomError> {
        self.ensure_alive()?;
        if self.conversation.room_type != ConversationType::OneToOneFormer {
            return Ok(());
        }
        let mut restored = Vec::new();
        for mut attendee in self.registry.list(self.conversation.id).await? {
            if attendee.former {
                attendee.former = false;
                self.registry.persist(&attendee).await?;
                restored.push(attendee);
            }
        }
        self.conversation.room_type = ConversationType::OneToOne;
        self.conversation.lifecycle = ConversationLifecycle::Active;
        self.persist().await?;

        if !restored.is_empty() {
            self.publish(DomainEvent::AttendeesAdded {
                conversation: self.snapshot(),
                attendees: restored,
            });
        }
        Ok(())
    }

    /// Invite actors.
    #[instrument(skip_all, fields(token = %self.conversation.token, count = specs.len()))]
    pub async fn add_attendees(
        &mut self,
        initiator: Initiator,
        specs: Vec<AttendeeSpec>,
    ) -> Result<Vec<Attendee>, RoomError> {
        self.ensure_alive()?;
        self.require_moderator(initiator).await?;
        if !self.conversation.room_type.is_group_like() {
            return Err(RoomError::Conflict(
                "Participants cannot be added to this conversation".to_string(),
            ));
        }
        if specs.iter().any(|s| s.actor.actor_type == ActorType::Guest) {
            return Err(RoomError::Conflict("Guests can only join on their own".to_string()));
        }
        self.mark_active().await?;
        let snapshot = self.snapshot();
        self.registry.add_attendees(&snapshot, specs).await
    }

    /// Remove another attendee.
    #[instrument(skip_all, fields(token = %self.conversation.token, attendee_id = %attendee_id))]
    pub async fn remove_attendee(
        &mut self,
        initiator: Initiator,
        attendee_id: AttendeeId,
    ) -> Result<(), RoomError> {
        self.ensure_alive()?;
        let moderator = self.require_moderator(initiator).await?;
        if self.conversation.room_type.is_one_to_one() {
            return Err(RoomError::Conflict(
                "Participants cannot be removed from one-to-one conversations".to_string(),
            ));
        }
        let target = self.registry.find(self.conversation.id, attendee_id).await?;
        if target.role == ParticipantRole::Owner
            && moderator.is_some_and(|m| m.role != ParticipantRole::Owner)
        {
            return Err(RoomError::Forbidden("Only owners can remove owners".to_string()));
        }
        let snapshot = self.snapshot();
        self.registry
            .remove_attendees(&snapshot, vec![target], RemovalReason::Removed)
            .await?;
        Ok(())
    }

    /// Remove a federated attendee whose remote share is gone. Returns
    /// false when it was already removed.
    pub async fn remove_remote_attendee(&mut self, attendee_id: AttendeeId) -> Result<bool, RoomError> {
        if self.is_deleted() {
            return Ok(false);
        }
        let attendee = match self.registry.find(self.conversation.id, attendee_id).await {
            Ok(attendee) => attendee,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        let snapshot = self.snapshot();
        self.registry
            .remove_attendees(&snapshot, vec![attendee], RemovalReason::RemoteGone)
            .await?;
        Ok(true)
    }

    /// Grant the moderator role.
    pub async fn promote(&mut self, initiator: Initiator, attendee_id: AttendeeId) -> Result<Attendee, RoomError> {
        self.ensure_alive()?;
        self.require_moderator(initiator).await?;
        let target = self.registry.find(self.conversation.id, attendee_id).await?;
        if !target.actor.actor_type.capabilities().can_moderate {
            return Err(RoomError::Conflict(format!(
                "{} actors cannot moderate",
                target.actor.actor_type
            )));
        }
        let role = match target.role {
            ParticipantRole::User | ParticipantRole::UserSelfJoined => ParticipantRole::Moderator,
            ParticipantRole::Guest => ParticipantRole::GuestModerator,
            _ => return Err(RoomError::Conflict("Participant is already a moderator".to_string())),
        };
        self.change_role(target, role).await
    }

    /// Revoke the moderator role. Owners can only be demoted by another
    /// owner, and never the last one.
    pub async fn demote(&mut self, initiator: Initiator, attendee_id: AttendeeId) -> Result<Attendee, RoomError> {
        self.ensure_alive()?;
        let moderator = self.require_moderator(initiator).await?;
        let target = self.registry.find(self.conversation.id, attendee_id).await?;
        let role = match target.role {
            ParticipantRole::Moderator => ParticipantRole::User,
            ParticipantRole::GuestModerator => ParticipantRole::Guest,
            ParticipantRole::Owner => {
                if moderator.is_some_and(|m| m.role != ParticipantRole::Owner) {
                    return Err(RoomError::Forbidden("Only owners can demote owners".to_string()));
                }
                let owners = self
                    .registry
                    .list(self.conversation.id)
                    .await?
                    .iter()
                    .filter(|a| a.role == ParticipantRole::Owner)
                    .count();
                if owners <= 1 {
                    return Err(RoomError::Conflict("Cannot demote the last owner".to_string()));
                }
                ParticipantRole::User
            }
            _ => return Err(RoomError::Conflict("Participant is not a moderator".to_string())),
        };
        self.change_role(target, role).await
    }

    async fn change_role(&self, mut target: Attendee, role: ParticipantRole) -> Result<Attendee, RoomError> {
        let old = target.role;
        target.role = role;
        let change = AttendeeChange::new(ParticipantProperty::Role, old.as_int(), role.as_int());
        self.registry
            .update_attendee(&self.snapshot(), target, change)
            .await
    }

    /// Change the custom permissions of one attendee. Returns its new
    /// effective permissions.
    #[instrument(skip_all, fields(token = %self.conversation.token, attendee_id = %attendee_id))]
    pub async fn set_permissions(
        &mut self,
        initiator: Initiator,
        attendee_id: AttendeeId,
        method: PermissionMethod,
        mask: Permissions,
    ) -> Result<Permissions, RoomError> {
        self.ensure_alive()?;
        self.require_moderator(initiator).await?;
        if self.conversation.room_type.is_one_to_one() {
            return Err(RoomError::Conflict(
                "Permissions cannot be changed in one-to-one conversations".to_string(),
            ));
        }
        let mut target = self.registry.find(self.conversation.id, attendee_id).await?;
        if target.role.is_moderator() {
            return Err(RoomError::Conflict(
                "Moderators cannot have custom permissions".to_string(),
            ));
        }

        let current = if target.permissions.is_custom() {
            target.permissions
        } else {
            self.ctx.resolver.inherited(&self.conversation)
        };
        let updated = apply_change(current, method, mask);
        if updated == target.permissions {
            return Ok(self.resolve(&target));
        }

        let old = target.permissions;
        target.permissions = updated;
        let change = AttendeeChange::new(
            ParticipantProperty::Permissions,
            i64::from(old.bits()),
            i64::from(updated.bits()),
        );
        let target = self
            .registry
            .update_attendee(&self.snapshot(), target, change)
            .await?;
        Ok(self.resolve(&target))
    }
}
