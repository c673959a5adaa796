//! Conversation settings: type, lobby, room properties, default
//! permissions and recording.

use super::{ConversationAggregate, Initiator, MAX_DESCRIPTION_LENGTH, MAX_NAME_LENGTH};
use crate::crypto;
use crate::errors::RoomError;
use crate::events::{DomainEvent, PropertyValue, RemovalReason, RoomProperty};
use crate::model::{
    CallRecording, ConversationType, InCallFlags, Listable, LobbyState, MentionPermissions,
    ParticipantRole, Permissions, ReadOnlyState, RecordingConsent, SipState,
};
use crate::permissions::{apply_change, PermissionMethod};
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

/// A change to one room property.
#[derive(Debug, Clone)]
pub enum RoomChange {
    Name(String),
    Description(String),
    ReadOnly(ReadOnlyState),
    Listable(Listable),
    SipEnabled(SipState),
    /// Seconds, 0 for never.
    MessageExpiration(u32),
    MentionPermissions(MentionPermissions),
    RecordingConsent(RecordingConsent),
    /// `None` or an empty password removes it.
    Password(Option<SecretString>),
}

impl RoomChange {
    #[must_use]
    pub const fn property(&self) -> RoomProperty {
        match self {
            Self::Name(_) => RoomProperty::Name,
            Self::Description(_) => RoomProperty::Description,
            Self::ReadOnly(_) => RoomProperty::ReadOnly,
            Self::Listable(_) => RoomProperty::Listable,
            Self::SipEnabled(_) => RoomProperty::SipEnabled,
            Self::MessageExpiration(_) => RoomProperty::MessageExpiration,
            Self::MentionPermissions(_) => RoomProperty::MentionPermissions,
            Self::RecordingConsent(_) => RoomProperty::RecordingConsent,
            Self::Password(_) => RoomProperty::Password,
        }
    }
}

fn conflict(message: &str) -> RoomError {
    RoomError::Conflict(message.to_string())
}

impl ConversationAggregate {
    fn ensure_not_forced(&self, change: &RoomChange) -> Result<(), RoomError> {
        let forced = &self.ctx.presets.forced;
        let pinned = match change {
            RoomChange::Listable(_) => forced.listable.is_some(),
            RoomChange::SipEnabled(_) => forced.sip.is_some(),
            RoomChange::MessageExpiration(_) => forced.message_expiration.is_some(),
            RoomChange::MentionPermissions(_) => forced.mention_permissions.is_some(),
            _ => false,
        };
        if pinned {
            return Err(RoomError::Conflict(format!(
                "{} is fixed by the server configuration",
                change.property().as_str()
            )));
        }
        Ok(())
    }

    /// Change one room property.
    #[instrument(skip_all, fields(token = %self.conversation.token, property = change.property().as_str()))]
    pub async fn modify(&mut self, initiator: Initiator, change: RoomChange) -> Result<(), RoomError> {
        self.ensure_alive()?;
        self.apply_lobby_timer().await?;
        let moderator = self.require_moderator(initiator).await?;
        self.ensure_not_forced(&change)?;

        let room_type = self.conversation.room_type;
        let group_like = room_type.is_group_like();
        let property = change.property();

        let (old, new): (PropertyValue, PropertyValue) = match change {
            RoomChange::Name(name) => {
                let name = name.trim().to_string();
                if room_type.is_one_to_one() {
                    return Err(conflict("One-to-one conversations cannot be renamed"));
                }
                if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
                    return Err(conflict("Invalid conversation name"));
                }
                if name == self.conversation.name {
                    return Ok(());
                }
                let old = std::mem::replace(&mut self.conversation.name, name.clone());
                (old.into(), name.into())
            }
            RoomChange::Description(description) => {
                if description.chars().count() > MAX_DESCRIPTION_LENGTH {
                    return Err(conflict("Description is too long"));
                }
                if description == self.conversation.description {
                    return Ok(());
                }
                let old = std::mem::replace(&mut self.conversation.description, description.clone());
                (old.into(), description.into())
            }
            RoomChange::ReadOnly(state) => {
                if !group_like && room_type != ConversationType::Changelog {
                    return Err(conflict("Read-only cannot be changed for this conversation"));
                }
                if state == self.conversation.read_only {
                    return Ok(());
                }
                let old = std::mem::replace(&mut self.conversation.read_only, state);
                (old.as_int().into(), state.as_int().into())
            }
            RoomChange::Listable(listable) => {
                if !group_like {
                    return Err(conflict("Only group and public conversations can be listed"));
                }
                if listable == self.conversation.listable {
                    return Ok(());
                }
                let old = std::mem::replace(&mut self.conversation.listable, listable);
                (old.as_int().into(), listable.as_int().into())
            }
            RoomChange::SipEnabled(sip) => {
                if !group_like {
                    return Err(conflict("SIP is only available for group and public conversations"));
                }
                if sip == self.conversation.sip {
                    return Ok(());
                }
                let old = std::mem::replace(&mut self.conversation.sip, sip);
                (old.as_int().into(), sip.as_int().into())
            }
            RoomChange::MessageExpiration(seconds) => {
                if matches!(room_type, ConversationType::OneToOneFormer | ConversationType::Changelog) {
                    return Err(conflict("Message expiration cannot be set for this conversation"));
                }
                if seconds == self.conversation.message_expiration {
                    return Ok(());
                }
                let old = std::mem::replace(&mut self.conversation.message_expiration, seconds);
                (i64::from(old).into(), i64::from(seconds).into())
            }
            RoomChange::MentionPermissions(mention) => {
                if !group_like {
                    return Err(conflict("Mention permissions only apply to group and public conversations"));
                }
                if mention == self.conversation.mention_permissions {
                    return Ok(());
                }
                let old = std::mem::replace(&mut self.conversation.mention_permissions, mention);
                (old.as_int().into(), mention.as_int().into())
            }
            RoomChange::RecordingConsent(consent) => {
                if consent == self.conversation.recording_consent {
                    return Ok(());
                }
                if self.call_state.is_call_active(self.conversation.id).await? {
                    return Err(conflict("Recording consent cannot change during a call"));
                }
                let old = std::mem::replace(&mut self.conversation.recording_consent, consent);
                (old.as_int().into(), consent.as_int().into())
            }
            RoomChange::Password(password) => {
                if room_type != ConversationType::Public {
                    return Err(conflict("Only public conversations can have a password"));
                }
                let password = password.filter(|p| !p.expose_secret().is_empty());
                let had_password = self.conversation.has_password();
                if password.is_none() && !had_password {
                    return Ok(());
                }
                self.conversation.password_hash = match password {
                    Some(password) => {
                        Some(crypto::spawn_hash_password(password, self.ctx.password_cost).await?)
                    }
                    None => None,
                };
                (had_password.into(), self.conversation.has_password().into())
            }
        };

        self.persist().await?;
        self.room_modified(property, old, new, moderator.map(|m| m.actor)).await?;
        Ok(())
    }

    /// Switch between group and public.
    ///
    /// Going private removes everyone who only had access because the
    /// conversation was public.
    #[instrument(skip_all, fields(token = %self.conversation.token, new_type = ?new_type))]
    pub async fn change_type(&mut self, initiator: Initiator, new_type: ConversationType) -> Result<(), RoomError> {
        self.ensure_alive()?;
        let moderator = self.require_moderator(initiator).await?;
        let old_type = self.conversation.room_type;
        if old_type == new_type {
            return Ok(());
        }
        if !old_type.is_group_like() || !new_type.is_group_like() {
            return Err(conflict("Only group and public conversations can change type"));
        }

        self.conversation.room_type = new_type;
        if new_type == ConversationType::Group {
            self.conversation.password_hash = None;
        }
        self.persist().await?;
        self.room_modified(
            RoomProperty::Type,
            old_type.as_int().into(),
            new_type.as_int().into(),
            moderator.map(|m| m.actor),
        )
        .await?;

        if new_type == ConversationType::Group {
            let removed: Vec<_> = self
                .registry
                .list(self.conversation.id)
                .await?
                .into_iter()
                .filter(|a| {
                    matches!(
                        a.role,
                        ParticipantRole::Guest
                            | ParticipantRole::GuestModerator
                            | ParticipantRole::UserSelfJoined
                    )
                })
                .collect();
            let snapshot = self.snapshot();
            self.registry
                .remove_attendees(&snapshot, removed, RemovalReason::TypeChanged)
                .await?;
        }
        Ok(())
    }

    /// Enable or disable the lobby, optionally with a timer that opens it.
    #[instrument(skip_all, fields(token = %self.conversation.token, state = ?state))]
    pub async fn set_lobby(
        &mut self,
        initiator: Initiator,
        state: LobbyState,
        timer: Option<DateTime<Utc>>,
    ) -> Result<(), RoomError> {
        self.ensure_alive()?;
        self.require_moderator(initiator).await?;
        if !self.conversation.room_type.is_group_like() {
            return Err(conflict("Only group and public conversations have a lobby"));
        }
        let now = self.now();
        if timer.is_some_and(|t| t <= now) {
            return Err(conflict("Lobby timer must be in the future"));
        }
        let timer = if state == LobbyState::NonModerators { timer } else { None };

        let old = self.conversation.lobby;
        if old == state && self.conversation.lobby_timer == timer {
            return Ok(());
        }
        self.conversation.lobby = state;
        self.conversation.lobby_timer = timer;
        self.persist().await?;

        info!(target: "rs.aggregate", token = %self.conversation.token, "Lobby changed");
        self.publish(DomainEvent::LobbyModified {
            conversation: self.snapshot(),
            old,
            new: state,
            timer,
            timer_reached: false,
        });

        if state == LobbyState::NonModerators && old != state {
            self.kick_lobby_members_from_call().await?;
        }
        Ok(())
    }

    async fn kick_lobby_members_from_call(&self) -> Result<(), RoomError> {
        for session in self.tracker.list_live_sessions(self.conversation.id).await? {
            if !session.in_call.is_in_call() {
                continue;
            }
            let attendee = self.ctx.store.attendee(session.attendee_id).await?;
            if attendee.role.is_moderator() || self.resolve(&attendee).has(Permissions::LOBBY_IGNORE) {
                continue;
            }
            self.set_in_call(&attendee, session, InCallFlags::DISCONNECTED)
                .await?;
        }
        Ok(())
    }

    /// Change the conversation default permissions.
    ///
    /// `Set` drops every attendee's custom mask; `Add` and `Remove` apply
    /// the same change to the custom masks that exist. One `RoomModified`
    /// is emitted whenever the default or any custom mask changed.
    #[instrument(skip_all, fields(token = %self.conversation.token, method = ?method))]
    pub async fn set_default_permissions(
        &mut self,
        initiator: Initiator,
        method: PermissionMethod,
        mask: Permissions,
    ) -> Result<(), RoomError> {
        self.ensure_alive()?;
        let moderator = self.require_moderator(initiator).await?;
        if self.conversation.room_type.is_one_to_one() {
            return Err(conflict("One-to-one conversations have no default permissions"));
        }

        let current = if self.conversation.default_permissions.is_default() {
            self.ctx.resolver.inherited(&self.conversation)
        } else {
            self.conversation.default_permissions
        };
        let updated = apply_change(current, method, mask);
        let old = self.conversation.default_permissions;

        let mut overrides = Vec::new();
        for mut attendee in self.registry.list(self.conversation.id).await? {
            if !attendee.permissions.is_custom() {
                continue;
            }
            let custom = match method {
                PermissionMethod::Set => Permissions::DEFAULT,
                PermissionMethod::Add | PermissionMethod::Remove => {
                    apply_change(attendee.permissions, method, mask)
                }
            };
            if custom != attendee.permissions {
                attendee.permissions = custom;
                overrides.push(attendee);
            }
        }

        if updated == old && overrides.is_empty() {
            return Ok(());
        }
        for attendee in &overrides {
            self.registry.persist(attendee).await?;
        }
        self.conversation.default_permissions = updated;
        self.persist().await?;

        debug!(
            target: "rs.aggregate",
            token = %self.conversation.token,
            overrides_changed = overrides.len(),
            "Default permissions changed"
        );
        self.room_modified(
            RoomProperty::DefaultPermissions,
            i64::from(old.bits()).into(),
            i64::from(updated.bits()).into(),
            moderator.map(|m| m.actor),
        )
        .await?;
        Ok(())
    }

    /// Ask the recording backend to start. `status` is `Video` or `Audio`.
    #[instrument(skip_all, fields(token = %self.conversation.token, status = ?status))]
    pub async fn start_recording(&mut self, initiator: Initiator, status: CallRecording) -> Result<(), RoomError> {
        self.ensure_alive()?;
        let moderator = self.require_moderator(initiator).await?;
        let starting = match status {
            CallRecording::Video => CallRecording::StartingVideo,
            CallRecording::Audio => CallRecording::StartingAudio,
            _ => return Err(conflict("Recording status must be video or audio")),
        };
        if !self.call_state.is_call_active(self.conversation.id).await? {
            return Err(conflict("No call in progress"));
        }
        if self.conversation.call_recording.is_active() {
            return Err(conflict("Recording already in progress"));
        }
        self.set_call_recording(starting, moderator.map(|m| m.actor)).await
    }

    #[instrument(skip_all, fields(token = %self.conversation.token))]
    pub async fn stop_recording(&mut self, initiator: Initiator) -> Result<(), RoomError> {
        self.ensure_alive()?;
        let moderator = self.require_moderator(initiator).await?;
        if self.conversation.call_recording == CallRecording::Stopped {
            return Ok(());
        }
        self.set_call_recording(CallRecording::Stopped, moderator.map(|m| m.actor))
            .await
    }

    /// Status reported back by the recording backend.
    pub async fn recording_status_changed(&mut self, status: CallRecording) -> Result<(), RoomError> {
        self.ensure_alive()?;
        if status == self.conversation.call_recording {
            return Ok(());
        }
        if status == CallRecording::Failed {
            warn!(target: "rs.aggregate", token = %self.conversation.token, "Recording failed");
        }
        self.set_call_recording(status, None).await
    }

    async fn set_call_recording(
        &mut self,
        status: CallRecording,
        actor: Option<crate::model::ActorRef>,
    ) -> Result<(), RoomError> {
        let old = std::mem::replace(&mut self.conversation.call_recording, status);
        self.persist().await?;
        self.room_modified(
            RoomProperty::CallRecording,
            old.as_int().into(),
            status.as_int().into(),
            actor,
        )
        .await?;
        Ok(())
    }
}
