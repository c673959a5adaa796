//! Call participation and session teardown.

use super::ConversationAggregate;
use crate::attendees::AttendeeChange;
use crate::call_state::aggregate_flags;
use crate::errors::RoomError;
use crate::events::{ParticipantProperty, RemovalReason, SessionCloseReason};
use crate::model::{ActorType, Attendee, InCallFlags, ParticipantRole, Permissions, Session};
use crate::observability::metrics;
use common::types::SessionId;
use tracing::{debug, instrument};

impl ConversationAggregate {
    /// Store new in-call flags for `session` and publish
    /// `ParticipantModified{in_call}`. Returns the updated session.
    pub(super) async fn set_in_call(
        &self,
        attendee: &Attendee,
        session: Session,
        flags: InCallFlags,
    ) -> Result<Session, RoomError> {
        let before = self.ctx.store.set_session_in_call(session.id, flags).await?;
        let updated = Session {
            in_call: flags,
            ..before.clone()
        };
        let change = AttendeeChange::new(
            ParticipantProperty::InCall,
            i64::from(before.in_call.bits()),
            i64::from(flags.bits()),
        )
        .for_session(updated.clone());
        self.registry
            .update_attendee(&self.snapshot(), attendee.clone(), change)
            .await?;
        Ok(updated)
    }

    /// Join, leave or change media in the call through one session.
    #[instrument(skip_all, fields(token = %self.conversation.token, session_id = %session_id))]
    pub async fn change_in_call(
        &mut self,
        session_id: SessionId,
        flags: InCallFlags,
    ) -> Result<Session, RoomError> {
        self.ensure_alive()?;
        self.apply_lobby_timer().await?;
        let session = self
            .tracker
            .live_session(self.conversation.id, session_id)
            .await?;
        let mut attendee = self.ctx.store.attendee(session.attendee_id).await?;
        let permissions = self.resolve(&attendee);

        let mut flags = flags;
        if !flags.is_empty() {
            flags = flags.with(InCallFlags::IN_CALL);
            if !permissions.has(Permissions::PUBLISH_AUDIO) {
                flags = flags.without(InCallFlags::WITH_AUDIO);
            }
            if !permissions.has(Permissions::PUBLISH_VIDEO) {
                flags = flags.without(InCallFlags::WITH_VIDEO);
            }
        }

        let joining = flags.is_in_call() && !session.in_call.is_in_call();
        if joining {
            if self.conversation.lobby_active(self.now())
                && !attendee.role.is_moderator()
                && !permissions.has(Permissions::LOBBY_IGNORE)
            {
                return Err(RoomError::Forbidden("Conversation lobby is active".to_string()));
            }
            let others = self.tracker.list_live_sessions(self.conversation.id).await?;
            let call_active = aggregate_flags(
                others.iter().filter(|s| s.id != session.id),
                self.now(),
            )
            .is_in_call();
            let required = if call_active {
                Permissions::CALL_JOIN
            } else {
                Permissions::CALL_START
            };
            if !permissions.has(required) {
                return Err(RoomError::Forbidden(if call_active {
                    "Not allowed to join the call".to_string()
                } else {
                    "Not allowed to start a call".to_string()
                }));
            }
        }

        if flags == session.in_call {
            return Ok(session);
        }

        if joining {
            attendee.last_joined_call = Some(self.now());
            self.registry.persist(&attendee).await?;
        }
        self.set_in_call(&attendee, session, flags).await
    }

    /// Close one session. A self-joined user left without sessions is
    /// removed as well.
    #[instrument(skip_all, fields(token = %self.conversation.token, session_id = %session_id))]
    pub async fn disconnect(&mut self, session_id: SessionId) -> Result<(), RoomError> {
        self.ensure_alive()?;
        let snapshot = self.snapshot();
        let session = self
            .tracker
            .close_session(&snapshot, session_id, SessionCloseReason::Disconnected)
            .await?;

        let attendee = match self.ctx.store.attendee(session.attendee_id).await {
            Ok(attendee) => attendee,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if attendee.role == ParticipantRole::UserSelfJoined
            && self
                .tracker
                .live_sessions_of(self.conversation.id, attendee.id)
                .await?
                .is_empty()
        {
            self.registry
                .remove_attendees(&snapshot, vec![attendee], RemovalReason::Left)
                .await?;
        }
        Ok(())
    }

    /// Close sessions the sweeper found stale, then drop guests left
    /// without a session. Returns the number of sessions closed.
    pub async fn expire_sessions(&mut self, session_ids: &[SessionId]) -> Result<usize, RoomError> {
        if self.is_deleted() {
            return Ok(0);
        }
        let snapshot = self.snapshot();
        let mut expired = 0;
        for id in session_ids {
            if self.tracker.expire_session(&snapshot, *id).await?.is_some() {
                expired += 1;
            }
        }
        if expired > 0 {
            metrics::record_sessions_expired(expired);
            debug!(
                target: "rs.aggregate",
                token = %self.conversation.token,
                expired,
                "Stale sessions expired"
            );
        }
        self.clean_guests().await?;
        Ok(expired)
    }

    async fn clean_guests(&self) -> Result<(), RoomError> {
        let sessions = self.ctx.store.sessions(self.conversation.id).await?;
        let orphaned: Vec<_> = self
            .registry
            .list(self.conversation.id)
            .await?
            .into_iter()
            .filter(|a| a.actor.actor_type == ActorType::Guest)
            .filter(|a| !sessions.iter().any(|s| s.attendee_id == a.id))
            .collect();
        self.registry
            .remove_attendees(&self.snapshot(), orphaned, RemovalReason::GuestsCleaned)
            .await?;
        Ok(())
    }
}
