//! `ConversationActor`: sole owner of one conversation's aggregate.
//!
//! All mutations of a conversation go through this actor's mailbox, so they
//! are applied, persisted and published strictly one after another. The
//! actor stops on its own once the conversation is deleted.

use super::messages::{ConversationMessage, Reply};
use super::metrics::{ActorType, MailboxMonitor};
use crate::aggregate::{
    ConversationAggregate, ConversationState, Initiator, JoinRequest, MessageKind, RoomChange,
};
use crate::attendees::AttendeeSpec;
use crate::errors::RoomError;
use crate::model::{
    Attendee, CallRecording, ConversationType, InCallFlags, LobbyState, Participant, Permissions,
    Session,
};
use crate::permissions::PermissionMethod;
use chrono::{DateTime, Utc};
use common::types::{AttendeeId, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for a conversation mailbox.
const CONVERSATION_CHANNEL_BUFFER: usize = 256;

/// How often an idle actor checks its lobby timer.
const LOBBY_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to a `ConversationActor`.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    sender: mpsc::Sender<ConversationMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    token: String,
}

impl ConversationHandle {
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Send a request and wait for its reply. A stopped actor means the
    /// conversation is gone.
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ConversationMessage,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RoomError::ConversationNotFound(self.token.clone()))?;

        rx.await
            .map_err(|_| RoomError::ConversationNotFound(self.token.clone()))?
    }

    pub async fn join(&self, request: JoinRequest) -> Result<Participant, RoomError> {
        self.request(|respond_to| ConversationMessage::Join {
            request,
            respond_to,
        })
        .await
    }

    pub async fn leave(&self, attendee_id: AttendeeId) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::Leave {
            attendee_id,
            respond_to,
        })
        .await
    }

    pub async fn add_attendees(
        &self,
        initiator: Initiator,
        specs: Vec<AttendeeSpec>,
    ) -> Result<Vec<Attendee>, RoomError> {
        self.request(|respond_to| ConversationMessage::AddAttendees {
            initiator,
            specs,
            respond_to,
        })
        .await
    }

    pub async fn remove_attendee(
        &self,
        initiator: Initiator,
        attendee_id: AttendeeId,
    ) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::RemoveAttendee {
            initiator,
            attendee_id,
            respond_to,
        })
        .await
    }

    /// Returns false when the attendee was already gone.
    pub async fn remove_remote_attendee(&self, attendee_id: AttendeeId) -> Result<bool, RoomError> {
        self.request(|respond_to| ConversationMessage::RemoveRemoteAttendee {
            attendee_id,
            respond_to,
        })
        .await
    }

    pub async fn promote(&self, initiator: Initiator, attendee_id: AttendeeId) -> Result<Attendee, RoomError> {
        self.request(|respond_to| ConversationMessage::Promote {
            initiator,
            attendee_id,
            respond_to,
        })
        .await
    }

    pub async fn demote(&self, initiator: Initiator, attendee_id: AttendeeId) -> Result<Attendee, RoomError> {
        self.request(|respond_to| ConversationMessage::Demote {
            initiator,
            attendee_id,
            respond_to,
        })
        .await
    }

    pub async fn set_permissions(
        &self,
        initiator: Initiator,
        attendee_id: AttendeeId,
        method: PermissionMethod,
        mask: Permissions,
    ) -> Result<Permissions, RoomError> {
        self.request(|respond_to| ConversationMessage::SetPermissions {
            initiator,
            attendee_id,
            method,
            mask,
            respond_to,
        })
        .await
    }

    pub async fn modify(&self, initiator: Initiator, change: RoomChange) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::Modify {
            initiator,
            change,
            respond_to,
        })
        .await
    }

    pub async fn change_type(&self, initiator: Initiator, room_type: ConversationType) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::ChangeType {
            initiator,
            room_type,
            respond_to,
        })
        .await
    }

    pub async fn set_lobby(
        &self,
        initiator: Initiator,
        state: LobbyState,
        timer: Option<DateTime<Utc>>,
    ) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::SetLobby {
            initiator,
            state,
            timer,
            respond_to,
        })
        .await
    }

    pub async fn set_default_permissions(
        &self,
        initiator: Initiator,
        method: PermissionMethod,
        mask: Permissions,
    ) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::SetDefaultPermissions {
            initiator,
            method,
            mask,
            respond_to,
        })
        .await
    }

    pub async fn start_recording(&self, initiator: Initiator, status: CallRecording) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::StartRecording {
            initiator,
            status,
            respond_to,
        })
        .await
    }

    pub async fn stop_recording(&self, initiator: Initiator) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::StopRecording {
            initiator,
            respond_to,
        })
        .await
    }

    pub async fn recording_status_changed(&self, status: CallRecording) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::RecordingStatus { status, respond_to })
            .await
    }

    pub async fn change_in_call(&self, session_id: SessionId, flags: InCallFlags) -> Result<Session, RoomError> {
        self.request(|respond_to| ConversationMessage::ChangeInCall {
            session_id,
            flags,
            respond_to,
        })
        .await
    }

    pub async fn disconnect(&self, session_id: SessionId) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::Disconnect {
            session_id,
            respond_to,
        })
        .await
    }

    pub async fn expire_sessions(&self, session_ids: Vec<SessionId>) -> Result<usize, RoomError> {
        self.request(|respond_to| ConversationMessage::ExpireSessions {
            session_ids,
            respond_to,
        })
        .await
    }

    pub async fn message_sent(&self, kind: MessageKind, message_id: u64, at: DateTime<Utc>) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::MessageSent {
            kind,
            message_id,
            at,
            respond_to,
        })
        .await
    }

    pub async fn mark_read(&self, attendee_id: AttendeeId, message_id: u64) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::MarkRead {
            attendee_id,
            message_id,
            respond_to,
        })
        .await
    }

    pub async fn mark_mentioned(&self, attendee_ids: Vec<AttendeeId>, message_id: u64) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::MarkMentioned {
            attendee_ids,
            message_id,
            respond_to,
        })
        .await
    }

    pub async fn effective_permissions(&self, attendee_id: AttendeeId) -> Result<Permissions, RoomError> {
        self.request(|respond_to| ConversationMessage::EffectivePermissions {
            attendee_id,
            respond_to,
        })
        .await
    }

    pub async fn state(&self) -> Result<ConversationState, RoomError> {
        self.request(|respond_to| ConversationMessage::GetState { respond_to })
            .await
    }

    pub async fn delete(&self, initiator: Initiator) -> Result<(), RoomError> {
        self.request(|respond_to| ConversationMessage::Delete {
            initiator,
            respond_to,
        })
        .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub struct ConversationActor {
    aggregate: ConversationAggregate,
    receiver: mpsc::Receiver<ConversationMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl ConversationActor {
    /// Spawn an actor owning `aggregate`.
    pub fn spawn(
        aggregate: ConversationAggregate,
        cancel_token: CancellationToken,
    ) -> (ConversationHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONVERSATION_CHANNEL_BUFFER);
        let token = aggregate.token().to_string();
        let mailbox = MailboxMonitor::new(ActorType::Conversation, token.clone());

        let actor = Self {
            aggregate,
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
        };
        let task_handle = tokio::spawn(actor.run());

        let handle = ConversationHandle {
            sender,
            cancel_token,
            mailbox,
            token,
        };
        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rs.actor.conversation", fields(token = %self.aggregate.token()))]
    async fn run(mut self) {
        debug!(target: "rs.actor.conversation", "ConversationActor started");

        let mut lobby_check = tokio::time::interval(LOBBY_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rs.actor.conversation",
                        "ConversationActor received cancellation signal"
                    );
                    break;
                }

                _ = lobby_check.tick() => {
                    if let Err(e) = self.aggregate.apply_lobby_timer().await {
                        warn!(
                            target: "rs.actor.conversation",
                            error = %e,
                            "Failed to apply lobby timer"
                        );
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => break,
                    }
                }
            }

            if self.aggregate.is_deleted() {
                info!(
                    target: "rs.actor.conversation",
                    "Conversation deleted, stopping actor"
                );
                self.cancel_token.cancel();
                break;
            }
        }

        debug!(
            target: "rs.actor.conversation",
            messages_processed = self.mailbox.messages_processed(),
            "ConversationActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ConversationMessage) {
        let aggregate = &mut self.aggregate;
        match message {
            ConversationMessage::Join {
                request,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.join(request).await);
            }
            ConversationMessage::Leave {
                attendee_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.leave(attendee_id).await);
            }
            ConversationMessage::AddAttendees {
                initiator,
                specs,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.add_attendees(initiator, specs).await);
            }
            ConversationMessage::RemoveAttendee {
                initiator,
                attendee_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.remove_attendee(initiator, attendee_id).await);
            }
            ConversationMessage::RemoveRemoteAttendee {
                attendee_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.remove_remote_attendee(attendee_id).await);
            }
            ConversationMessage::Promote {
                initiator,
                attendee_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.promote(initiator, attendee_id).await);
            }
            ConversationMessage::Demote {
                initiator,
                attendee_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.demote(initiator, attendee_id).await);
            }
            ConversationMessage::SetPermissions {
                initiator,
                attendee_id,
                method,
                mask,
                respond_to,
            } => {
                let result = aggregate
                    .set_permissions(initiator, attendee_id, method, mask)
                    .await;
                let _ = respond_to.send(result);
            }
            ConversationMessage::Modify {
                initiator,
                change,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.modify(initiator, change).await);
            }
            ConversationMessage::ChangeType {
                initiator,
                room_type,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.change_type(initiator, room_type).await);
            }
            ConversationMessage::SetLobby {
                initiator,
                state,
                timer,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.set_lobby(initiator, state, timer).await);
            }
            ConversationMessage::SetDefaultPermissions {
                initiator,
                method,
                mask,
                respond_to,
            } => {
                let result = aggregate
                    .set_default_permissions(initiator, method, mask)
                    .await;
                let _ = respond_to.send(result);
            }
            ConversationMessage::StartRecording {
                initiator,
                status,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.start_recording(initiator, status).await);
            }
            ConversationMessage::StopRecording {
                initiator,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.stop_recording(initiator).await);
            }
            ConversationMessage::RecordingStatus { status, respond_to } => {
                let _ = respond_to.send(aggregate.recording_status_changed(status).await);
            }
            ConversationMessage::ChangeInCall {
                session_id,
                flags,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.change_in_call(session_id, flags).await);
            }
            ConversationMessage::Disconnect {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.disconnect(session_id).await);
            }
            ConversationMessage::ExpireSessions {
                session_ids,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.expire_sessions(&session_ids).await);
            }
            ConversationMessage::MessageSent {
                kind,
                message_id,
                at,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.message_sent(kind, message_id, at).await);
            }
            ConversationMessage::MarkRead {
                attendee_id,
                message_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.mark_read(attendee_id, message_id).await);
            }
            ConversationMessage::MarkMentioned {
                attendee_ids,
                message_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.mark_mentioned(&attendee_ids, message_id).await);
            }
            ConversationMessage::EffectivePermissions {
                attendee_id,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.effective_permissions(attendee_id).await);
            }
            ConversationMessage::GetState { respond_to } => {
                let _ = respond_to.send(aggregate.state().await);
            }
            ConversationMessage::Delete {
                initiator,
                respond_to,
            } => {
                let _ = respond_to.send(aggregate.delete(initiator).await);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::aggregate::CreateConversation;
    use crate::context::RoomContext;
    use crate::events::event_channel;
    use crate::model::{ActorRef, ParticipantRole};
    use crate::presets::PresetConfig;
    use crate::store::{MemoryStore, RoomStore};
    use common::clock::SystemClock;

    async fn spawn_group() -> (ConversationHandle, JoinHandle<()>, RoomContext) {
        let (publisher, _events) = event_channel();
        let ctx = RoomContext::new(
            Arc::new(MemoryStore::new()) as Arc<dyn RoomStore>,
            Arc::new(SystemClock),
            publisher,
            PresetConfig::default(),
            Permissions::DEFAULT,
        );
        let request = CreateConversation::new(ConversationType::Group, "Team")
            .with_owner(ActorRef::user("alice"))
            .with_member(ActorRef::user("bob"), ParticipantRole::User);
        let aggregate = ConversationAggregate::create(ctx.clone(), request).await.unwrap();
        let (handle, task) = ConversationActor::spawn(aggregate, CancellationToken::new());
        (handle, task, ctx)
    }

    #[tokio::test]
    async fn test_concurrent_joins_are_serialised() {
        let (handle, _task, _ctx) = spawn_group().await;

        let mut joins = Vec::new();
        for i in 0..20 {
            let handle = handle.clone();
            joins.push(tokio::spawn(async move {
                handle
                    .join(JoinRequest::new(ActorRef::user("bob")).with_session_token(format!("s{i}")))
                    .await
            }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        let state = handle.state().await.unwrap();
        assert_eq!(state.attendees.len(), 2);
        assert_eq!(state.live_sessions.len(), 20);
        assert_eq!(state.active_attendees, 1);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_actor_stops_after_delete() {
        let (handle, task, ctx) = spawn_group().await;
        let alice = ctx
            .store
            .attendee_by_actor(
                ctx.store.conversation_by_token(handle.token()).await.unwrap().id,
                &ActorRef::user("alice"),
            )
            .await
            .unwrap();

        handle.delete(Initiator::Attendee(alice.id)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            handle.state().await,
            Err(RoomError::ConversationNotFound(_))
        ));
    }
}
