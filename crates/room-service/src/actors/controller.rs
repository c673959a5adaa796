//! `ConversationControllerActor`: singleton supervisor for conversation
//! actors.
//!
//! - Loads conversations lazily from the store and spawns one
//!   `ConversationActor` per loaded conversation
//! - Serialises creation, so find-or-create of one-to-one and changelog
//!   conversations never races
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Prunes actors that stopped (deleted conversations) and detects panics

use super::conversation::{ConversationActor, ConversationHandle};
use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorType, MailboxMonitor};
use crate::aggregate::{ConversationAggregate, CreateConversation};
use crate::context::RoomContext;
use crate::errors::RoomError;
use crate::model::{ActorRef, ConversationType, ParticipantRole};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each conversation actor.
const ACTOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `ConversationControllerActor`.
#[derive(Debug, Clone)]
pub struct ConversationControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl ConversationControllerHandle {
    /// Spawn the controller and return a handle to it.
    #[must_use]
    pub fn new(ctx: RoomContext) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = MailboxMonitor::new(ActorType::Controller, "controller");

        let actor = ConversationControllerActor {
            ctx,
            receiver,
            cancel_token: cancel_token.clone(),
            conversations: HashMap::new(),
            accepting_new: true,
            mailbox: Arc::clone(&mailbox),
        };
        let task_handle = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
                mailbox,
            },
            task_handle,
        )
    }

    async fn send(&self, message: ControllerMessage) -> Result<(), RoomError> {
        self.mailbox.record_enqueue();
        self.sender
            .send(message)
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))
    }

    /// Create a new conversation.
    pub async fn create(&self, request: CreateConversation) -> Result<ConversationHandle, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::Create {
            request,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// The one-to-one conversation of two users, created on first use.
    pub async fn open_one_to_one(
        &self,
        first: ActorRef,
        second: ActorRef,
    ) -> Result<ConversationHandle, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::OpenOneToOne {
            first,
            second,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// The changelog conversation of a user, created on first use.
    pub async fn open_changelog(&self, owner: ActorRef) -> Result<ConversationHandle, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::OpenChangelog {
            owner,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Handle to an existing conversation, loading it if needed.
    pub async fn conversation(&self, token: &str) -> Result<ConversationHandle, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::Get {
            token: token.to_string(),
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop loading conversations and cancel every actor.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerMessage::Shutdown {
            deadline,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedConversation {
    handle: ConversationHandle,
    task_handle: JoinHandle<()>,
    loaded_at: DateTime<Utc>,
}

pub struct ConversationControllerActor {
    ctx: RoomContext,
    receiver: mpsc::Receiver<ControllerMessage>,
    cancel_token: CancellationToken,
    /// Running conversation actors by token.
    conversations: HashMap<String, ManagedConversation>,
    accepting_new: bool,
    mailbox: Arc<MailboxMonitor>,
}

impl ConversationControllerActor {
    #[instrument(skip_all, name = "rs.actor.controller")]
    async fn run(mut self) {
        info!(
            target: "rs.actor.controller",
            "ConversationControllerActor started"
        );

        loop {
            self.check_conversation_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rs.actor.controller",
                        "ConversationControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "rs.actor.controller",
                                "ConversationControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rs.actor.controller",
            conversations_remaining = self.conversations.len(),
            messages_processed = self.mailbox.messages_processed(),
            "ConversationControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Create {
                request,
                respond_to,
            } => {
                let result = self.create(request).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::OpenOneToOne {
                first,
                second,
                respond_to,
            } => {
                let result = self.open_one_to_one(first, second).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::OpenChangelog { owner, respond_to } => {
                let result = self.open_changelog(owner).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::Get { token, respond_to } => {
                let result = self.get_or_load(&token).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    fn ensure_accepting(&self) -> Result<(), RoomError> {
        if self.accepting_new {
            Ok(())
        } else {
            Err(RoomError::Draining)
        }
    }

    fn manage(&mut self, aggregate: ConversationAggregate) -> ConversationHandle {
        let token = aggregate.token().to_string();
        let (handle, task_handle) =
            ConversationActor::spawn(aggregate, self.cancel_token.child_token());
        self.conversations.insert(
            token.clone(),
            ManagedConversation {
                handle: handle.clone(),
                task_handle,
                loaded_at: self.ctx.clock.now(),
            },
        );
        metrics::set_conversations_loaded(self.conversations.len());

        debug!(
            target: "rs.actor.controller",
            token = %token,
            total_conversations = self.conversations.len(),
            "Conversation actor spawned"
        );
        handle
    }

    async fn create(&mut self, request: CreateConversation) -> Result<ConversationHandle, RoomError> {
        self.ensure_accepting()?;
        let aggregate = ConversationAggregate::create(self.ctx.clone(), request).await?;
        Ok(self.manage(aggregate))
    }

    async fn get_or_load(&mut self, token: &str) -> Result<ConversationHandle, RoomError> {
        if let Some(managed) = self.conversations.get(token) {
            if !managed.task_handle.is_finished() {
                return Ok(managed.handle.clone());
            }
        }
        self.ensure_accepting()?;
        let aggregate = ConversationAggregate::load(self.ctx.clone(), token).await?;
        Ok(self.manage(aggregate))
    }

    async fn open_one_to_one(
        &mut self,
        first: ActorRef,
        second: ActorRef,
    ) -> Result<ConversationHandle, RoomError> {
        self.ensure_accepting()?;
        let members = [first.clone(), second.clone()];
        let existing = self
            .ctx
            .store
            .conversation_with_members(
                &[ConversationType::OneToOne, ConversationType::OneToOneFormer],
                &members,
            )
            .await?;
        if let Some(conversation) = existing {
            return self.get_or_load(&conversation.token).await;
        }

        let request = CreateConversation::new(ConversationType::OneToOne, "")
            .with_member(first, ParticipantRole::Owner)
            .with_member(second, ParticipantRole::Owner);
        self.create(request).await
    }

    async fn open_changelog(&mut self, owner: ActorRef) -> Result<ConversationHandle, RoomError> {
        self.ensure_accepting()?;
        let existing = self
            .ctx
            .store
            .conversation_with_members(&[ConversationType::Changelog], std::slice::from_ref(&owner))
            .await?;
        if let Some(conversation) = existing {
            return self.get_or_load(&conversation.token).await;
        }

        let request = CreateConversation::new(ConversationType::Changelog, "Talk updates")
            .with_owner(owner);
        self.create(request).await
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            conversation_count: self.conversations.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self, _deadline: Duration) -> Result<(), RoomError> {
        info!(
            target: "rs.actor.controller",
            conversation_count = self.conversations.len(),
            "Initiating graceful shutdown"
        );
        self.accepting_new = false;
        self.cancel_token.cancel();
        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.conversations.values() {
            managed.handle.cancel();
        }

        for (token, managed) in self.conversations.drain() {
            match tokio::time::timeout(ACTOR_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "rs.actor.controller",
                        token = %token,
                        error = ?e,
                        "Conversation actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rs.actor.controller",
                        token = %token,
                        "Conversation actor shutdown timed out"
                    );
                }
            }
        }
        metrics::set_conversations_loaded(0);

        info!(
            target: "rs.actor.controller",
            "Graceful shutdown complete"
        );
    }

    /// Drop actors whose task has finished. A clean exit means the
    /// conversation was deleted.
    async fn check_conversation_health(&mut self) {
        let finished: Vec<String> = self
            .conversations
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(token, _)| token.clone())
            .collect();
        if finished.is_empty() {
            return;
        }

        for token in finished {
            let Some(managed) = self.conversations.remove(&token) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "rs.actor.controller",
                        token = %token,
                        loaded_for_secs = (self.ctx.clock.now() - managed.loaded_at).num_seconds(),
                        "Conversation actor exited"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "rs.actor.controller",
                        token = %token,
                        error = ?join_error,
                        "Conversation actor panicked"
                    );
                }
                Err(_) => {}
            }
        }
        metrics::set_conversations_loaded(self.conversations.len());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::aggregate::Initiator;
    use crate::events::event_channel;
    use crate::model::Permissions;
    use crate::presets::PresetConfig;
    use crate::store::{MemoryStore, RoomStore};
    use common::clock::SystemClock;

    fn controller() -> (ConversationControllerHandle, RoomContext) {
        let (publisher, _events) = event_channel();
        let ctx = RoomContext::new(
            Arc::new(MemoryStore::new()) as Arc<dyn RoomStore>,
            Arc::new(SystemClock),
            publisher,
            PresetConfig::default(),
            Permissions::DEFAULT,
        );
        let (handle, _task) = ConversationControllerHandle::new(ctx.clone());
        (handle, ctx)
    }

    #[tokio::test]
    async fn test_open_one_to_one_is_idempotent() {
        let (controller, _ctx) = controller();

        let first = controller
            .open_one_to_one(ActorRef::user("alice"), ActorRef::user("bob"))
            .await
            .unwrap();
        let second = controller
            .open_one_to_one(ActorRef::user("bob"), ActorRef::user("alice"))
            .await
            .unwrap();

        assert_eq!(first.token(), second.token());
        assert_eq!(controller.get_status().await.unwrap().conversation_count, 1);
        controller.cancel();
    }

    #[tokio::test]
    async fn test_conversation_loads_from_store() {
        let (controller, ctx) = controller();
        let created = controller
            .create(CreateConversation::new(ConversationType::Group, "Team").with_owner(ActorRef::user("alice")))
            .await
            .unwrap();

        let loaded = controller.conversation(created.token()).await.unwrap();
        assert_eq!(loaded.token(), created.token());

        let unknown = controller.conversation("missing1").await;
        assert!(matches!(unknown, Err(RoomError::ConversationNotFound(_))));
        assert!(ctx.store.conversation_by_token(created.token()).await.is_ok());
        controller.cancel();
    }

    #[tokio::test]
    async fn test_deleted_conversation_is_pruned() {
        let (controller, _ctx) = controller();
        let handle = controller
            .create(CreateConversation::new(ConversationType::Group, "Team").with_owner(ActorRef::user("alice")))
            .await
            .unwrap();

        handle.delete(Initiator::System).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = controller.conversation(handle.token()).await;
        assert!(matches!(result, Err(RoomError::ConversationNotFound(_))));
        assert_eq!(controller.get_status().await.unwrap().conversation_count, 0);
        controller.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (controller, _ctx) = controller();
        let child = controller.child_token();

        controller.shutdown(Duration::from_secs(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(controller.is_cancelled());
        assert!(child.is_cancelled());
    }
}
