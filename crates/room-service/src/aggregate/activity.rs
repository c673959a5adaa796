//! Chat activity bookkeeping. Nothing here publishes events.

use super::ConversationAggregate;
use crate::errors::RoomError;
use chrono::{DateTime, Utc};
use common::types::AttendeeId;

/// Origin of a message reported by the chat layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    System,
}

impl ConversationAggregate {
    /// Record a posted message. Ids only ever move forward.
    pub async fn message_sent(
        &mut self,
        kind: MessageKind,
        message_id: u64,
        at: DateTime<Utc>,
    ) -> Result<(), RoomError> {
        self.ensure_alive()?;
        if kind == MessageKind::Chat {
            self.ensure_filled().await?;
        }
        self.conversation.last_message_id = self.conversation.last_message_id.max(message_id);
        if self.conversation.last_activity.map_or(true, |last| last < at) {
            self.conversation.last_activity = Some(at);
        }
        self.persist().await
    }

    pub async fn mark_read(&mut self, attendee_id: AttendeeId, message_id: u64) -> Result<(), RoomError> {
        self.ensure_alive()?;
        let mut attendee = self.registry.find(self.conversation.id, attendee_id).await?;
        if attendee.last_read_message == message_id {
            return Ok(());
        }
        attendee.last_read_message = message_id;
        self.registry.persist(&attendee).await
    }

    /// Record a mention for each attendee. Unknown ids are skipped.
    pub async fn mark_mentioned(&mut self, attendee_ids: &[AttendeeId], message_id: u64) -> Result<(), RoomError> {
        self.ensure_alive()?;
        for id in attendee_ids {
            let mut attendee = match self.registry.find(self.conversation.id, *id).await {
                Ok(attendee) => attendee,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if message_id > attendee.last_mention_message {
                attendee.last_mention_message = message_id;
                self.registry.persist(&attendee).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::Harness;
    use super::super::CreateConversation;
    use super::*;
    use crate::model::{ActorRef, ConversationType, ParticipantRole};
    use crate::store::RoomStore;
    use chrono::Duration;
    use common::clock::Clock;

    #[tokio::test]
    async fn test_message_sent_never_moves_backwards() {
        let mut h = Harness::new();
        let (mut aggregate, _, _) = h.group().await;
        let now = h.clock.now();

        aggregate.message_sent(MessageKind::Chat, 10, now).await.unwrap();
        aggregate
            .message_sent(MessageKind::System, 7, now - Duration::minutes(1))
            .await
            .unwrap();

        let stored = h.store.conversation_by_token(aggregate.token()).await.unwrap();
        assert_eq!(stored.last_message_id, 10);
        assert_eq!(stored.last_activity, Some(now));
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_read_and_mention_markers() {
        let mut h = Harness::new();
        let (mut aggregate, alice, bob) = h.group().await;

        aggregate.mark_read(alice.id, 5).await.unwrap();
        aggregate.mark_mentioned(&[bob.id, AttendeeId::new()], 8).await.unwrap();
        aggregate.mark_mentioned(&[bob.id], 3).await.unwrap();

        assert_eq!(h.store.attendee(alice.id).await.unwrap().last_read_message, 5);
        assert_eq!(h.store.attendee(bob.id).await.unwrap().last_mention_message, 8);
    }

    #[tokio::test]
    async fn test_chat_message_refills_former_one_to_one() {
        let mut h = Harness::new();
        let request = CreateConversation::new(ConversationType::OneToOne, "")
            .with_member(ActorRef::user("alice"), ParticipantRole::Owner)
            .with_member(ActorRef::user("bob"), ParticipantRole::Owner);
        let mut aggregate = ConversationAggregate::create(h.ctx.clone(), request)
            .await
            .unwrap();
        let alice = h
            .store
            .attendee_by_actor(aggregate.conversation().id, &ActorRef::user("alice"))
            .await
            .unwrap();
        aggregate.leave(alice.id).await.unwrap();
        h.drain();

        aggregate
            .message_sent(MessageKind::Chat, 1, h.clock.now())
            .await
            .unwrap();

        assert_eq!(aggregate.conversation().room_type, ConversationType::OneToOne);
        assert!(!h.store.attendee(alice.id).await.unwrap().former);
        assert_eq!(h.kinds(), vec!["attendees_added"]);
    }
}
