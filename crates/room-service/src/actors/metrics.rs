//! Actor mailbox monitoring.
//!
//! | Actor Type   | Normal | Warning | Critical |
//! |--------------|--------|---------|----------|
//! | Controller   | < 200  | 200-1000| > 1000   |
//! | Conversation | < 50   | 50-200  | > 200    |
//!
//! Depth is counted from the moment a handle enqueues a message until the
//! actor has finished processing it.

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the controller.
pub const CONTROLLER_MAILBOX_NORMAL: usize = 200;
pub const CONTROLLER_MAILBOX_WARNING: usize = 1000;

/// Mailbox depth thresholds for conversation actors.
pub const CONVERSATION_MAILBOX_NORMAL: usize = 50;
pub const CONVERSATION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// ConversationControllerActor (singleton).
    Controller,
    /// ConversationActor (one per loaded conversation).
    Conversation,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Conversation => "conversation",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Controller => CONTROLLER_MAILBOX_WARNING,
            ActorType::Conversation => CONVERSATION_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Controller => CONTROLLER_MAILBOX_NORMAL,
            ActorType::Conversation => CONVERSATION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Queue depth of one actor's mailbox. Shared between the handle, which
/// enqueues, and the actor, which dequeues.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Conversation token, or "controller".
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        })
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), new_depth);

        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "rs.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning
            && new_depth == self.actor_type.normal_threshold() + 1
        {
            debug!(
                target: "rs.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message as processed.
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), previous.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_dequeue_tracks_peak() {
        let monitor = MailboxMonitor::new(ActorType::Conversation, "room1234");

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);

        monitor.record_dequeue();
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 1);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 2);
    }

    #[test]
    fn test_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new(ActorType::Controller, "controller");
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_levels_follow_actor_thresholds() {
        let monitor = MailboxMonitor::new(ActorType::Conversation, "room1234");
        for _ in 0..CONVERSATION_MAILBOX_NORMAL {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_enqueue();
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..CONVERSATION_MAILBOX_WARNING {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }
}
