//! Domain events and their delivery.
//!
//! Conversation actors publish one [`DomainEvent`] per committed mutation
//! onto a single unbounded channel. One [`EventDispatcher`] task drains that
//! channel and hands every event to every registered [`EventListener`], in
//! publish order. Listener failures stay on this path and never reach the
//! caller of the mutation.

use crate::model::{
    ActorRef, Attendee, Conversation, InCallFlags, LobbyState, Session,
};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Old or new value of a changed property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Conversation property named in [`DomainEvent::RoomModified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomProperty {
    Name,
    Description,
    Type,
    ReadOnly,
    Listable,
    SipEnabled,
    MessageExpiration,
    MentionPermissions,
    RecordingConsent,
    Password,
    DefaultPermissions,
    CallRecording,
}

impl RoomProperty {
    /// Property name as remote servers know it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Type => "type",
            Self::ReadOnly => "readOnly",
            Self::Listable => "listable",
            Self::SipEnabled => "sipEnabled",
            Self::MessageExpiration => "messageExpiration",
            Self::MentionPermissions => "mentionPermissions",
            Self::RecordingConsent => "recordingConsent",
            Self::Password => "password",
            Self::DefaultPermissions => "defaultPermissions",
            Self::CallRecording => "callRecording",
        }
    }
}

/// Attendee property named in [`DomainEvent::ParticipantModified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantProperty {
    Role,
    Permissions,
    InCall,
}

impl ParticipantProperty {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Role => "participantType",
            Self::Permissions => "permissions",
            Self::InCall => "inCall",
        }
    }
}

/// Why attendees were removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Removed by a moderator.
    Removed,
    /// Left on their own.
    Left,
    /// Dropped because the conversation stopped admitting them.
    TypeChanged,
    /// Guest without any session left.
    GuestsCleaned,
    /// The remote share no longer exists.
    RemoteGone,
}

impl RemovalReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Removed => "removed",
            Self::Left => "left",
            Self::TypeChanged => "type_changed",
            Self::GuestsCleaned => "guests_cleaned",
            Self::RemoteGone => "remote_gone",
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionCloseReason {
    Disconnected,
    Expired,
}

/// A committed state change.
///
/// Every variant carries the conversation as callers observe it (forced
/// preset applied) at the moment the change was committed.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    RoomCreated {
        conversation: Conversation,
    },
    RoomModified {
        conversation: Conversation,
        property: RoomProperty,
        old: PropertyValue,
        new: PropertyValue,
        /// Who made the change, if it was not the system.
        actor: Option<ActorRef>,
        /// Federated attendees as of the change.
        federated: Vec<Attendee>,
    },
    LobbyModified {
        conversation: Conversation,
        old: LobbyState,
        new: LobbyState,
        timer: Option<DateTime<Utc>>,
        /// The lobby opened because its timer passed.
        timer_reached: bool,
    },
    AttendeesAdded {
        conversation: Conversation,
        attendees: Vec<Attendee>,
    },
    AttendeesRemoved {
        conversation: Conversation,
        attendees: Vec<Attendee>,
        /// Sessions closed by the cascade.
        sessions: Vec<Session>,
        reason: RemovalReason,
    },
    ParticipantModified {
        conversation: Conversation,
        /// The attendee after the change.
        attendee: Attendee,
        /// The session the change applies to, for per-session properties.
        session: Option<Session>,
        property: ParticipantProperty,
        old: PropertyValue,
        new: PropertyValue,
    },
    SessionOpened {
        conversation: Conversation,
        attendee: Attendee,
        session: Session,
    },
    SessionClosed {
        conversation: Conversation,
        attendee: Attendee,
        session: Session,
        reason: SessionCloseReason,
        /// The attendee still has another live session.
        attendee_present: bool,
        /// Conversation call flags after the close.
        call_flags: InCallFlags,
    },
    BeforeRoomDeleted {
        conversation: Conversation,
        attendees: Vec<Attendee>,
        sessions: Vec<Session>,
    },
    RoomDeleted {
        conversation: Conversation,
    },
}

impl DomainEvent {
    /// Event name for logs and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RoomCreated { .. } => "room_created",
            Self::RoomModified { .. } => "room_modified",
            Self::LobbyModified { .. } => "lobby_modified",
            Self::AttendeesAdded { .. } => "attendees_added",
            Self::AttendeesRemoved { .. } => "attendees_removed",
            Self::ParticipantModified { .. } => "participant_modified",
            Self::SessionOpened { .. } => "session_opened",
            Self::SessionClosed { .. } => "session_closed",
            Self::BeforeRoomDeleted { .. } => "before_room_deleted",
            Self::RoomDeleted { .. } => "room_deleted",
        }
    }

    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        match self {
            Self::RoomCreated { conversation }
            | Self::RoomModified { conversation, .. }
            | Self::LobbyModified { conversation, .. }
            | Self::AttendeesAdded { conversation, .. }
            | Self::AttendeesRemoved { conversation, .. }
            | Self::ParticipantModified { conversation, .. }
            | Self::SessionOpened { conversation, .. }
            | Self::SessionClosed { conversation, .. }
            | Self::BeforeRoomDeleted { conversation, .. }
            | Self::RoomDeleted { conversation } => conversation,
        }
    }
}

/// Receiving side of the event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<DomainEvent>;

/// Create a connected publisher and receiver.
#[must_use]
pub fn event_channel() -> (EventPublisher, EventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventPublisher { sender }, receiver)
}

/// Sending side of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::UnboundedSender<DomainEvent>,
}

impl EventPublisher {
    /// Publish an event. Never blocks.
    ///
    /// When the dispatcher is gone (shutdown) the event is dropped with a
    /// warning; the mutation it describes is already committed.
    pub fn publish(&self, event: DomainEvent) {
        let kind = event.kind();
        if self.sender.send(event).is_err() {
            warn!(
                target: "rs.events",
                event = kind,
                "Event dispatcher gone, dropping event"
            );
        }
    }
}

/// Consumer of domain events.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handle one event. Errors are the listener's own business.
    async fn on_event(&self, event: &DomainEvent);
}

/// Delivers events to listeners in publish order.
pub struct EventDispatcher {
    receiver: EventReceiver,
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(receiver: EventReceiver) -> Self {
        Self {
            receiver,
            listeners: Vec::new(),
        }
    }

    /// Register a listener. Listeners see each event in registration order.
    pub fn subscribe(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Run until cancelled or until every publisher is dropped.
    ///
    /// On cancellation, events already queued are still delivered.
    #[instrument(skip_all, name = "rs.events.dispatcher", fields(listeners = self.listeners.len()))]
    pub async fn run(mut self, cancel_token: CancellationToken) {
        info!(
            target: "rs.events",
            listeners = self.listeners.len(),
            "Event dispatcher started"
        );

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    let mut drained = 0usize;
                    while let Ok(event) = self.receiver.try_recv() {
                        self.deliver(&event).await;
                        drained += 1;
                    }
                    info!(
                        target: "rs.events",
                        drained,
                        "Event dispatcher received cancellation signal"
                    );
                    break;
                }

                event = self.receiver.recv() => {
                    match event {
                        Some(event) => self.deliver(&event).await,
                        None => {
                            info!(
                                target: "rs.events",
                                "Event channel closed, dispatcher exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn deliver(&self, event: &DomainEvent) {
        debug!(
            target: "rs.events",
            event = event.kind(),
            token = %event.conversation().token,
            "Dispatching event"
        );
        for listener in &self.listeners {
            listener.on_event(event).await;
        }
        metrics::record_event_dispatched(event.kind());
    }
}
