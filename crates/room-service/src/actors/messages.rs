//! Message types for the actor hierarchy.
//!
//! Every request carries a oneshot `respond_to` channel. Each variant maps
//! to one aggregate operation; the conversation actor processes them one
//! at a time, in arrival order.

use super::conversation::ConversationHandle;
use crate::aggregate::{
    ConversationState, CreateConversation, Initiator, JoinRequest, MessageKind, RoomChange,
};
use crate::attendees::AttendeeSpec;
use crate::errors::RoomError;
use crate::model::{
    ActorRef, Attendee, CallRecording, ConversationType, InCallFlags, LobbyState, Participant,
    Permissions, Session,
};
use crate::permissions::PermissionMethod;
use chrono::{DateTime, Utc};
use common::types::{AttendeeId, SessionId};
use std::time::Duration;
use tokio::sync::oneshot;

/// Reply channel of a request.
pub type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

/// Messages handled by a `ConversationActor`.
#[derive(Debug)]
pub enum ConversationMessage {
    Join {
        request: JoinRequest,
        respond_to: Reply<Participant>,
    },
    Leave {
        attendee_id: AttendeeId,
        respond_to: Reply<()>,
    },
    AddAttendees {
        initiator: Initiator,
        specs: Vec<AttendeeSpec>,
        respond_to: Reply<Vec<Attendee>>,
    },
    RemoveAttendee {
        initiator: Initiator,
        attendee_id: AttendeeId,
        respond_to: Reply<()>,
    },
    /// The remote share behind a federated attendee is gone.
    RemoveRemoteAttendee {
        attendee_id: AttendeeId,
        respond_to: Reply<bool>,
    },
    Promote {
        initiator: Initiator,
        attendee_id: AttendeeId,
        respond_to: Reply<Attendee>,
    },
    Demote {
        initiator: Initiator,
        attendee_id: AttendeeId,
        respond_to: Reply<Attendee>,
    },
    SetPermissions {
        initiator: Initiator,
        attendee_id: AttendeeId,
        method: PermissionMethod,
        mask: Permissions,
        respond_to: Reply<Permissions>,
    },
    Modify {
        initiator: Initiator,
        change: RoomChange,
        respond_to: Reply<()>,
    },
    ChangeType {
        initiator: Initiator,
        room_type: ConversationType,
        respond_to: Reply<()>,
    },
    SetLobby {
        initiator: Initiator,
        state: LobbyState,
        timer: Option<DateTime<Utc>>,
        respond_to: Reply<()>,
    },
    SetDefaultPermissions {
        initiator: Initiator,
        method: PermissionMethod,
        mask: Permissions,
        respond_to: Reply<()>,
    },
    StartRecording {
        initiator: Initiator,
        status: CallRecording,
        respond_to: Reply<()>,
    },
    StopRecording {
        initiator: Initiator,
        respond_to: Reply<()>,
    },
    /// Status reported by the recording backend.
    RecordingStatus {
        status: CallRecording,
        respond_to: Reply<()>,
    },
    ChangeInCall {
        session_id: SessionId,
        flags: InCallFlags,
        respond_to: Reply<Session>,
    },
    Disconnect {
        session_id: SessionId,
        respond_to: Reply<()>,
    },
    /// Stale sessions found by the sweeper.
    ExpireSessions {
        session_ids: Vec<SessionId>,
        respond_to: Reply<usize>,
    },
    MessageSent {
        kind: MessageKind,
        message_id: u64,
        at: DateTime<Utc>,
        respond_to: Reply<()>,
    },
    MarkRead {
        attendee_id: AttendeeId,
        message_id: u64,
        respond_to: Reply<()>,
    },
    MarkMentioned {
        attendee_ids: Vec<AttendeeId>,
        message_id: u64,
        respond_to: Reply<()>,
    },
    EffectivePermissions {
        attendee_id: AttendeeId,
        respond_to: Reply<Permissions>,
    },
    GetState {
        respond_to: Reply<ConversationState>,
    },
    Delete {
        initiator: Initiator,
        respond_to: Reply<()>,
    },
}

/// Messages handled by the `ConversationControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    Create {
        request: CreateConversation,
        respond_to: Reply<ConversationHandle>,
    },
    /// Find or create the one-to-one conversation of two users.
    OpenOneToOne {
        first: ActorRef,
        second: ActorRef,
        respond_to: Reply<ConversationHandle>,
    },
    /// Find or create a user's changelog conversation.
    OpenChangelog {
        owner: ActorRef,
        respond_to: Reply<ConversationHandle>,
    },
    Get {
        token: String,
        respond_to: Reply<ConversationHandle>,
    },
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },
    Shutdown {
        deadline: Duration,
        respond_to: Reply<()>,
    },
}

/// Controller status snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ControllerStatus {
    /// Conversation actors currently running.
    pub conversation_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
