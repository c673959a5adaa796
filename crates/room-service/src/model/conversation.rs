//! Conversation (room) record and its state enums.

use super::flags::Permissions;
use chrono::{DateTime, Utc};
use common::types::ConversationId;

int_enum! {
    /// Conversation type.
    pub enum ConversationType {
        OneToOne = 1,
        Group = 2,
        Public = 3,
        Changelog = 4,
        /// A one-to-one conversation one side has left.
        OneToOneFormer = 5,
    }
}

impl ConversationType {
    /// Group and public conversations can be configured freely. The other
    /// types have fixed membership or are system-owned.
    #[must_use]
    pub const fn is_group_like(self) -> bool {
        matches!(self, Self::Group | Self::Public)
    }

    #[must_use]
    pub const fn is_one_to_one(self) -> bool {
        matches!(self, Self::OneToOne | Self::OneToOneFormer)
    }
}

int_enum! {
    pub enum ReadOnlyState {
        ReadWrite = 0,
        ReadOnly = 1,
    }
}

int_enum! {
    /// Who can discover the conversation without an invitation.
    pub enum Listable {
        None = 0,
        Users = 1,
        All = 2,
    }
}

int_enum! {
    pub enum LobbyState {
        None = 0,
        NonModerators = 1,
    }
}

int_enum! {
    /// SIP dial-in.
    pub enum SipState {
        Disabled = 0,
        Enabled = 1,
        EnabledNoPin = 2,
    }
}

int_enum! {
    /// Who may mention everyone in the conversation.
    pub enum MentionPermissions {
        Everyone = 0,
        Moderators = 1,
    }
}

int_enum! {
    pub enum RecordingConsent {
        Off = 0,
        Required = 1,
        Optional = 2,
    }
}

int_enum! {
    /// Call recording status as reported to the recording backend.
    pub enum CallRecording {
        Stopped = 0,
        Video = 1,
        Audio = 2,
        StartingVideo = 3,
        StartingAudio = 4,
        Failed = 5,
    }
}

impl CallRecording {
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Per-conversation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationLifecycle {
    /// Created, nobody has joined or been added yet.
    Created,
    /// Has or had members.
    Active,
    /// One-to-one conversation where one side has left.
    SoftRetired,
    /// Destroyed. Only ever observed on snapshots taken during deletion.
    Deleted,
}

/// Conversation record.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    /// Public handle used in URLs and backend notifications.
    pub token: String,
    pub room_type: ConversationType,
    pub name: String,
    pub description: String,
    pub read_only: ReadOnlyState,
    pub listable: Listable,
    pub lobby: LobbyState,
    /// When set, the lobby opens automatically at this instant.
    pub lobby_timer: Option<DateTime<Utc>>,
    pub sip: SipState,
    /// Seconds until chat messages expire, 0 for never.
    pub message_expiration: u32,
    pub recording_consent: RecordingConsent,
    pub mention_permissions: MentionPermissions,
    /// Conversation-wide default capabilities. `DEFAULT` defers to the
    /// server default.
    pub default_permissions: Permissions,
    /// bcrypt hash of the join password, public conversations only.
    pub password_hash: Option<String>,
    pub call_recording: CallRecording,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_message_id: u64,
    pub lifecycle: ConversationLifecycle,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// A fresh conversation with every setting at its neutral value.
    #[must_use]
    pub fn new(token: impl Into<String>, room_type: ConversationType, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::new(),
            token: token.into(),
            room_type,
            name: String::new(),
            description: String::new(),
            read_only: ReadOnlyState::ReadWrite,
            listable: Listable::None,
            lobby: LobbyState::None,
            lobby_timer: None,
            sip: SipState::Disabled,
            message_expiration: 0,
            recording_consent: RecordingConsent::Off,
            mention_permissions: MentionPermissions::Everyone,
            default_permissions: Permissions::DEFAULT,
            password_hash: None,
            call_recording: CallRecording::Stopped,
            last_activity: None,
            last_message_id: 0,
            lifecycle: ConversationLifecycle::Created,
            created_at,
        }
    }

    /// True when a lobby is configured and its timer has not yet passed.
    #[must_use]
    pub fn lobby_active(&self, now: DateTime<Utc>) -> bool {
        self.lobby == LobbyState::NonModerators && !self.lobby_timer_reached(now)
    }

    /// True when a lobby timer is set and lies in the past.
    #[must_use]
    pub fn lobby_timer_reached(&self, now: DateTime<Utc>) -> bool {
        self.lobby_timer.is_some_and(|timer| timer <= now)
    }

    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only == ReadOnlyState::ReadOnly
    }
}
