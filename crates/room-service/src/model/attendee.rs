//! Attendee record, actor types and participant roles.

use super::flags::Permissions;
use super::session::Session;
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{AttendeeId, ConversationId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of actor an attendee represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Group,
    Circle,
    Guest,
    Email,
    Phone,
    FederatedUser,
    Bot,
}

/// What an actor type is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorCapabilities {
    /// Can open sessions (connect devices).
    pub can_connect: bool,
    /// Can hold a moderator role.
    pub can_moderate: bool,
    /// Receives a random access token when added.
    pub needs_access_token: bool,
    /// Lives on a remote instance and is reached through federation.
    pub is_remote: bool,
    /// Included in signaling participant lists.
    pub signaling_visible: bool,
    /// Is a registered local account.
    pub is_local_user: bool,
}

impl ActorType {
    /// Capability table.
    #[must_use]
    pub const fn capabilities(self) -> ActorCapabilities {
        match self {
            ActorType::User => ActorCapabilities {
                can_connect: true,
                can_moderate: true,
                needs_access_token: false,
                is_remote: false,
                signaling_visible: true,
                is_local_user: true,
            },
            ActorType::Guest => ActorCapabilities {
                can_connect: true,
                can_moderate: true,
                needs_access_token: false,
                is_remote: false,
                signaling_visible: true,
                is_local_user: false,
            },
            ActorType::Email | ActorType::Phone => ActorCapabilities {
                can_connect: true,
                can_moderate: true,
                needs_access_token: true,
                is_remote: false,
                signaling_visible: false,
                is_local_user: false,
            },
            ActorType::FederatedUser => ActorCapabilities {
                can_connect: true,
                can_moderate: false,
                needs_access_token: true,
                is_remote: true,
                signaling_visible: false,
                is_local_user: false,
            },
            ActorType::Group | ActorType::Circle => ActorCapabilities {
                can_connect: false,
                can_moderate: false,
                needs_access_token: false,
                is_remote: false,
                signaling_visible: false,
                is_local_user: false,
            },
            ActorType::Bot => ActorCapabilities {
                can_connect: true,
                can_moderate: false,
                needs_access_token: false,
                is_remote: false,
                signaling_visible: false,
                is_local_user: false,
            },
        }
    }

    /// Wire name used by backends.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ActorType::User => "users",
            ActorType::Group => "groups",
            ActorType::Circle => "circles",
            ActorType::Guest => "guests",
            ActorType::Email => "emails",
            ActorType::Phone => "phones",
            ActorType::FederatedUser => "federated_users",
            ActorType::Bot => "bots",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An actor identity, independent of any conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRef {
    pub actor_type: ActorType,
    pub actor_id: String,
}

impl ActorRef {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
        }
    }

    #[must_use]
    pub fn user(actor_id: impl Into<String>) -> Self {
        Self::new(ActorType::User, actor_id)
    }

    #[must_use]
    pub fn guest(actor_id: impl Into<String>) -> Self {
        Self::new(ActorType::Guest, actor_id)
    }

    #[must_use]
    pub fn federated(actor_id: impl Into<String>) -> Self {
        Self::new(ActorType::FederatedUser, actor_id)
    }

    /// Host part of a federated cloud id (`user@host`), if any.
    #[must_use]
    pub fn remote_server(&self) -> Option<&str> {
        if self.actor_type != ActorType::FederatedUser {
            return None;
        }
        self.actor_id
            .rsplit_once('@')
            .map(|(_, host)| host)
            .filter(|host| !host.is_empty())
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.actor_type, self.actor_id)
    }
}

int_enum! {
    /// Role of an attendee within its conversation.
    pub enum ParticipantRole {
        Owner = 1,
        Moderator = 2,
        User = 3,
        Guest = 4,
        UserSelfJoined = 5,
        GuestModerator = 6,
    }
}

impl ParticipantRole {
    /// Owners, moderators and guest moderators.
    #[must_use]
    pub const fn is_moderator(self) -> bool {
        matches!(self, Self::Owner | Self::Moderator | Self::GuestModerator)
    }

    #[must_use]
    pub const fn is_guest(self) -> bool {
        matches!(self, Self::Guest | Self::GuestModerator)
    }
}

/// Durable membership of one actor in one conversation.
#[derive(Debug, Clone)]
pub struct Attendee {
    pub id: AttendeeId,
    pub conversation_id: ConversationId,
    pub actor: ActorRef,
    pub display_name: String,
    pub role: ParticipantRole,
    /// Stored mask. Only meaningful when it carries `Permissions::CUSTOM`.
    pub permissions: Permissions,
    pub last_read_message: u64,
    pub last_mention_message: u64,
    pub last_joined_call: Option<DateTime<Utc>>,
    /// Shared secret for remote and anonymized actors.
    pub access_token: Option<SecretString>,
    /// True when read markers are private.
    pub read_privacy: bool,
    /// Left a one-to-one conversation; retained until the other side leaves.
    pub former: bool,
}

impl Attendee {
    /// New attendee with inherited permissions and nothing read yet.
    #[must_use]
    pub fn new(
        conversation_id: ConversationId,
        actor: ActorRef,
        display_name: impl Into<String>,
        role: ParticipantRole,
    ) -> Self {
        Self {
            id: AttendeeId::new(),
            conversation_id,
            actor,
            display_name: display_name.into(),
            role,
            permissions: Permissions::DEFAULT,
            last_read_message: 0,
            last_mention_message: 0,
            last_joined_call: None,
            access_token: None,
            read_privacy: false,
            former: false,
        }
    }

    #[must_use]
    pub fn is_federated(&self) -> bool {
        self.actor.actor_type.capabilities().is_remote
    }
}

/// An attendee together with the session it is acting through, if any,
/// and its resolved permissions at the time of the call.
#[derive(Debug, Clone)]
pub struct Participant {
    pub attendee: Attendee,
    pub session: Option<Session>,
    pub permissions: Permissions,
}
