//! Domain model: conversations, attendees, sessions and their flag types.

/// Declares a fieldless enum backed by a stable integer code, with
/// `as_int`/`from_int` conversions for configuration and wire payloads.
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            /// Stable integer code.
            #[must_use]
            pub const fn as_int(self) -> i64 {
                self as i64
            }

            /// Parse a stable integer code.
            #[must_use]
            pub const fn from_int(value: i64) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

pub mod attendee;
pub mod conversation;
pub mod flags;
pub mod session;

pub use attendee::{ActorCapabilities, ActorRef, ActorType, Attendee, ParticipantRole, Participant};
pub use conversation::{
    CallRecording, Conversation, ConversationLifecycle, ConversationType, Listable, LobbyState,
    MentionPermissions, ReadOnlyState, RecordingConsent, SipState,
};
pub use flags::{InCallFlags, Permissions};
pub use session::{Session, LIVENESS_WINDOW_SECONDS};
