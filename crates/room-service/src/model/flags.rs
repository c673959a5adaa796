//! Typed bit flags for attendee permissions and session call state.
//!
//! Both types wrap a small integer so they serialize as the same number
//! clients and backends already understand, but all manipulation goes
//! through `has`, `with` and `without`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

macro_rules! flag_ops {
    ($name:ident, $repr:ty, [$(($flag:ident, $label:literal)),+ $(,)?]) => {
        impl $name {
            /// Raw integer value.
            #[must_use]
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Build from raw bits, dropping anything outside the known flags.
            #[must_use]
            pub const fn from_bits_truncate(bits: $repr) -> Self {
                Self(bits & Self::ALL.0)
            }

            /// True when every bit of `other` is set.
            #[must_use]
            pub const fn has(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True when any bit of `other` is set.
            #[must_use]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Copy with the bits of `other` set.
            #[must_use]
            pub const fn with(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            /// Copy with the bits of `other` cleared.
            #[must_use]
            pub const fn without(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            /// True when no bit is set.
            #[must_use]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Names of the set flags, lowest bit first.
            #[must_use]
            pub fn names(self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(
                    if self.has(Self::$flag) && !Self::$flag.is_empty() {
                        names.push($label);
                    }
                )+
                names
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.with(rhs)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let names = self.names();
                if names.is_empty() {
                    write!(f, "{}(0)", stringify!($name))
                } else {
                    write!(f, "{}({})", stringify!($name), names.join(" | "))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Attendee capability mask.
///
/// The `CUSTOM` bit marks a stored mask as an override of the conversation
/// defaults. Without it the stored value carries no meaning and effective
/// permissions are derived from the conversation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u16);

impl Permissions {
    pub const DEFAULT: Self = Self(0);
    pub const CUSTOM: Self = Self(1);
    pub const CALL_START: Self = Self(2);
    pub const CALL_JOIN: Self = Self(4);
    pub const LOBBY_IGNORE: Self = Self(8);
    pub const PUBLISH_AUDIO: Self = Self(16);
    pub const PUBLISH_VIDEO: Self = Self(32);
    pub const PUBLISH_SCREEN: Self = Self(64);
    pub const CHAT: Self = Self(128);
    pub const REACT: Self = Self(256);

    /// Every capability, without the `CUSTOM` marker.
    pub const MAX_DEFAULT: Self = Self(510);
    /// Every capability plus the `CUSTOM` marker.
    pub const MAX_CUSTOM: Self = Self(511);
    const ALL: Self = Self::MAX_CUSTOM;

    /// True when the stored mask overrides conversation defaults.
    #[must_use]
    pub const fn is_custom(self) -> bool {
        self.has(Self::CUSTOM)
    }

    /// True for `DEFAULT` (no bits).
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.is_empty()
    }

    /// The mask with the `CUSTOM` marker removed.
    #[must_use]
    pub const fn capabilities(self) -> Self {
        self.without(Self::CUSTOM)
    }
}

flag_ops!(
    Permissions,
    u16,
    [
        (CUSTOM, "custom"),
        (CALL_START, "call_start"),
        (CALL_JOIN, "call_join"),
        (LOBBY_IGNORE, "lobby_ignore"),
        (PUBLISH_AUDIO, "publish_audio"),
        (PUBLISH_VIDEO, "publish_video"),
        (PUBLISH_SCREEN, "publish_screen"),
        (CHAT, "chat"),
        (REACT, "react"),
    ]
);

/// Call state of a single session, or the union across a conversation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InCallFlags(u8);

impl InCallFlags {
    pub const DISCONNECTED: Self = Self(0);
    pub const IN_CALL: Self = Self(1);
    pub const WITH_AUDIO: Self = Self(2);
    pub const WITH_VIDEO: Self = Self(4);
    pub const WITH_PHONE: Self = Self(8);
    const ALL: Self = Self(15);

    /// True when any call bit is set.
    #[must_use]
    pub const fn is_in_call(self) -> bool {
        !self.is_empty()
    }
}

flag_ops!(
    InCallFlags,
    u8,
    [
        (IN_CALL, "in_call"),
        (WITH_AUDIO, "with_audio"),
        (WITH_VIDEO, "with_video"),
        (WITH_PHONE, "with_phone"),
    ]
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_requires_all_bits() {
        let mask = Permissions::CALL_START.with(Permissions::CHAT);
        assert!(mask.has(Permissions::CHAT));
        assert!(mask.has(Permissions::CALL_START | Permissions::CHAT));
        assert!(!mask.has(Permissions::CHAT | Permissions::REACT));
        assert!(mask.intersects(Permissions::CHAT | Permissions::REACT));
    }

    #[test]
    fn test_without_clears_only_named_bits() {
        let mask = Permissions::MAX_CUSTOM.without(Permissions::PUBLISH_VIDEO);
        assert!(!mask.has(Permissions::PUBLISH_VIDEO));
        assert!(mask.has(Permissions::PUBLISH_AUDIO));
        assert!(mask.is_custom());
    }

    #[test]
    fn test_max_default_excludes_custom() {
        assert!(!Permissions::MAX_DEFAULT.is_custom());
        assert_eq!(Permissions::MAX_DEFAULT.with(Permissions::CUSTOM), Permissions::MAX_CUSTOM);
        assert_eq!(Permissions::MAX_CUSTOM.capabilities(), Permissions::MAX_DEFAULT);
    }

    #[test]
    fn test_from_bits_truncate_drops_unknown_bits() {
        assert_eq!(Permissions::from_bits_truncate(0xFFFF), Permissions::MAX_CUSTOM);
        assert_eq!(InCallFlags::from_bits_truncate(0xFF).bits(), 15);
    }

    #[test]
    fn test_debug_lists_flag_names() {
        let mask = Permissions::CUSTOM | Permissions::CHAT;
        assert_eq!(format!("{mask:?}"), "Permissions(custom | chat)");
        assert_eq!(format!("{:?}", InCallFlags::DISCONNECTED), "InCallFlags(0)");
    }

    #[test]
    fn test_serializes_as_integer() {
        let flags = InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO;
        assert_eq!(serde_json::to_string(&flags).unwrap_or_default(), "3");
        let mask: Permissions = serde_json::from_str("130").unwrap_or_default();
        assert_eq!(mask, Permissions::CALL_START | Permissions::CHAT);
    }

    #[test]
    fn test_in_call() {
        assert!(!InCallFlags::DISCONNECTED.is_in_call());
        assert!(InCallFlags::IN_CALL.is_in_call());
    }
}
