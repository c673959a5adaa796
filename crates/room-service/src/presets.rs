//! Default and forced conversation presets.
//!
//! The default preset fills in creation-time values the caller did not
//! request. The forced preset overrides stored values on every read-back
//! and on every permission resolution. Room type, read-only, lobby and
//! recording consent have no field in [`ForcedPreset`], so they can never be
//! forced.

use crate::model::{
    Conversation, ConversationType, Listable, LobbyState, MentionPermissions, Permissions,
    ReadOnlyState, RecordingConsent, SipState,
};

/// Forced override for individual permission bits.
///
/// Bits in `defined` are set to their value in `value` no matter what the
/// conversation or attendee says. Bits outside `defined` pass through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionOverride {
    defined: Permissions,
    value: Permissions,
}

impl PermissionOverride {
    /// Force the whole capability set to exactly `mask`.
    #[must_use]
    pub const fn exact(mask: Permissions) -> Self {
        Self {
            defined: Permissions::MAX_DEFAULT,
            value: mask.capabilities(),
        }
    }

    /// Force `bits` on.
    #[must_use]
    pub const fn grant(self, bits: Permissions) -> Self {
        let bits = bits.capabilities();
        Self {
            defined: self.defined.with(bits),
            value: self.value.with(bits),
        }
    }

    /// Force `bits` off.
    #[must_use]
    pub const fn deny(self, bits: Permissions) -> Self {
        let bits = bits.capabilities();
        Self {
            defined: self.defined.with(bits),
            value: self.value.without(bits),
        }
    }

    /// Bits this override pins.
    #[must_use]
    pub const fn defined(self) -> Permissions {
        self.defined
    }

    /// True when `bits` are pinned to off.
    #[must_use]
    pub const fn strips(self, bits: Permissions) -> bool {
        self.defined.has(bits) && !self.value.intersects(bits)
    }

    /// Apply to a mask.
    #[must_use]
    pub const fn apply(self, mask: Permissions) -> Permissions {
        mask.without(self.defined).with(self.value)
    }

    /// Parse either an integer (exact mask) or a comma separated list of
    /// `+name` / `-name` entries, e.g. `+chat,-react`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Ok(bits) = raw.parse::<u16>() {
            return Ok(Self::exact(Permissions::from_bits_truncate(bits)));
        }

        let mut result = Self::default();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (grant, name) = if let Some(name) = entry.strip_prefix('+') {
                (true, name)
            } else if let Some(name) = entry.strip_prefix('-') {
                (false, name)
            } else {
                return Err(format!("expected +name or -name, got '{entry}'"));
            };
            let bit = permission_by_name(name)
                .ok_or_else(|| format!("unknown permission '{name}'"))?;
            result = if grant {
                result.grant(bit)
            } else {
                result.deny(bit)
            };
        }
        Ok(result)
    }
}

fn permission_by_name(name: &str) -> Option<Permissions> {
    let bit = match name {
        "call_start" => Permissions::CALL_START,
        "call_join" => Permissions::CALL_JOIN,
        "lobby_ignore" => Permissions::LOBBY_IGNORE,
        "publish_audio" => Permissions::PUBLISH_AUDIO,
        "publish_video" => Permissions::PUBLISH_VIDEO,
        "publish_screen" => Permissions::PUBLISH_SCREEN,
        "chat" => Permissions::CHAT,
        "react" => Permissions::REACT,
        _ => return None,
    };
    Some(bit)
}

/// Creation-time defaults. Any field may be left unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultPreset {
    pub room_type: Option<ConversationType>,
    pub read_only: Option<ReadOnlyState>,
    pub lobby: Option<LobbyState>,
    pub recording_consent: Option<RecordingConsent>,
    pub listable: Option<Listable>,
    pub message_expiration: Option<u32>,
    pub sip: Option<SipState>,
    pub permissions: Option<Permissions>,
    pub mention_permissions: Option<MentionPermissions>,
}

/// Forced values for the forceable subset of parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForcedPreset {
    pub listable: Option<Listable>,
    pub message_expiration: Option<u32>,
    pub sip: Option<SipState>,
    pub permissions: Option<PermissionOverride>,
    pub mention_permissions: Option<MentionPermissions>,
}

impl ForcedPreset {
    /// Overwrite the forced fields of a conversation in place.
    ///
    /// Permission overrides are applied at resolution time instead, because
    /// they act on the composed mask rather than on the stored default.
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(listable) = self.listable {
            conversation.listable = listable;
        }
        if let Some(expiration) = self.message_expiration {
            conversation.message_expiration = expiration;
        }
        if let Some(sip) = self.sip {
            conversation.sip = sip;
        }
        if let Some(mention) = self.mention_permissions {
            conversation.mention_permissions = mention;
        }
    }

    /// Copy of `conversation` as callers should observe it.
    #[must_use]
    pub fn effective(&self, conversation: &Conversation) -> Conversation {
        let mut effective = conversation.clone();
        self.apply_to(&mut effective);
        effective
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Both preset layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetConfig {
    pub defaults: DefaultPreset,
    pub forced: ForcedPreset,
}
