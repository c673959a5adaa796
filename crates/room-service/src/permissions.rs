//! Permission resolution.
//!
//! [`resolve`] composes the layers in a fixed order:
//!
//! 1. the conversation default mask, or the server default when the
//!    conversation has none
//! 2. the attendee's custom mask, which replaces (not merges) step 1
//! 3. role grants for owners and moderators
//! 4. the forced preset, bit by bit
//!
//! It is a pure function of its inputs and is re-evaluated on every check.

use crate::model::{Attendee, Conversation, Permissions};
use crate::presets::ForcedPreset;

/// Capabilities moderators hold by role.
pub const MODERATOR_GRANTS: Permissions = Permissions::CALL_START
    .with(Permissions::CALL_JOIN)
    .with(Permissions::LOBBY_IGNORE);

/// What attendees inherit when neither the server nor the conversation
/// configures a default.
pub const SERVER_DEFAULT: Permissions = Permissions::MAX_DEFAULT.without(Permissions::LOBBY_IGNORE);

/// How a permission change combines with the current mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMethod {
    /// Replace the mask.
    Set,
    /// Grant additional bits.
    Add,
    /// Revoke bits.
    Remove,
}

/// Mask an attendee inherits when it has no custom override.
#[must_use]
pub fn inherited(conversation: &Conversation, server_default: Permissions) -> Permissions {
    let base = if conversation.default_permissions.is_default() {
        server_default
    } else {
        conversation.default_permissions
    };
    base.capabilities()
}

/// Effective capabilities of `attendee` in `conversation`.
///
/// The result never carries the `CUSTOM` marker.
#[must_use]
pub fn resolve(
    conversation: &Conversation,
    attendee: &Attendee,
    forced: &ForcedPreset,
    server_default: Permissions,
) -> Permissions {
    let mut mask = if attendee.permissions.is_custom() {
        attendee.permissions.capabilities()
    } else {
        inherited(conversation, server_default)
    };

    if attendee.role.is_moderator() {
        mask = mask.with(MODERATOR_GRANTS);
    }

    if let Some(permissions) = forced.permissions {
        mask = permissions.apply(mask);
    }

    mask.capabilities()
}

/// New stored mask after applying `method` with `change` on top of
/// `current`.
///
/// `Set` with `DEFAULT` clears any override; `Set` with a bare `CUSTOM`
/// stores an override that grants nothing. Every other result is marked
/// `CUSTOM`, so it is stored as an override.
#[must_use]
pub fn apply_change(current: Permissions, method: PermissionMethod, change: Permissions) -> Permissions {
    if method == PermissionMethod::Set && change.is_default() {
        return Permissions::DEFAULT;
    }
    let change = change.capabilities();
    match method {
        PermissionMethod::Set => change.with(Permissions::CUSTOM),
        PermissionMethod::Add => current
            .capabilities()
            .with(change)
            .with(Permissions::CUSTOM),
        PermissionMethod::Remove => current
            .capabilities()
            .without(change)
            .with(Permissions::CUSTOM),
    }
}

/// Resolver bound to the server configuration, so callers only pass the
/// per-call inputs.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    forced: ForcedPreset,
    server_default: Permissions,
}

impl PermissionResolver {
    /// `server_default` of `DEFAULT` means every capability except
    /// bypassing the lobby.
    #[must_use]
    pub fn new(forced: ForcedPreset, server_default: Permissions) -> Self {
        let server_default = if server_default.capabilities().is_default() {
            SERVER_DEFAULT
        } else {
            server_default.capabilities()
        };
        Self {
            forced,
            server_default,
        }
    }

    #[must_use]
    pub fn resolve(&self, conversation: &Conversation, attendee: &Attendee) -> Permissions {
        resolve(conversation, attendee, &self.forced, self.server_default)
    }

    /// The mask attendees without an override start from.
    #[must_use]
    pub fn inherited(&self, conversation: &Conversation) -> Permissions {
        inherited(conversation, self.server_default)
    }

    #[must_use]
    pub fn forced(&self) -> &ForcedPreset {
        &self.forced
    }
}
