//! Shared collaborators handed to every conversation actor.

use crate::attendees::AttendeeRegistry;
use crate::call_state::CallStateAggregator;
use crate::crypto;
use crate::events::EventPublisher;
use crate::model::{Conversation, Permissions};
use crate::permissions::PermissionResolver;
use crate::presets::PresetConfig;
use crate::sessions::SessionTracker;
use crate::store::RoomStore;
use common::clock::Clock;
use std::sync::Arc;

/// Store, clock, event publisher and policy, bundled.
#[derive(Debug, Clone)]
pub struct RoomContext {
    pub store: Arc<dyn RoomStore>,
    pub clock: Arc<dyn Clock>,
    pub events: EventPublisher,
    pub resolver: Arc<PermissionResolver>,
    pub presets: Arc<PresetConfig>,
    /// Read privacy new attendees start with.
    pub default_read_privacy: bool,
    /// bcrypt cost for join passwords.
    pub password_cost: u32,
}

impl RoomContext {
    #[must_use]
    pub fn new(
        store: Arc<dyn RoomStore>,
        clock: Arc<dyn Clock>,
        events: EventPublisher,
        presets: PresetConfig,
        server_default_permissions: Permissions,
    ) -> Self {
        let resolver = PermissionResolver::new(presets.forced.clone(), server_default_permissions);
        Self {
            store,
            clock,
            events,
            resolver: Arc::new(resolver),
            presets: Arc::new(presets),
            default_read_privacy: false,
            password_cost: crypto::DEFAULT_BCRYPT_COST,
        }
    }

    #[must_use]
    pub fn with_default_read_privacy(mut self, private: bool) -> Self {
        self.default_read_privacy = private;
        self
    }

    #[must_use]
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    #[must_use]
    pub fn registry(&self) -> AttendeeRegistry {
        AttendeeRegistry::new(
            Arc::clone(&self.store),
            self.events.clone(),
            self.default_read_privacy,
        )
    }

    #[must_use]
    pub fn tracker(&self) -> SessionTracker {
        SessionTracker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.events.clone(),
        )
    }

    #[must_use]
    pub fn call_state(&self) -> CallStateAggregator {
        CallStateAggregator::new(Arc::clone(&self.store), Arc::clone(&self.clock))
    }

    /// `conversation` as callers observe it.
    #[must_use]
    pub fn effective(&self, conversation: &Conversation) -> Conversation {
        self.presets.forced.effective(conversation)
    }
}
