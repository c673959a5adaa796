//! Test harness for engine-level tests.
//!
//! Provides `TestEngine`: a running [`RoomEngine`] on an in-memory store,
//! a manual clock and a [`MockTransport`], with every backend listener
//! enabled and an [`EventLog`] registered last.

use crate::event_log::EventLog;
use crate::fixtures::{
    RECORDING_SECRET, RECORDING_SERVER, SERVER_URL, SIGNALING_SECRET, SIGNALING_SERVER,
};
use crate::mock_transport::MockTransport;
use common::clock::ManualClock;
use room_service::actors::{ConversationControllerHandle, ConversationHandle};
use room_service::aggregate::CreateConversation;
use room_service::crypto::MIN_BCRYPT_COST;
use room_service::events::EventListener;
use room_service::{EngineBuilder, RoomEngine};
use std::sync::Arc;
use std::time::Duration;

/// Test harness wrapping a running engine.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_invite_notifies_signaling() {
///     let t = TestEngine::start();
///     let room = t.create(group_with("Team", "alice", &["bob"])).await;
///     t.events().wait_for("attendees_added").await;
///
///     assert!(t.transport().message_types(BackendClass::Signaling).contains(&"invite".into()));
///     t.shutdown().await;
/// }
/// ```
pub struct TestEngine {
    engine: RoomEngine,
    clock: ManualClock,
    transport: MockTransport,
    events: Arc<EventLog>,
}

impl TestEngine {
    /// Engine with signaling, recording and federation enabled, answering
    /// every backend request with 200.
    #[must_use]
    pub fn start() -> Self {
        Self::start_with(MockTransport::new(), |builder| builder)
    }

    /// Engine using `transport`, with extra builder configuration.
    ///
    /// # Panics
    ///
    /// Panics if the engine cannot be built.
    #[must_use]
    pub fn start_with(
        transport: MockTransport,
        configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Self {
        let clock = ManualClock::starting_now();
        let events = EventLog::new();

        let builder = RoomEngine::builder(SERVER_URL)
            .with_clock(Arc::new(clock.clone()))
            .with_transport(Arc::new(transport.clone()))
            .with_signaling(SIGNALING_SERVER, SIGNALING_SECRET)
            .with_recording(RECORDING_SERVER, RECORDING_SECRET)
            .with_federation(true)
            .with_password_cost(MIN_BCRYPT_COST);
        let engine = configure(builder)
            .with_listener(Arc::clone(&events) as Arc<dyn EventListener>)
            .build()
            .expect("engine should start");

        Self {
            engine,
            clock,
            transport,
            events,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &RoomEngine {
        &self.engine
    }

    #[must_use]
    pub fn controller(&self) -> &ConversationControllerHandle {
        self.engine.controller()
    }

    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    #[must_use]
    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Create a conversation and wait until its creation was dispatched.
    ///
    /// # Panics
    ///
    /// Panics if creation fails.
    pub async fn create(&self, request: CreateConversation) -> ConversationHandle {
        let before = self.events.count("room_created");
        let handle = self
            .engine
            .controller()
            .create(request)
            .await
            .expect("conversation should be created");
        self.events.wait_for_count("room_created", before + 1).await;
        handle
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }

    pub async fn shutdown(self) {
        self.engine.shutdown(Duration::from_secs(5)).await;
    }
}
