//! Engine wiring: store, clock, actors, event dispatcher, backend listeners
//! and background tasks.
//!
//! ```text
//! callers ──> ConversationControllerHandle ──> ConversationActor ──┐
//!                                                                  │ events
//!   EventDispatcher <──────────────────────────────────────────────┘
//!     ├── SignalingListener  ──> POST {hpb}/api/v1/room/{token}
//!     ├── RecordingListener  ──> POST {recording}/api/v1/room/{token}
//!     └── FederationListener ──> POST {remote}/ocm/notifications
//!
//! session sweeper ──> ConversationActor::expire_sessions
//! ```

use crate::actors::{ConversationControllerHandle, ConversationHandle};
use crate::backend::{
    BackendClass, BackendClient, BackendTransport, FederationListener, HttpTransport,
    RecordingListener, SignalingListener,
};
use crate::config::{BackendEndpoint, Config, DEFAULT_BACKEND_TIMEOUT_SECONDS};
use crate::context::RoomContext;
use crate::crypto::DEFAULT_BCRYPT_COST;
use crate::errors::RoomError;
use crate::events::{event_channel, EventDispatcher, EventListener};
use crate::model::Permissions;
use crate::monitor::Monitor;
use crate::presets::PresetConfig;
use crate::sessions::SessionTracker;
use crate::store::{MemoryStore, RoomStore};
use crate::tasks::start_session_sweeper;
use common::clock::{Clock, SystemClock};
use common::secret::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long shutdown waits for the dispatcher to drain queued events.
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for [`RoomEngine`].
pub struct EngineBuilder {
    server_url: String,
    store: Option<Arc<dyn RoomStore>>,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn BackendTransport>>,
    backend_timeout: Duration,
    signaling: Option<BackendEndpoint>,
    recording: Option<BackendEndpoint>,
    federation_enabled: bool,
    presets: PresetConfig,
    default_permissions: Permissions,
    default_read_privacy: bool,
    password_cost: u32,
    sweep_interval: Option<Duration>,
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EngineBuilder {
    /// `server_url` is the local server, sent as `*-Backend`.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            store: None,
            clock: None,
            transport: None,
            backend_timeout: Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECONDS),
            signaling: None,
            recording: None,
            federation_enabled: false,
            presets: PresetConfig::default(),
            default_permissions: Permissions::DEFAULT,
            default_read_privacy: false,
            password_cost: DEFAULT_BCRYPT_COST,
            sweep_interval: None,
            listeners: Vec::new(),
        }
    }

    /// Everything the configuration defines.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new(config.server_url.clone())
            .with_backend_timeout(config.backend_timeout)
            .with_federation(config.federation_enabled)
            .with_presets(config.presets.clone())
            .with_default_permissions(config.default_permissions)
            .with_default_read_privacy(config.default_read_privacy)
            .with_password_cost(config.password_hash_cost)
            .with_session_sweeper(config.session_sweep_interval);
        builder.signaling = config.signaling.clone();
        builder.recording = config.recording.clone();
        builder
    }

    /// Defaults to an in-memory store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RoomStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to an HTTP transport with the backend timeout.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn BackendTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_signaling(mut self, server: impl Into<String>, secret: impl Into<String>) -> Self {
        self.signaling = Some(BackendEndpoint {
            server: server.into(),
            secret: SecretString::from(secret.into()),
        });
        self
    }

    #[must_use]
    pub fn with_recording(mut self, server: impl Into<String>, secret: impl Into<String>) -> Self {
        self.recording = Some(BackendEndpoint {
            server: server.into(),
            secret: SecretString::from(secret.into()),
        });
        self
    }

    #[must_use]
    pub fn with_federation(mut self, enabled: bool) -> Self {
        self.federation_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_presets(mut self, presets: PresetConfig) -> Self {
        self.presets = presets;
        self
    }

    #[must_use]
    pub fn with_default_permissions(mut self, permissions: Permissions) -> Self {
        self.default_permissions = permissions;
        self
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

    /// Run the session sweeper at `interval`. Off unless set.
    #[must_use]
    pub fn with_session_sweeper(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Additional listener, after the backend listeners.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Spawn the actors and tasks. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// `RoomError::Config` if the HTTP transport cannot be built.
    pub fn build(self) -> Result<RoomEngine, RoomError> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn RoomStore>);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new(self.backend_timeout)
                    .map_err(|e| RoomError::Config(e.to_string()))?,
            ) as Arc<dyn BackendTransport>,
        };

        let (publisher, receiver) = event_channel();
        let ctx = RoomContext::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            publisher,
            self.presets,
            self.default_permissions,
        )
        .with_default_read_privacy(self.default_read_privacy)
        .with_password_cost(self.password_cost);

        let (controller, controller_task) = ConversationControllerHandle::new(ctx.clone());

        let mut dispatcher = EventDispatcher::new(receiver);
        if let Some(signaling) = self.signaling {
            let client = BackendClient::new(
                BackendClass::Signaling,
                Arc::clone(&transport),
                self.server_url.clone(),
            );
            dispatcher.subscribe(Arc::new(SignalingListener::new(
                client,
                &signaling.server,
                signaling.secret,
                Arc::clone(&store),
                Arc::clone(&ctx.resolver),
            )));
        }
        if let Some(recording) = self.recording {
            let client = BackendClient::new(
                BackendClass::Recording,
                Arc::clone(&transport),
                self.server_url.clone(),
            );
            dispatcher.subscribe(Arc::new(RecordingListener::new(
                client,
                &recording.server,
                recording.secret,
            )));
        }
        if self.federation_enabled {
            let client = BackendClient::new(
                BackendClass::Federation,
                Arc::clone(&transport),
                self.server_url.clone(),
            );
            dispatcher.subscribe(Arc::new(FederationListener::new(
                client,
                &self.server_url,
                controller.clone(),
            )));
        }
        for listener in self.listeners {
            dispatcher.subscribe(listener);
        }
        let listeners = dispatcher.listener_count();

        let dispatcher_token = CancellationToken::new();
        let dispatcher_task = tokio::spawn(dispatcher.run(dispatcher_token.clone()));

        let tasks_token = CancellationToken::new();
        let sweeper_task = self.sweep_interval.map(|interval| {
            tokio::spawn(start_session_sweeper(
                ctx.tracker(),
                Arc::clone(&store),
                controller.clone(),
                interval,
                tasks_token.clone(),
            ))
        });

        info!(
            target: "rs.engine",
            listeners,
            sweeper = sweeper_task.is_some(),
            "Room engine started"
        );

        Ok(RoomEngine {
            monitor: Arc::new(Monitor::new(Arc::clone(&store), clock)),
            ctx,
            controller,
            controller_task,
            dispatcher_token,
            dispatcher_task,
            tasks_token,
            sweeper_task,
        })
    }
}

/// A running engine.
pub struct RoomEngine {
    ctx: RoomContext,
    controller: ConversationControllerHandle,
    controller_task: JoinHandle<()>,
    monitor: Arc<Monitor>,
    dispatcher_token: CancellationToken,
    dispatcher_task: JoinHandle<()>,
    tasks_token: CancellationToken,
    sweeper_task: Option<JoinHandle<()>>,
}

impl RoomEngine {
    #[must_use]
    pub fn builder(server_url: impl Into<String>) -> EngineBuilder {
        EngineBuilder::new(server_url)
    }

    /// Entry point for every conversation operation.
    #[must_use]
    pub fn controller(&self) -> &ConversationControllerHandle {
        &self.controller
    }

    /// Handle for `token`, loading the conversation if needed.
    pub async fn conversation(&self, token: &str) -> Result<ConversationHandle, RoomError> {
        self.controller.conversation(token).await
    }

    /// Session presence; heartbeats go through here, not through actors.
    #[must_use]
    pub fn tracker(&self) -> SessionTracker {
        self.ctx.tracker()
    }

    #[must_use]
    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.monitor)
    }

    #[must_use]
    pub fn context(&self) -> &RoomContext {
        &self.ctx
    }

    /// Stop background tasks, shut the actors down, then let the
    /// dispatcher deliver what is still queued.
    pub async fn shutdown(self, deadline: Duration) {
        info!(target: "rs.engine", "Room engine shutting down");

        self.tasks_token.cancel();
        if let Some(sweeper) = self.sweeper_task {
            if let Err(e) = sweeper.await {
                warn!(target: "rs.engine", error = %e, "Session sweeper task failed");
            }
        }

        if let Err(e) = self.controller.shutdown(deadline).await {
            warn!(target: "rs.engine", error = %e, "Actor system shutdown error");
        }
        match tokio::time::timeout(deadline, self.controller_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "rs.engine", error = %e, "Controller task failed"),
            Err(_) => warn!(
                target: "rs.engine",
                timeout_secs = deadline.as_secs(),
                "Actor system did not stop before the deadline"
            ),
        }

        self.dispatcher_token.cancel();
        match tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, self.dispatcher_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "rs.engine", error = %e, "Event dispatcher task failed"),
            Err(_) => warn!(
                target: "rs.engine",
                timeout_secs = DISPATCHER_DRAIN_TIMEOUT.as_secs(),
                "Event dispatcher did not drain in time"
            ),
        }

        info!(target: "rs.engine", "Room engine stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::aggregate::{CreateConversation, JoinRequest};
    use crate::events::DomainEvent;
    use crate::model::{ActorRef, ConversationType};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        kinds: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl EventListener for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn on_event(&self, event: &DomainEvent) {
            self.kinds.lock().unwrap().push(event.kind());
        }
    }

    #[tokio::test]
    async fn test_shutdown_delivers_queued_events() {
        let recorder = Arc::new(Recorder::default());
        let engine = RoomEngine::builder("https://cloud.example.com/")
            .with_listener(Arc::clone(&recorder) as Arc<dyn EventListener>)
            .build()
            .unwrap();

        let room = engine
            .controller()
            .create(CreateConversation::new(ConversationType::Group, "Team").with_owner(ActorRef::user("alice")))
            .await
            .unwrap();
        room.join(JoinRequest::new(ActorRef::user("alice"))).await.unwrap();

        engine.shutdown(Duration::from_secs(1)).await;

        let kinds = recorder.kinds.lock().unwrap().clone();
        assert_eq!(kinds.first(), Some(&"room_created"));
        assert!(kinds.contains(&"session_opened"));
    }

    #[tokio::test]
    async fn test_heartbeat_through_tracker() {
        let engine = RoomEngine::builder("https://cloud.example.com/").build().unwrap();
        let room = engine
            .controller()
            .create(CreateConversation::new(ConversationType::Group, "Team").with_owner(ActorRef::user("alice")))
            .await
            .unwrap();
        let participant = room.join(JoinRequest::new(ActorRef::user("alice"))).await.unwrap();
        let session = participant.session.unwrap();

        engine.tracker().heartbeat(&session.token).await.unwrap();
        let stats = engine.monitor().room_stats(room.token()).await.unwrap();
        assert_eq!(stats.sessions, 1);

        engine.shutdown(Duration::from_secs(1)).await;
    }
}
