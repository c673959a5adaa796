//! Event listener that records every dispatched event.
//!
//! Registered after the backend listeners, so once the log has seen an
//! event every backend notification for it has already been sent.

use async_trait::async_trait;
use room_service::events::{DomainEvent, EventListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// How long `wait_for` waits before failing the test.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<DomainEvent>>,
    notify: Notify,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(DomainEvent::kind).collect()
    }

    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// Wait until `count` events of `kind` were dispatched.
    ///
    /// # Panics
    ///
    /// Panics when they do not arrive within [`DEFAULT_WAIT`].
    pub async fn wait_for_count(&self, kind: &str, count: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.count(kind) >= count {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(DEFAULT_WAIT, wait).await.is_err() {
            panic!(
                "timed out waiting for {count} '{kind}' events, saw {:?}",
                self.kinds()
            );
        }
    }

    /// Wait until at least one event of `kind` was dispatched.
    pub async fn wait_for(&self, kind: &str) {
        self.wait_for_count(kind, 1).await;
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventListener for EventLog {
    fn name(&self) -> &'static str {
        "event_log"
    }

    async fn on_event(&self, event: &DomainEvent) {
        self.events.lock().unwrap().push(event.clone());
        self.notify.notify_waiters();
    }
}
