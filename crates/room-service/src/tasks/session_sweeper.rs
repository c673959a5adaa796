//! Session sweeper background task.
//!
//! Periodically asks the store for sessions past the liveness window and
//! hands them, grouped by conversation, to the owning conversation actor.
//! The actor re-checks liveness before closing, so a heartbeat that lands
//! between the query and the close keeps its session.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered, after the
//! current iteration completes.

use crate::actors::ConversationControllerHandle;
use crate::errors::RoomError;
use crate::sessions::SessionTracker;
use crate::store::RoomStore;
use common::types::{ConversationId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// Start the session sweeper. Returns when `cancel_token` is cancelled.
#[instrument(skip_all, name = "rs.task.session_sweeper")]
pub async fn start_session_sweeper(
    tracker: SessionTracker,
    store: Arc<dyn RoomStore>,
    controller: ConversationControllerHandle,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "rs.task.session_sweeper",
        interval_seconds = interval.as_secs(),
        "Starting session sweeper"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_sweep(&tracker, store.as_ref(), &controller).await {
                    warn!(
                        target: "rs.task.session_sweeper",
                        error = %e,
                        "Session sweep failed"
                    );
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "rs.task.session_sweeper",
                    "Session sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "rs.task.session_sweeper", "Session sweeper stopped");
}

/// One sweep. Returns the number of sessions closed.
///
/// A conversation that cannot be reached is skipped; the remaining groups
/// are still processed.
pub(crate) async fn run_sweep(
    tracker: &SessionTracker,
    store: &dyn RoomStore,
    controller: &ConversationControllerHandle,
) -> Result<usize, RoomError> {
    let stale = tracker.sweep().await?;
    if stale.is_empty() {
        return Ok(0);
    }

    let mut by_conversation: HashMap<ConversationId, Vec<SessionId>> = HashMap::new();
    for session in stale {
        by_conversation
            .entry(session.conversation_id)
            .or_default()
            .push(session.id);
    }

    let mut closed = 0;
    for (conversation_id, session_ids) in by_conversation {
        let result = async {
            let conversation = store.conversation(conversation_id).await?;
            let handle = controller.conversation(&conversation.token).await?;
            handle.expire_sessions(session_ids).await
        }
        .await;

        match result {
            Ok(count) => closed += count,
            Err(RoomError::ConversationNotFound(_)) => {
                debug!(
                    target: "rs.task.session_sweeper",
                    conversation_id = %conversation_id,
                    "Conversation gone before its sessions were swept"
                );
            }
            Err(e) => {
                warn!(
                    target: "rs.task.session_sweeper",
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to expire sessions"
                );
            }
        }
    }

    if closed > 0 {
        info!(
            target: "rs.task.session_sweeper",
            closed,
            "Expired stale sessions"
        );
    }
    Ok(closed)
}
