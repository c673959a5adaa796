//! Session record and the liveness window.

use super::flags::InCallFlags;
use chrono::{DateTime, Duration, Utc};
use common::types::{AttendeeId, ConversationId, SessionId};

/// Seconds without a heartbeat after which a session no longer counts as
/// present. Policy constant, not configurable.
pub const LIVENESS_WINDOW_SECONDS: i64 = 60;

/// One connected device of an attendee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub conversation_id: ConversationId,
    pub attendee_id: AttendeeId,
    /// Opaque token supplied by the transport layer.
    pub token: String,
    pub in_call: InCallFlags,
    pub last_heartbeat: DateTime<Utc>,
}

impl Session {
    /// Oldest heartbeat that still counts as live at `now`.
    #[must_use]
    pub fn liveness_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(LIVENESS_WINDOW_SECONDS)
    }

    /// `now - last_heartbeat <= 60s`.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.last_heartbeat >= Self::liveness_cutoff(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_heartbeat(last_heartbeat: DateTime<Utc>) -> Session {
        Session {
            id: SessionId::new(),
            conversation_id: ConversationId::new(),
            attendee_id: AttendeeId::new(),
            token: "tok".to_string(),
            in_call: InCallFlags::DISCONNECTED,
            last_heartbeat,
        }
    }

    #[test]
    fn test_liveness_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(session_with_heartbeat(now - Duration::seconds(60)).is_live_at(now));
        assert!(!session_with_heartbeat(now - Duration::seconds(61)).is_live_at(now));
        assert!(session_with_heartbeat(now).is_live_at(now));
    }
}
