//! Observability for the room service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Metric labels are bounded; conversation tokens and actor ids never
//! appear as labels.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `rs_conversations_loaded` | Gauge | none |
//! | `rs_actor_mailbox_depth` | Gauge | `actor_type` |
//! | `rs_events_dispatched_total` | Counter | `event` |
//! | `rs_sessions_expired_total` | Counter | none |
//! | `rs_federation_attendees_removed_total` | Counter | none |
//! | `rs_backend_requests_total` | Counter | `backend`, `outcome` |
//! | `rs_backend_request_duration_seconds` | Histogram | `backend` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
