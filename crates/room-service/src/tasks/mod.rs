//! Background tasks.
//!
//! # Tasks
//!
//! - `session_sweeper` - Expires sessions past the liveness window and cleans up guests

pub mod session_sweeper;

pub use session_sweeper::{start_session_sweeper, DEFAULT_SWEEP_INTERVAL_SECONDS};
