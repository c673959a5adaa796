//! # Room Test Utilities
//!
//! Shared test utilities for the room service.
//!
//! ## Modules
//!
//! - `mock_transport` - Scripted, recording backend transport
//! - `event_log` - Listener recording every dispatched event
//! - `fixtures` - Actors, conversations and backend endpoints
//! - `harness` - `TestEngine`, a running engine wired to the above
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let t = TestEngine::start();
//!     let room = t.create(group("Team", "alice")).await;
//!
//!     room.join(JoinRequest::new(user("alice"))).await.unwrap();
//!     t.events().wait_for("session_opened").await;
//!
//!     t.shutdown().await;
//! }
//! ```

pub mod event_log;
pub mod fixtures;
pub mod harness;
pub mod mock_transport;

pub use event_log::EventLog;
pub use fixtures::*;
pub use harness::TestEngine;
pub use mock_transport::MockTransport;
