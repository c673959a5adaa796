//! Room Service Library
//!
//! Conversation membership and presence engine:
//!
//! - Attendee registry: which actors belong to a conversation, with roles
//!   and permission overrides
//! - Session tracker: connected devices, heartbeats and the 60 second
//!   liveness window
//! - Permission resolution from conversation defaults, forced presets and
//!   per-attendee overrides
//! - Call state aggregated from live sessions
//! - Signed, retried notifications to signaling, recording and federated
//!   backends
//!
//! # Architecture
//!
//! ```text
//! ConversationControllerActor (singleton)
//! └── ConversationActor (one per loaded conversation)
//!     └── ConversationAggregate ──> DomainEvent ──> EventDispatcher ──> listeners
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Conversation actors and their supervisor
//! - [`aggregate`] - Conversation aggregate: the mutation operations
//! - [`backend`] - Signed backend notifications
//! - [`config`] - Service configuration from environment
//! - [`engine`] - Wires everything together
//! - [`errors`] - Error types with appropriate error codes

pub mod actors;
pub mod aggregate;
pub mod attendees;
pub mod backend;
pub mod call_state;
pub mod config;
pub mod context;
pub mod crypto;
pub mod engine;
pub mod errors;
pub mod events;
pub mod model;
pub mod monitor;
pub mod observability;
pub mod permissions;
pub mod presets;
pub mod routes;
pub mod sessions;
pub mod store;
pub mod tasks;

pub use engine::{EngineBuilder, RoomEngine};
pub use errors::RoomError;
