//! Actor model for conversations.
//!
//! ```text
//! ConversationControllerActor (singleton)
//! └── supervises N ConversationActors
//!     └── ConversationActor (one per loaded conversation)
//!         └── owns the ConversationAggregate, applies one request at a time
//! ```
//!
//! Every mutation of a conversation goes through its actor, so membership,
//! session and call-flag changes of one conversation are strictly ordered
//! while different conversations progress in parallel.
//!
//! # Modules
//!
//! - [`controller`] - `ConversationControllerActor`, loads and supervises conversations
//! - [`conversation`] - `ConversationActor` per loaded conversation
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring

pub mod controller;
pub mod conversation;
pub mod messages;
pub mod metrics;

pub use controller::{ConversationControllerActor, ConversationControllerHandle};
pub use conversation::{ConversationActor, ConversationHandle};
pub use messages::*;
pub use metrics::{ActorType, MailboxLevel, MailboxMonitor};
