//! Backend notification listeners.
//!
//! Each listener turns domain events into signed POSTs to one backend
//! class. Listeners run on the event dispatcher task; their failures are
//! logged there and never reach the mutation that produced the event.

pub mod federation;
pub mod recording;
pub mod signaling;
pub mod signing;
pub mod transport;

pub use federation::FederationListener;
pub use recording::RecordingListener;
pub use signaling::SignalingListener;
pub use transport::{
    BackendClass, BackendClient, BackendError, BackendTransport, HttpTransport, OutgoingRequest,
};

use crate::errors::RoomError;
use thiserror::Error;

/// Failure while handling one event in a listener.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to read conversation state: {0}")]
    Store(#[from] RoomError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
