//! Common utilities and types shared across room-service components.

#![warn(clippy::pedantic)]

/// Module for wall-clock abstraction used by liveness checks
pub mod clock;

/// Module for observability configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for common identifier types
pub mod types;
