//! Room service error types.
//!
//! Errors map to HTTP-equivalent status codes for callers. Internal details
//! are logged server-side but not exposed to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Room service error type.
///
/// Maps to HTTP-equivalent status codes:
/// - `*NotFound`: 404
/// - `Forbidden`: 403
/// - `Conflict`: 409
/// - `BackendUnavailable`, `Draining`: 503
/// - Storage, Config, Internal: 500
#[derive(Debug, Error)]
pub enum RoomError {
    /// Conversation does not exist (or has been deleted).
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Attendee is not a member of the conversation.
    #[error("Attendee not found: {0}")]
    AttendeeNotFound(String),

    /// Session is unknown or already closed.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Join or permission check failed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate attendee or invalid state transition.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend notification failed after retries.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The engine is shutting down and not loading conversations.
    #[error("Engine is draining")]
    Draining,

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor mailbox failures and similar).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Returns the HTTP-equivalent status code for this error.
    #[must_use]
    pub fn error_code(&self) -> u16 {
        match self {
            RoomError::ConversationNotFound(_)
            | RoomError::AttendeeNotFound(_)
            | RoomError::SessionNotFound(_) => 404,
            RoomError::Forbidden(_) => 403,
            RoomError::Conflict(_) => 409,
            RoomError::BackendUnavailable(_) | RoomError::Draining => 503,
            RoomError::Storage(_) | RoomError::Config(_) | RoomError::Internal(_) => 500,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Storage(_) | RoomError::Config(_) | RoomError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            RoomError::ConversationNotFound(_) => "Conversation not found".to_string(),
            RoomError::AttendeeNotFound(_) => "Participant not found".to_string(),
            RoomError::SessionNotFound(_) => "Session not found".to_string(),
            RoomError::Forbidden(reason) | RoomError::Conflict(reason) => reason.clone(),
            RoomError::BackendUnavailable(_) => "A backend service is unavailable".to_string(),
            RoomError::Draining => "Service is shutting down".to_string(),
        }
    }

    /// True for any of the not-found variants.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.error_code() == 404
    }
}

/// Error body returned over HTTP.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        if code >= 500 {
            tracing::warn!(target: "rs.http", error = %self, "Request failed");
        }
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: ErrorDetail {
                code,
                message: self.client_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RoomError::ConversationNotFound("abc".into()).error_code(),
            404
        );
        assert_eq!(RoomError::AttendeeNotFound("a".into()).error_code(), 404);
        assert_eq!(RoomError::SessionNotFound("s".into()).error_code(), 404);
        assert_eq!(RoomError::Forbidden("lobby".into()).error_code(), 403);
        assert_eq!(RoomError::Conflict("dup".into()).error_code(), 409);
        assert_eq!(
            RoomError::BackendUnavailable("signaling".into()).error_code(),
            503
        );
        assert_eq!(RoomError::Draining.error_code(), 503);
        assert_eq!(RoomError::Storage("x".into()).error_code(), 500);
        assert_eq!(RoomError::Internal("x".into()).error_code(), 500);
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let err = RoomError::Storage("lock poisoned at tables.rs:42".to_string());
        let msg = err.client_message();
        assert!(!msg.contains("tables.rs"));
        assert_eq!(msg, "An internal error occurred");

        let err = RoomError::ConversationNotFound("secret-token".to_string());
        assert!(!err.client_message().contains("secret-token"));
    }

    #[test]
    fn test_forbidden_and_conflict_carry_reason() {
        let err = RoomError::Forbidden("Lobby is active".to_string());
        assert_eq!(err.client_message(), "Lobby is active");
        let err = RoomError::Conflict("Cannot demote the last owner".to_string());
        assert_eq!(err.client_message(), "Cannot demote the last owner");
    }

    #[test]
    fn test_is_not_found() {
        assert!(RoomError::SessionNotFound("s".into()).is_not_found());
        assert!(!RoomError::Conflict("c".into()).is_not_found());
    }
}
