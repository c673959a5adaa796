//! Secret types for values that must never reach logs.
//!
//! Re-exports [`secrecy`] so every crate in the workspace names the same
//! types. Backend shared secrets, attendee access tokens and conversation
//! passwords are all carried as [`SecretString`].
//!
//! `SecretString` implements `Debug` with redaction, so deriving `Debug` on a
//! struct that holds one is safe. Reading the value requires an explicit
//! `expose_secret()` call, which keeps every use greppable.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct SignalingBackend {
//!     url: String,
//!     secret: SecretString,
//! }
//!
//! let backend = SignalingBackend {
//!     url: "https://signaling.example.com".to_string(),
//!     secret: SecretString::from("shared-secret"),
//! };
//!
//! assert!(!format!("{backend:?}").contains("shared-secret"));
//! assert_eq!(backend.secret.expose_secret(), "shared-secret");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("recording-secret");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("recording-secret"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("access-token-123");
        assert_eq!(secret.expose_secret(), "access-token-123");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct RemoteShare {
            remote_server: String,
            shared_secret: SecretString,
        }

        let share = RemoteShare {
            remote_server: "remote.example.org".to_string(),
            shared_secret: SecretString::from("super-secret"),
        };

        let debug_str = format!("{share:?}");

        assert!(debug_str.contains("remote.example.org"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct BackendEntry {
            server: String,
            secret: SecretString,
        }

        let json = r#"{"server": "wss://hpb.example.com", "secret": "my-secret-value"}"#;
        let entry: BackendEntry = serde_json::from_str(json).expect("deserialize");

        assert_eq!(entry.secret.expose_secret(), "my-secret-value");
        assert!(!format!("{entry:?}").contains("my-secret-value"));
    }
}
