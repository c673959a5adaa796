//! Request signing shared by all backend classes.
//!
//! ```text
//! <Prefix>-Random:   64 hex chars (32 random bytes)
//! <Prefix>-Checksum: hex(hmac_sha256(secret, random || body))
//! <Prefix>-Backend:  local server URL
//! ```

use super::transport::{BackendClass, BackendError};
use crate::crypto;

/// Headers for one signed POST of `body`, with a fresh nonce.
///
/// # Errors
///
/// Returns `BackendError::Encode` if the nonce cannot be generated.
pub fn signed_headers(
    class: BackendClass,
    secret: &[u8],
    backend_url: &str,
    body: &[u8],
) -> Result<Vec<(String, String)>, BackendError> {
    let random = crypto::signing_nonce().map_err(|e| BackendError::Encode(e.to_string()))?;
    let checksum = crypto::sign_request(secret, &random, body);
    let prefix = class.header_prefix();

    Ok(vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("OCS-APIRequest".to_string(), "true".to_string()),
        (format!("{prefix}-Random"), random),
        (format!("{prefix}-Checksum"), checksum),
        (format!("{prefix}-Backend"), backend_url.to_string()),
    ])
}

/// Check the signature headers of a received request.
///
/// `header` looks a header up by name.
#[must_use]
pub fn verify<'a>(
    class: BackendClass,
    secret: &[u8],
    header: impl Fn(&str) -> Option<&'a str>,
    body: &[u8],
) -> bool {
    let prefix = class.header_prefix();
    match (
        header(&format!("{prefix}-Random")),
        header(&format!("{prefix}-Checksum")),
    ) {
        (Some(random), Some(checksum)) => crypto::verify_request(secret, random, body, checksum),
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn lookup<'a>(headers: &'a [(String, String)]) -> impl Fn(&str) -> Option<&'a str> {
        move |name| {
            headers
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        }
    }

    #[test]
    fn test_headers_carry_prefix_and_verify() {
        let body = br#"{"type":"update"}"#;
        let headers =
            signed_headers(BackendClass::Recording, b"shared", "https://cloud.example.com/", body)
                .unwrap();

        let random = lookup(&headers)("Talk-Recording-Random").unwrap();
        assert_eq!(random.len(), 64);
        assert_eq!(
            lookup(&headers)("Talk-Recording-Backend"),
            Some("https://cloud.example.com/")
        );
        assert!(verify(BackendClass::Recording, b"shared", lookup(&headers), body));
        assert!(!verify(BackendClass::Recording, b"other", lookup(&headers), body));
        assert!(!verify(BackendClass::Signaling, b"shared", lookup(&headers), body));
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let headers =
            signed_headers(BackendClass::Signaling, b"shared", "https://a/", b"{}").unwrap();
        assert!(!verify(BackendClass::Signaling, b"shared", lookup(&headers), b"{ }"));
    }
}
