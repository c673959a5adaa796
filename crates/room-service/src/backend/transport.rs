//! Signed HTTP delivery to signaling, recording and federation backends.
//!
//! [`BackendTransport`] performs one POST and reports the status code.
//! [`BackendClient`] owns the delivery policy on top of it:
//!
//! - connection errors and 5xx are retried, 3 attempts in total
//! - 404 is `NotFound` and never retried
//! - any other 4xx is `Rejected`
//!
//! Each attempt is signed with a fresh nonce.

use super::signing;
use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

/// Attempts per notification, first try included.
pub const MAX_ATTEMPTS: u32 = 3;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which backend a notification goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendClass {
    Signaling,
    Recording,
    Federation,
}

impl BackendClass {
    /// Prefix of the signing headers.
    #[must_use]
    pub const fn header_prefix(self) -> &'static str {
        match self {
            Self::Signaling => "Spreed-Signaling",
            Self::Recording => "Talk-Recording",
            Self::Federation => "Talk-Federation",
        }
    }

    /// Metric label and log name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signaling => "signaling",
            Self::Recording => "recording",
            Self::Federation => "federation",
        }
    }
}

impl fmt::Display for BackendClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend answered 404.
    #[error("Backend resource not found")]
    NotFound,

    /// The backend refused the request with a 4xx other than 404.
    #[error("Backend rejected request with status {0}")]
    Rejected(u16),

    /// Connection failure or 5xx, after all attempts.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The payload could not be serialized or signed.
    #[error("Failed to build backend request: {0}")]
    Encode(String),
}

impl BackendError {
    /// Metric label.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Rejected(_) => "rejected",
            Self::Unavailable(_) => "unavailable",
            Self::Encode(_) => "encode_error",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// One signed POST, as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub class: BackendClass,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutgoingRequest {
    /// Value of a header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends one request and reports the HTTP status.
///
/// Connection-level failures are `BackendError::Unavailable`. Status
/// interpretation and retries belong to [`BackendClient`].
#[async_trait]
pub trait BackendTransport: Send + Sync + fmt::Debug {
    async fn post(&self, request: &OutgoingRequest) -> Result<u16, BackendError>;
}

/// `reqwest` transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns `BackendError::Encode` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "rs.backend", error = %e, "Failed to build HTTP client");
                BackendError::Encode(format!("HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn post(&self, request: &OutgoingRequest) -> Result<u16, BackendError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

/// Delivery policy for one backend class.
#[derive(Debug, Clone)]
pub struct BackendClient {
    class: BackendClass,
    transport: Arc<dyn BackendTransport>,
    /// Local server URL, sent as `<Prefix>-Backend`.
    backend_url: String,
}

impl BackendClient {
    #[must_use]
    pub fn new(
        class: BackendClass,
        transport: Arc<dyn BackendTransport>,
        backend_url: impl Into<String>,
    ) -> Self {
        Self {
            class,
            transport,
            backend_url: backend_url.into(),
        }
    }

    #[must_use]
    pub fn class(&self) -> BackendClass {
        self.class
    }

    /// POST `payload` to `url`, signed with `secret`.
    ///
    /// # Errors
    ///
    /// `NotFound` and `Rejected` come back after one attempt;
    /// `Unavailable` after [`MAX_ATTEMPTS`].
    #[instrument(skip_all, fields(backend = %self.class))]
    pub async fn notify<T: Serialize + ?Sized>(
        &self,
        url: &str,
        secret: &[u8],
        payload: &T,
    ) -> Result<(), BackendError> {
        let body = serde_json::to_vec(payload).map_err(|e| BackendError::Encode(e.to_string()))?;
        let started = Instant::now();

        let result = self.deliver(url, secret, body).await;

        let outcome = match &result {
            Ok(()) => "success",
            Err(e) => e.outcome(),
        };
        metrics::record_backend_request(self.class.as_str(), outcome, started.elapsed());
        result
    }

    async fn deliver(&self, url: &str, secret: &[u8], body: Vec<u8>) -> Result<(), BackendError> {
        let mut attempt = 1;
        loop {
            let headers = signing::signed_headers(self.class, secret, &self.backend_url, &body)?;
            let request = OutgoingRequest {
                class: self.class,
                url: url.to_string(),
                headers,
                body: body.clone(),
            };

            let result = match self.transport.post(&request).await {
                Ok(status) => classify(status),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    debug!(
                        target: "rs.backend",
                        backend = %self.class,
                        attempt,
                        "Backend notification delivered"
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(
                        target: "rs.backend",
                        backend = %self.class,
                        error = %e,
                        retries_left = MAX_ATTEMPTS - attempt,
                        "Failed to send notification to backend, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!(
                            target: "rs.backend",
                            backend = %self.class,
                            error = %e,
                            "Failed to send notification to backend, giving up"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn classify(status: u16) -> Result<(), BackendError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(BackendError::NotFound),
        400..=499 => Err(BackendError::Rejected(status)),
        _ => Err(BackendError::Unavailable(format!("status {status}"))),
    }
}
