//! Scripted, recording backend transport.
//!
//! Replaces HTTP for engine-level tests: every signed request is recorded
//! and answered from a script.
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::MockTransport;
//! use room_service::backend::BackendClass;
//!
//! let transport = MockTransport::new()
//!     .respond_to("/ocm/notifications", [404]);
//!
//! // ... run the engine with `transport.clone()` ...
//!
//! let sent = transport.bodies(BackendClass::Federation);
//! assert_eq!(sent[0]["type"], "ROOM_MODIFIED");
//! ```

use async_trait::async_trait;
use room_service::backend::{BackendClass, BackendError, BackendTransport, OutgoingRequest};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Rule {
    url_contains: String,
    statuses: VecDeque<u16>,
}

#[derive(Debug, Default)]
struct Inner {
    rules: Vec<Rule>,
    requests: Vec<OutgoingRequest>,
}

/// Backend transport that records requests and replies from a script.
///
/// Requests matching no scripted rule are answered 200. Clones share the
/// same script and request log.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose URL contains `url_contains` with `statuses`,
    /// one per request, then 200.
    #[must_use]
    pub fn respond_to(self, url_contains: &str, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.inner.lock().unwrap().rules.push(Rule {
            url_contains: url_contains.to_string(),
            statuses: statuses.into_iter().collect(),
        });
        self
    }

    /// Every request sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<OutgoingRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Requests to one backend class.
    #[must_use]
    pub fn requests_to(&self, class: BackendClass) -> Vec<OutgoingRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.class == class)
            .collect()
    }

    /// Parsed JSON bodies sent to one backend class.
    #[must_use]
    pub fn bodies(&self, class: BackendClass) -> Vec<Value> {
        self.requests_to(class)
            .iter()
            .map(|r| serde_json::from_slice(&r.body).expect("backend body is JSON"))
            .collect()
    }

    /// Message types (`type` field) sent to one backend class, in order.
    #[must_use]
    pub fn message_types(&self, class: BackendClass) -> Vec<String> {
        self.bodies(class)
            .iter()
            .map(|b| b["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().requests.clear();
    }
}

#[async_trait]
impl BackendTransport for MockTransport {
    async fn post(&self, request: &OutgoingRequest) -> Result<u16, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(request.clone());
        let status = inner
            .rules
            .iter_mut()
            .find(|rule| request.url.contains(&rule.url_contains) && !rule.statuses.is_empty())
            .and_then(|rule| rule.statuses.pop_front())
            .unwrap_or(200);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> OutgoingRequest {
        OutgoingRequest {
            class: BackendClass::Federation,
            url: url.to_string(),
            headers: Vec::new(),
            body: br#"{"type":"SHARE_CREATED"}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_scripted_statuses_then_success() {
        let transport = MockTransport::new().respond_to("remote.example", [404, 500]);

        assert_eq!(transport.post(&request("https://remote.example/ocm/notifications")).await, Ok(404));
        assert_eq!(transport.post(&request("https://other.example/ocm/notifications")).await, Ok(200));
        assert_eq!(transport.post(&request("https://remote.example/ocm/notifications")).await, Ok(500));
        assert_eq!(transport.post(&request("https://remote.example/ocm/notifications")).await, Ok(200));

        assert_eq!(transport.requests().len(), 4);
        assert_eq!(transport.message_types(BackendClass::Federation).len(), 4);
        assert!(transport.requests_to(BackendClass::Signaling).is_empty());
    }
}
