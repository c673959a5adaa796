//! Signed delivery over real HTTP against a mock backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use room_service::backend::{signing, BackendClass, BackendClient, BackendError, HttpTransport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &[u8] = b"signaling-secret";
const LOCAL_URL: &str = "https://cloud.example.com/";

fn client() -> BackendClient {
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    BackendClient::new(BackendClass::Signaling, Arc::new(transport), LOCAL_URL)
}

#[tokio::test]
async fn test_request_carries_verifiable_signature() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/room/abc123"))
        .and(header("OCS-APIRequest", "true"))
        .and(header("Spreed-Signaling-Backend", LOCAL_URL))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/api/v1/room/abc123", mock_server.uri());
    client()
        .notify(&url, SECRET, &json!({"type": "update", "update": {"userids": ["alice"]}}))
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let lookup = |name: &str| request.headers.get(name).and_then(|v| v.to_str().ok());

    assert!(signing::verify(BackendClass::Signaling, SECRET, lookup, &request.body));
    assert!(!signing::verify(BackendClass::Signaling, b"other-secret", lookup, &request.body));

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["type"], "update");
}

#[tokio::test]
async fn test_retry_on_503_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/room/abc123"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/room/abc123"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let url = format!("{}/api/v1/room/abc123", mock_server.uri());
    let result = client().notify(&url, SECRET, &json!({"type": "update"})).await;
    assert!(result.is_ok());

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let nonce = |i: usize| {
        requests[i]
            .headers
            .get("Spreed-Signaling-Random")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    };
    assert_ne!(nonce(0), nonce(1));
}

#[tokio::test]
async fn test_persistent_failure_gives_up() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let url = format!("{}/api/v1/room/abc123", mock_server.uri());
    let result = client().notify(&url, SECRET, &json!({"type": "update"})).await;
    assert!(matches!(result, Err(BackendError::Unavailable(_))));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/ocm/notifications", mock_server.uri());
    let result = client().notify(&url, SECRET, &json!({"type": "ROOM_MODIFIED"})).await;
    assert_eq!(result, Err(BackendError::NotFound));
}

#[tokio::test]
async fn test_unreachable_backend_is_unavailable() {
    // Nothing listens on the discard port.
    let result = client()
        .notify("http://127.0.0.1:9/api/v1/room/abc123", SECRET, &json!({}))
        .await;
    assert!(matches!(result, Err(BackendError::Unavailable(_))));
}
