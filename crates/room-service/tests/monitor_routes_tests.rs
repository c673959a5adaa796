//! Monitoring endpoints served from a running engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use room_service::aggregate::JoinRequest;
use room_service::model::InCallFlags;
use room_service::observability::HealthState;
use room_service::routes::build_routes;
use room_test_utils::*;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

fn app(t: &TestEngine) -> Router {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    build_routes(t.engine().monitor(), Arc::new(HealthState::new()), handle)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request");
    let response = app.oneshot(request).await.expect("Failed to execute request");
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_room_stats_count_live_sessions() {
    let t = TestEngine::start();
    let room = t.create(group_with("Team", "alice", &["bob"])).await;

    let alice = room.join(JoinRequest::new(user("alice"))).await.unwrap();
    room.join(JoinRequest::new(user("bob"))).await.unwrap();
    room.change_in_call(alice.session.unwrap().id, InCallFlags::IN_CALL)
        .await
        .unwrap();

    let (status, body) = get(app(&t), &format!("/api/v1/monitor/rooms/{}", room.token())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attendees"], 2);
    assert_eq!(body["sessions"], 2);
    assert_eq!(body["sessions_in_call"], 1);

    // Both sessions fall out of the liveness window.
    t.advance(61);
    let (_, body) = get(app(&t), &format!("/api/v1/monitor/rooms/{}", room.token())).await;
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["sessions_in_call"], 0);

    t.shutdown().await;
}

#[tokio::test]
async fn test_room_stats_unknown_token_is_404() {
    let t = TestEngine::start();

    let (status, body) = get(app(&t), "/api/v1/monitor/rooms/doesnotexist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 404);

    t.shutdown().await;
}

#[tokio::test]
async fn test_calls_summary_spans_conversations() {
    let t = TestEngine::start();
    let first = t.create(group("One", "alice")).await;
    let second = t.create(group("Two", "bob")).await;
    t.create(group("Idle", "carol")).await;

    for (room, owner) in [(&first, "alice"), (&second, "bob")] {
        let session = room
            .join(JoinRequest::new(user(owner)))
            .await
            .unwrap()
            .session
            .unwrap();
        room.change_in_call(session.id, InCallFlags::IN_CALL)
            .await
            .unwrap();
    }

    let (status, body) = get(app(&t), "/api/v1/monitor/calls").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversations_in_call"], 2);
    assert_eq!(body["sessions_in_call"], 2);

    t.shutdown().await;
}

#[tokio::test]
async fn test_health_probes_are_mounted() {
    let t = TestEngine::start();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("Failed to build request");
    let response = app(&t).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    t.shutdown().await;
}
