//! Presence and membership flows through a running engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use room_service::aggregate::JoinRequest;
use room_service::model::{ConversationType, InCallFlags};
use room_service::store::RoomStore;
use room_service::RoomError;
use room_test_utils::*;
use std::time::Duration;

#[tokio::test]
async fn test_stale_session_no_longer_counts_towards_call() {
    let t = TestEngine::start();
    let room = t.create(group_with("Team", "alice", &["bob"])).await;

    let first = room.join(JoinRequest::new(user("bob"))).await.unwrap();
    let first_session = first.session.unwrap();
    room.change_in_call(
        first_session.id,
        InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO | InCallFlags::WITH_VIDEO,
    )
    .await
    .unwrap();

    let state = room.state().await.unwrap();
    assert_eq!(
        state.call_flags,
        InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO | InCallFlags::WITH_VIDEO
    );

    // The first connection goes silent.
    t.advance(120);

    let second = room.join(JoinRequest::new(user("bob"))).await.unwrap();
    let second_session = second.session.unwrap();
    assert_ne!(first_session.id, second_session.id);
    room.change_in_call(second_session.id, InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO)
        .await
        .unwrap();

    let state = room.state().await.unwrap();
    assert_eq!(state.call_flags, InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO);
    assert_eq!(state.active_attendees, 1);
    assert_eq!(state.live_sessions.len(), 1);
    assert_eq!(state.live_sessions[0].id, second_session.id);

    t.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_keeps_session_live() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    let participant = room
        .join(JoinRequest::new(user("alice")).with_session_token("alice-session"))
        .await
        .unwrap();
    assert_eq!(participant.session.unwrap().token, "alice-session");

    t.advance(45);
    t.engine().tracker().heartbeat("alice-session").await.unwrap();
    t.advance(45);

    let state = room.state().await.unwrap();
    assert_eq!(state.live_sessions.len(), 1);
    assert_eq!(state.active_attendees, 1);

    t.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_after_disconnect_is_rejected() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    let session = room
        .join(JoinRequest::new(user("alice")))
        .await
        .unwrap()
        .session
        .unwrap();
    room.disconnect(session.id).await.unwrap();

    let result = t.engine().tracker().heartbeat(&session.token).await;
    assert!(matches!(result, Err(RoomError::SessionNotFound(_))));

    // The owner stays an attendee; only the connection is gone.
    let state = room.state().await.unwrap();
    assert_eq!(state.attendees.len(), 1);
    assert!(state.live_sessions.is_empty());

    t.shutdown().await;
}

#[tokio::test]
async fn test_one_to_one_survives_first_leave_and_dies_with_second() {
    let t = TestEngine::start();
    let room = t
        .controller()
        .open_one_to_one(user("alice"), user("bob"))
        .await
        .unwrap();
    t.events().wait_for("room_created").await;

    let state = room.state().await.unwrap();
    let alice = state.attendees.iter().find(|a| a.actor.actor_id == "alice").unwrap().id;
    let bob = state.attendees.iter().find(|a| a.actor.actor_id == "bob").unwrap().id;

    room.leave(alice).await.unwrap();
    let state = room.state().await.unwrap();
    assert_eq!(state.conversation.room_type, ConversationType::OneToOneFormer);
    assert_eq!(state.attendees.len(), 2);

    // Reopening from the other side finds the same conversation.
    let reopened = t
        .controller()
        .open_one_to_one(user("bob"), user("alice"))
        .await
        .unwrap();
    assert_eq!(reopened.token(), room.token());

    let token = room.token().to_string();
    room.leave(bob).await.unwrap();
    t.events().wait_for("room_deleted").await;

    assert!(t.engine().context().store.conversation_by_token(&token).await.is_err());

    t.shutdown().await;
}

#[tokio::test]
async fn test_sweeper_expires_silent_sessions() {
    let t = TestEngine::start_with(MockTransport::new(), |builder| {
        builder.with_session_sweeper(Duration::from_millis(20))
    });
    let room = t.create(group_with("Team", "alice", &["bob"])).await;

    let alice = room
        .join(JoinRequest::new(user("alice")))
        .await
        .unwrap()
        .session
        .unwrap();
    room.join(JoinRequest::new(user("bob"))).await.unwrap();

    t.advance(50);
    t.engine().tracker().heartbeat(&alice.token).await.unwrap();
    t.advance(20);

    t.events().wait_for("session_closed").await;

    let state = room.state().await.unwrap();
    assert_eq!(state.live_sessions.len(), 1);
    assert_eq!(state.live_sessions[0].token, alice.token);
    assert_eq!(t.events().count("session_closed"), 1);

    t.shutdown().await;
}
