//! Backend notifications produced by domain events, observed through the
//! mock transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use room_service::aggregate::{Initiator, JoinRequest, RoomChange};
use room_service::attendees::AttendeeSpec;
use room_service::backend::{signing, BackendClass};
use room_service::model::{CallRecording, InCallFlags, ParticipantRole, Permissions};
use room_service::permissions::PermissionMethod;
use room_test_utils::*;
use serde_json::{json, Value};

fn of_type<'a>(bodies: &'a [Value], kind: &str) -> Vec<&'a Value> {
    bodies.iter().filter(|b| b["type"] == kind).collect()
}

#[tokio::test]
async fn test_added_attendee_is_invited_on_signaling() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    room.add_attendees(
        Initiator::System,
        vec![AttendeeSpec::new(user("bob"), ParticipantRole::User)],
    )
    .await
    .unwrap();
    // The owner's invite comes first.
    t.events().wait_for_count("attendees_added", 2).await;

    let requests = t.transport().requests_to(BackendClass::Signaling);
    let request = requests
        .iter()
        .filter(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["type"] == "invite"
        })
        .last()
        .expect("invite sent");
    assert!(request.url.ends_with(&format!("/api/v1/room/{}", room.token())));
    assert_eq!(request.header("Spreed-Signaling-Backend"), Some(SERVER_URL));
    assert!(signing::verify(
        BackendClass::Signaling,
        SIGNALING_SECRET.as_bytes(),
        |name| request.header(name),
        &request.body,
    ));

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["invite"]["userids"], json!(["bob"]));
    assert_eq!(body["invite"]["alluserids"], json!(["alice", "bob"]));

    t.shutdown().await;
}

#[tokio::test]
async fn test_call_join_sends_incall_update() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    let session = room
        .join(JoinRequest::new(user("alice")))
        .await
        .unwrap()
        .session
        .unwrap();
    let before = t.events().count("participant_modified");
    room.change_in_call(session.id, InCallFlags::IN_CALL | InCallFlags::WITH_AUDIO)
        .await
        .unwrap();
    t.events().wait_for_count("participant_modified", before + 1).await;

    let bodies = t.transport().bodies(BackendClass::Signaling);
    let incall = of_type(&bodies, "incall");
    assert_eq!(incall.len(), 1);
    assert_eq!(incall[0]["incall"]["incall"], 3);
    assert_eq!(incall[0]["incall"]["users"].as_array().unwrap().len(), 1);
    assert_eq!(incall[0]["incall"]["changed"].as_array().unwrap().len(), 1);

    t.shutdown().await;
}

#[tokio::test]
async fn test_recording_start_and_stop_reach_recording_server() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    let participant = room.join(JoinRequest::new(user("alice"))).await.unwrap();
    let alice = Initiator::Attendee(participant.attendee.id);
    room.change_in_call(participant.session.unwrap().id, InCallFlags::IN_CALL)
        .await
        .unwrap();
    t.events().wait_for("participant_modified").await;

    let before = t.events().count("room_modified");
    room.start_recording(alice, CallRecording::Video).await.unwrap();
    room.stop_recording(alice).await.unwrap();
    t.events().wait_for_count("room_modified", before + 2).await;

    let requests = t.transport().requests_to(BackendClass::Recording);
    assert_eq!(requests.len(), 2);
    assert!(requests[0].url.starts_with(RECORDING_SERVER));

    let bodies = t.transport().bodies(BackendClass::Recording);
    assert_eq!(bodies[0]["type"], "start");
    assert_eq!(bodies[0]["start"]["status"], 1);
    assert_eq!(bodies[0]["start"]["actor"], json!({"type": "users", "id": "alice"}));
    assert_eq!(bodies[1]["type"], "stop");

    t.shutdown().await;
}

#[tokio::test]
async fn test_recording_requires_active_call() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    let result = room.start_recording(Initiator::System, CallRecording::Audio).await;
    assert!(result.is_err());
    assert!(t.transport().requests_to(BackendClass::Recording).is_empty());

    t.shutdown().await;
}

#[tokio::test]
async fn test_federated_attendee_gets_share_notification() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    let added = room
        .add_attendees(
            Initiator::System,
            vec![AttendeeSpec::new(federated("carol"), ParticipantRole::User)],
        )
        .await
        .unwrap();
    t.events().wait_for_count("attendees_added", 2).await;

    let requests = t.transport().requests_to(BackendClass::Federation);
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.url, format!("https://{REMOTE_HOST}/ocm/notifications"));

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["type"], "SHARE_CREATED");
    assert_eq!(body["resourceType"], "talk-room");
    assert_eq!(body["notification"]["remoteServerUrl"], "cloud.example.com");
    assert_eq!(body["notification"]["remoteToken"], room.token());
    assert_eq!(body["notification"]["roomName"], "Team");

    let secret = body["notification"]["sharedSecret"].as_str().unwrap();
    assert!(!secret.is_empty());
    assert!(added[0].access_token.is_some());
    assert!(signing::verify(
        BackendClass::Federation,
        secret.as_bytes(),
        |name| request.header(name),
        &request.body,
    ));

    t.shutdown().await;
}

#[tokio::test]
async fn test_gone_remote_share_removes_attendee_once() {
    let transport = MockTransport::new().respond_to("/ocm/notifications", [200, 404, 404]);
    let t = TestEngine::start_with(transport, |builder| builder);
    let room = t.create(group("Team", "alice")).await;

    let carol = room
        .add_attendees(
            Initiator::System,
            vec![AttendeeSpec::new(federated("carol"), ParticipantRole::User)],
        )
        .await
        .unwrap()
        .remove(0);
    t.events().wait_for_count("attendees_added", 2).await;

    // Both changes target the same gone share.
    room.set_permissions(
        Initiator::System,
        carol.id,
        PermissionMethod::Set,
        Permissions::CHAT,
    )
    .await
    .unwrap();
    room.modify(Initiator::System, RoomChange::Name("Renamed".to_string()))
        .await
        .unwrap();
    t.events().wait_for("attendees_removed").await;

    // Drain everything queued before this change.
    let before = t.events().count("room_modified");
    room.modify(Initiator::System, RoomChange::Description("Later".to_string()))
        .await
        .unwrap();
    t.events().wait_for_count("room_modified", before + 1).await;

    assert_eq!(t.events().count("attendees_removed"), 1);
    let state = room.state().await.unwrap();
    assert!(state.attendees.iter().all(|a| a.id != carol.id));

    let types = t.transport().message_types(BackendClass::Federation);
    assert_eq!(types[0], "SHARE_CREATED");
    assert_eq!(types[1], "PARTICIPANT_MODIFIED");
    assert!(!types.contains(&"SHARE_UNSHARED".to_string()));
    assert!(types.len() <= 3);

    t.shutdown().await;
}

#[tokio::test]
async fn test_removed_federated_attendee_is_unshared() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    let carol = room
        .add_attendees(
            Initiator::System,
            vec![AttendeeSpec::new(federated("carol"), ParticipantRole::User)],
        )
        .await
        .unwrap()
        .remove(0);
    room.remove_attendee(Initiator::System, carol.id).await.unwrap();
    t.events().wait_for("attendees_removed").await;

    let types = t.transport().message_types(BackendClass::Federation);
    assert_eq!(types, vec!["SHARE_CREATED", "SHARE_UNSHARED"]);

    t.shutdown().await;
}

#[tokio::test]
async fn test_room_change_reaches_attendee_removed_right_after() {
    let t = TestEngine::start();
    let room = t.create(group("Team", "alice")).await;

    let carol = room
        .add_attendees(
            Initiator::System,
            vec![AttendeeSpec::new(federated("carol"), ParticipantRole::User)],
        )
        .await
        .unwrap()
        .remove(0);
    room.modify(Initiator::System, RoomChange::Name("Renamed".to_string()))
        .await
        .unwrap();
    room.remove_attendee(Initiator::System, carol.id).await.unwrap();
    t.events().wait_for("attendees_removed").await;

    // Recipients are fixed when the change commits, not when it is sent.
    let types = t.transport().message_types(BackendClass::Federation);
    assert_eq!(types, vec!["SHARE_CREATED", "ROOM_MODIFIED", "SHARE_UNSHARED"]);

    let bodies = t.transport().bodies(BackendClass::Federation);
    let modified = of_type(&bodies, "ROOM_MODIFIED");
    assert_eq!(modified[0]["providerId"], carol.id.to_string());
    assert_eq!(modified[0]["notification"]["changedProperty"], "name");
    assert_eq!(modified[0]["notification"]["newValue"], "Renamed");

    t.shutdown().await;
}
