//! Pre-configured test data.

use room_service::aggregate::CreateConversation;
use room_service::model::{ActorRef, ConversationType, ParticipantRole};

/// Local server URL used by test engines.
pub const SERVER_URL: &str = "https://cloud.example.com/";

pub const SIGNALING_SERVER: &str = "wss://hpb.example.com/";
pub const SIGNALING_SECRET: &str = "signaling-secret";

pub const RECORDING_SERVER: &str = "https://recording.example.com";
pub const RECORDING_SECRET: &str = "recording-secret";

/// Host of the federated test actors.
pub const REMOTE_HOST: &str = "remote.example.com";

#[must_use]
pub fn user(id: &str) -> ActorRef {
    ActorRef::user(id)
}

#[must_use]
pub fn guest(id: &str) -> ActorRef {
    ActorRef::guest(id)
}

/// `id@remote.example.com`.
#[must_use]
pub fn federated(id: &str) -> ActorRef {
    ActorRef::federated(format!("{id}@{REMOTE_HOST}"))
}

/// Group conversation owned by `owner`.
#[must_use]
pub fn group(name: &str, owner: &str) -> CreateConversation {
    CreateConversation::new(ConversationType::Group, name).with_owner(user(owner))
}

/// Public conversation owned by `owner`.
#[must_use]
pub fn public(name: &str, owner: &str) -> CreateConversation {
    CreateConversation::new(ConversationType::Public, name).with_owner(user(owner))
}

/// Group conversation owned by `owner` with `members` as plain users.
#[must_use]
pub fn group_with(name: &str, owner: &str, members: &[&str]) -> CreateConversation {
    members.iter().fold(group(name, owner), |request, member| {
        request.with_member(user(member), ParticipantRole::User)
    })
}
