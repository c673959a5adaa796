//! Signaling server (HPB) notifications.
//!
//! | Event | Message |
//! |-------|---------|
//! | `AttendeesAdded` | `invite` |
//! | `AttendeesRemoved` | `disinvite`, or `participants` after guest cleanup |
//! | `SessionClosed{expired}` | `disinvite` by session id |
//! | `RoomModified`, `LobbyModified` | `update` |
//! | `BeforeRoomDeleted` | `delete` |
//! | `ParticipantModified{role, permissions}` | `participants` |
//! | `ParticipantModified{in_call}` | `incall` |

use super::transport::BackendClient;
use super::NotifyError;
use crate::errors::RoomError;
use crate::events::{DomainEvent, EventListener, ParticipantProperty, RemovalReason, RoomProperty, SessionCloseReason};
use crate::model::{ActorType, Attendee, Conversation, InCallFlags, Permissions, Session};
use crate::permissions::PermissionResolver;
use crate::store::RoomStore;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::AttendeeId;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Map a configured `ws(s)://` server to the `http(s)://` base used for
/// backend requests.
#[must_use]
pub fn http_base_url(server: &str) -> String {
    let server = server.trim_end_matches('/');
    if let Some(rest) = server.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = server.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        server.to_string()
    }
}

/// Room properties as the signaling server knows them.
#[must_use]
pub fn room_properties(conversation: &Conversation) -> Value {
    json!({
        "name": conversation.name,
        "type": conversation.room_type.as_int(),
        "lobby-state": conversation.lobby.as_int(),
        "lobby-timer": conversation.lobby_timer.map(|t| t.timestamp()),
        "read-only": conversation.read_only.as_int(),
        "listable": conversation.listable.as_int(),
        "sip-enabled": conversation.sip.as_int(),
    })
}

fn properties_with_list_change(conversation: &Conversation) -> Value {
    let mut properties = room_properties(conversation);
    if let Some(map) = properties.as_object_mut() {
        map.insert("participant-list-changed".to_string(), Value::Bool(true));
    }
    properties
}

fn user_ids<'a>(attendees: impl IntoIterator<Item = &'a Attendee>) -> Vec<String> {
    attendees
        .into_iter()
        .filter(|a| a.actor.actor_type == ActorType::User)
        .map(|a| a.actor.actor_id.clone())
        .collect()
}

/// One entry of a `participants` or `incall` list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantEntry {
    in_call: u8,
    last_ping: i64,
    session_id: String,
    participant_type: i64,
    participant_permissions: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    /// Media permissions, only in `changed` entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    permissions: Option<Vec<&'static str>>,
}

impl ParticipantEntry {
    fn new(attendee: &Attendee, session: Option<&Session>, permissions: Permissions) -> Self {
        let user_id = (attendee.actor.actor_type == ActorType::User).then(|| attendee.actor.actor_id.clone());
        match session {
            Some(session) => Self {
                in_call: session.in_call.bits(),
                last_ping: session.last_heartbeat.timestamp(),
                session_id: session.token.clone(),
                participant_type: attendee.role.as_int(),
                participant_permissions: permissions.bits(),
                user_id,
                permissions: None,
            },
            None => Self {
                in_call: InCallFlags::DISCONNECTED.bits(),
                last_ping: 0,
                session_id: "0".to_string(),
                participant_type: attendee.role.as_int(),
                participant_permissions: Permissions::CUSTOM.bits(),
                user_id,
                permissions: None,
            },
        }
    }

    fn with_media_permissions(mut self, attendee: &Attendee, permissions: Permissions) -> Self {
        let mut list = Vec::new();
        if permissions.has(Permissions::PUBLISH_AUDIO) {
            list.push("publish-audio");
        }
        if permissions.has(Permissions::PUBLISH_VIDEO) {
            list.push("publish-video");
        }
        if permissions.has(Permissions::PUBLISH_SCREEN) {
            list.push("publish-screen");
        }
        if attendee.role.is_moderator() {
            list.push("control");
        }
        self.permissions = Some(list);
        self
    }
}

/// Attendees and sessions of a conversation, as one snapshot.
struct Roster {
    attendees: HashMap<AttendeeId, Attendee>,
    sessions: Vec<Session>,
}

impl Roster {
    fn visible(&self) -> impl Iterator<Item = &Attendee> {
        self.attendees
            .values()
            .filter(|a| a.actor.actor_type.capabilities().signaling_visible)
    }
}

/// Sends signaling notifications for one configured server.
#[derive(Debug)]
pub struct SignalingListener {
    client: BackendClient,
    /// `http(s)://` base of the first configured server.
    server: String,
    secret: SecretString,
    store: Arc<dyn RoomStore>,
    resolver: Arc<PermissionResolver>,
}

impl SignalingListener {
    #[must_use]
    pub fn new(
        client: BackendClient,
        server: &str,
        secret: SecretString,
        store: Arc<dyn RoomStore>,
        resolver: Arc<PermissionResolver>,
    ) -> Self {
        Self {
            client,
            server: http_base_url(server),
            secret,
            store,
            resolver,
        }
    }

    async fn send(&self, conversation: &Conversation, payload: Value) -> Result<(), NotifyError> {
        let url = format!("{}/api/v1/room/{}", self.server, conversation.token);
        self.client
            .notify(&url, self.secret.expose_secret().as_bytes(), &payload)
            .await?;
        Ok(())
    }

    async fn roster(&self, conversation: &Conversation) -> Result<Roster, RoomError> {
        let attendees = self.store.attendees(conversation.id).await?;
        let sessions = self.store.sessions(conversation.id).await?;
        Ok(Roster {
            attendees: attendees.into_iter().map(|a| (a.id, a)).collect(),
            sessions,
        })
    }

    async fn all_user_ids(&self, conversation: &Conversation) -> Result<Vec<String>, RoomError> {
        let attendees = self.store.attendees(conversation.id).await?;
        let mut ids = user_ids(&attendees);
        ids.sort();
        Ok(ids)
    }

    /// `participants` message; `changed` holds the sessions of `changed_attendee`.
    fn participants_payload(
        &self,
        conversation: &Conversation,
        roster: &Roster,
        changed_attendee: Option<AttendeeId>,
    ) -> Value {
        let mut changed = Vec::new();
        let mut users = Vec::new();
        for attendee in roster.visible() {
            let permissions = self.resolver.resolve(conversation, attendee);
            let sessions: Vec<&Session> = roster
                .sessions
                .iter()
                .filter(|s| s.attendee_id == attendee.id)
                .collect();
            if sessions.is_empty() {
                users.push(ParticipantEntry::new(attendee, None, permissions));
                continue;
            }
            for session in sessions {
                let entry = ParticipantEntry::new(attendee, Some(session), permissions);
                if changed_attendee == Some(attendee.id) {
                    changed.push(entry.clone().with_media_permissions(attendee, permissions));
                }
                users.push(entry);
            }
        }
        json!({
            "type": "participants",
            "participants": {
                "changed": changed,
                "users": users,
            },
        })
    }

    fn incall_payload(&self, conversation: &Conversation, roster: &Roster, session: &Session) -> Value {
        let mut changed = Vec::new();
        let mut users = Vec::new();
        for current in &roster.sessions {
            let Some(attendee) = roster.attendees.get(&current.attendee_id) else {
                continue;
            };
            if !attendee.actor.actor_type.capabilities().signaling_visible {
                continue;
            }
            let entry = ParticipantEntry::new(attendee, Some(current), self.resolver.resolve(conversation, attendee));
            if current.in_call.is_in_call() {
                users.push(entry.clone());
            }
            if current.id == session.id {
                changed.push(entry);
            }
        }
        json!({
            "type": "incall",
            "incall": {
                "incall": session.in_call.bits(),
                "changed": changed,
                "users": users,
            },
        })
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        match event {
            DomainEvent::AttendeesAdded {
                conversation,
                attendees,
            } => {
                let payload = json!({
                    "type": "invite",
                    "invite": {
                        "userids": user_ids(attendees),
                        "alluserids": self.all_user_ids(conversation).await?,
                        "properties": properties_with_list_change(conversation),
                    },
                });
                self.send(conversation, payload).await
            }

            DomainEvent::AttendeesRemoved {
                conversation,
                reason: RemovalReason::GuestsCleaned,
                ..
            } => {
                let roster = self.roster(conversation).await?;
                let payload = self.participants_payload(conversation, &roster, None);
                self.send(conversation, payload).await
            }

            DomainEvent::AttendeesRemoved {
                conversation,
                attendees,
                sessions,
                ..
            } => {
                let removed_users = user_ids(attendees);
                let mut body = json!({
                    "alluserids": self.all_user_ids(conversation).await?,
                    "properties": properties_with_list_change(conversation),
                });
                if let Some(map) = body.as_object_mut() {
                    if removed_users.is_empty() {
                        let session_ids: Vec<&str> = sessions.iter().map(|s| s.token.as_str()).collect();
                        map.insert("sessionids".to_string(), json!(session_ids));
                    } else {
                        map.insert("userids".to_string(), json!(removed_users));
                    }
                }
                self.send(conversation, json!({"type": "disinvite", "disinvite": body}))
                    .await
            }

            DomainEvent::SessionClosed {
                conversation,
                session,
                reason: SessionCloseReason::Expired,
                ..
            } => {
                let payload = json!({
                    "type": "disinvite",
                    "disinvite": {
                        "sessionids": [session.token],
                        "alluserids": self.all_user_ids(conversation).await?,
                        "properties": room_properties(conversation),
                    },
                });
                self.send(conversation, payload).await
            }

            DomainEvent::RoomModified {
                conversation,
                property,
                ..
            } if is_signaled_property(*property) => self.send_update(conversation).await,

            DomainEvent::LobbyModified { conversation, .. } => self.send_update(conversation).await,

            DomainEvent::BeforeRoomDeleted {
                conversation,
                attendees,
                ..
            } => {
                let payload = json!({
                    "type": "delete",
                    "delete": {
                        "userids": user_ids(attendees),
                    },
                });
                self.send(conversation, payload).await
            }

            DomainEvent::ParticipantModified {
                conversation,
                attendee,
                session,
                property,
                ..
            } => {
                let roster = self.roster(conversation).await?;
                let payload = match (property, session) {
                    (ParticipantProperty::InCall, Some(session)) => {
                        self.incall_payload(conversation, &roster, session)
                    }
                    (ParticipantProperty::InCall, None) => return Ok(()),
                    (ParticipantProperty::Role | ParticipantProperty::Permissions, _) => {
                        self.participants_payload(conversation, &roster, Some(attendee.id))
                    }
                };
                self.send(conversation, payload).await
            }

            _ => Ok(()),
        }
    }

    async fn send_update(&self, conversation: &Conversation) -> Result<(), NotifyError> {
        let payload = json!({
            "type": "update",
            "update": {
                "userids": self.all_user_ids(conversation).await?,
                "properties": room_properties(conversation),
            },
        });
        self.send(conversation, payload).await
    }
}

/// Properties the signaling server mirrors.
fn is_signaled_property(property: RoomProperty) -> bool {
    matches!(
        property,
        RoomProperty::Name
            | RoomProperty::Description
            | RoomProperty::Password
            | RoomProperty::Type
            | RoomProperty::ReadOnly
            | RoomProperty::Listable
            | RoomProperty::SipEnabled
    )
}

#[async_trait]
impl EventListener for SignalingListener {
    fn name(&self) -> &'static str {
        "signaling"
    }

    async fn on_event(&self, event: &DomainEvent) {
        let token = event.conversation().token.clone();
        match self.handle(event).await {
            Ok(()) => {
                debug!(target: "rs.backend.signaling", event = event.kind(), token = %token, "Signaling notified");
            }
            Err(e) => {
                warn!(
                    target: "rs.backend.signaling",
                    event = event.kind(),
                    token = %token,
                    error = %e,
                    "Failed to notify signaling server"
                );
            }
        }
    }
}
