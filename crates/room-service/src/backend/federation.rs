//! Federation notifications to remote instances.
//!
//! Every notification targets one federated attendee and is signed with
//! that attendee's access token. A 404 on a room or participant update
//! means the remote share is gone: the attendee is removed (reason
//! `remote_gone`) and nothing further is sent for it.

use super::transport::{BackendClient, BackendError};
use super::NotifyError;
use crate::actors::ConversationControllerHandle;
use crate::events::{DomainEvent, EventListener, PropertyValue, RemovalReason};
use crate::model::{Attendee, Conversation};
use crate::observability::metrics;
use async_trait::async_trait;
use common::secret::ExposeSecret;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// Resource type of every notification.
const RESOURCE_TYPE: &str = "talk-room";

/// OCM notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    ShareCreated,
    ShareUnshared,
    RoomModified,
    ParticipantModified,
}

impl NotificationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShareCreated => "SHARE_CREATED",
            Self::ShareUnshared => "SHARE_UNSHARED",
            Self::RoomModified => "ROOM_MODIFIED",
            Self::ParticipantModified => "PARTICIPANT_MODIFIED",
        }
    }

    /// A 404 answer means the remote share no longer exists.
    const fn not_found_removes_attendee(self) -> bool {
        matches!(self, Self::RoomModified | Self::ParticipantModified)
    }
}

/// `https://` is assumed when the remote has no scheme.
#[must_use]
pub fn remote_base_url(remote: &str) -> String {
    let remote = remote.trim_end_matches('/');
    if remote.starts_with("http://") || remote.starts_with("https://") {
        remote.to_string()
    } else {
        format!("https://{remote}")
    }
}

/// The local server as remotes address it: no `https://`, no trailing `/`.
#[must_use]
pub fn local_remote_url(server_url: &str) -> String {
    let server = server_url.trim_end_matches('/');
    let server = server.strip_suffix("/index.php").unwrap_or(server);
    server.strip_prefix("https://").unwrap_or(server).to_string()
}

/// One notification for one attendee, before signing.
#[derive(Debug, Clone)]
struct Notification<'a> {
    kind: NotificationType,
    attendee: &'a Attendee,
    extra: Map<String, Value>,
}

impl<'a> Notification<'a> {
    fn new(kind: NotificationType, attendee: &'a Attendee) -> Self {
        Self {
            kind,
            attendee,
            extra: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

fn property_json(value: &PropertyValue) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

pub struct FederationListener {
    client: BackendClient,
    /// Local server URL, as sent in `remoteServerUrl`.
    local_url: String,
    controller: ConversationControllerHandle,
}

impl std::fmt::Debug for FederationListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationListener")
            .field("local_url", &self.local_url)
            .finish_non_exhaustive()
    }
}

impl FederationListener {
    #[must_use]
    pub fn new(
        client: BackendClient,
        server_url: &str,
        controller: ConversationControllerHandle,
    ) -> Self {
        Self {
            client,
            local_url: local_remote_url(server_url),
            controller,
        }
    }

    async fn send(&self, conversation: &Conversation, notification: Notification<'_>) -> Result<(), NotifyError> {
        let attendee = notification.attendee;
        let Some(remote) = attendee.actor.remote_server() else {
            warn!(
                target: "rs.backend.federation",
                attendee_id = %attendee.id,
                "Federated attendee without remote server"
            );
            return Ok(());
        };
        let Some(access_token) = attendee.access_token.as_ref() else {
            warn!(
                target: "rs.backend.federation",
                attendee_id = %attendee.id,
                "Federated attendee without access token"
            );
            return Ok(());
        };

        let mut body = Map::new();
        body.insert("remoteServerUrl".to_string(), json!(self.local_url));
        body.insert("sharedSecret".to_string(), json!(access_token.expose_secret()));
        body.insert("remoteToken".to_string(), json!(conversation.token));
        body.extend(notification.extra);
        let payload = json!({
            "type": notification.kind.as_str(),
            "resourceType": RESOURCE_TYPE,
            "providerId": attendee.id.to_string(),
            "notification": body,
        });

        let url = format!("{}/ocm/notifications", remote_base_url(remote));
        let result = self
            .client
            .notify(&url, access_token.expose_secret().as_bytes(), &payload)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(BackendError::NotFound) if notification.kind.not_found_removes_attendee() => {
                self.remove_gone_attendee(conversation, attendee).await;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_gone_attendee(&self, conversation: &Conversation, attendee: &Attendee) {
        let removed = match self.controller.conversation(&conversation.token).await {
            Ok(handle) => handle.remove_remote_attendee(attendee.id).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(true) => {
                metrics::record_federation_attendee_removed();
                info!(
                    target: "rs.backend.federation",
                    token = %conversation.token,
                    attendee_id = %attendee.id,
                    "Remote share gone, federated attendee removed"
                );
            }
            Ok(false) => {
                debug!(
                    target: "rs.backend.federation",
                    attendee_id = %attendee.id,
                    "Federated attendee already removed"
                );
            }
            Err(e) => {
                warn!(
                    target: "rs.backend.federation",
                    token = %conversation.token,
                    attendee_id = %attendee.id,
                    error = %e,
                    "Failed to remove federated attendee"
                );
            }
        }
    }

    /// Send to each attendee in turn; one failure does not stop the rest.
    async fn send_each<'a>(
        &self,
        conversation: &Conversation,
        notifications: impl IntoIterator<Item = Notification<'a>>,
    ) {
        for notification in notifications {
            let kind = notification.kind;
            let attendee_id = notification.attendee.id;
            if let Err(e) = self.send(conversation, notification).await {
                warn!(
                    target: "rs.backend.federation",
                    token = %conversation.token,
                    attendee_id = %attendee_id,
                    notification = kind.as_str(),
                    error = %e,
                    "Failed to notify remote server"
                );
            }
        }
    }
}

#[async_trait]
impl EventListener for FederationListener {
    fn name(&self) -> &'static str {
        "federation"
    }

    async fn on_event(&self, event: &DomainEvent) {
        match event {
            DomainEvent::AttendeesAdded {
                conversation,
                attendees,
            } => {
                let notifications = attendees.iter().filter(|a| a.is_federated()).map(|a| {
                    Notification::new(NotificationType::ShareCreated, a)
                        .with("roomName", conversation.name.clone())
                        .with("roomType", conversation.room_type.as_int())
                })
                    .collect::<Vec<_>>();
                self.send_each(conversation, notifications).await;
            }

            DomainEvent::AttendeesRemoved {
                conversation,
                attendees,
                reason,
                ..
            } if *reason != RemovalReason::RemoteGone => {
                let notifications = attendees.iter().filter(|a| a.is_federated()).map(|a| {
                    Notification::new(NotificationType::ShareUnshared, a)
                        .with("message", "This room has been unshared")
                })
                    .collect::<Vec<_>>();
                self.send_each(conversation, notifications).await;
            }

            DomainEvent::BeforeRoomDeleted {
                conversation,
                attendees,
                ..
            } => {
                let notifications = attendees.iter().filter(|a| a.is_federated()).map(|a| {
                    Notification::new(NotificationType::ShareUnshared, a)
                        .with("message", "This room has been unshared")
                })
                    .collect::<Vec<_>>();
                self.send_each(conversation, notifications).await;
            }

            DomainEvent::RoomModified {
                conversation,
                property,
                old,
                new,
                federated,
                ..
            } => {
                let notifications = federated.iter().map(|a| {
                    Notification::new(NotificationType::RoomModified, a)
                        .with("changedProperty", property.as_str())
                        .with("newValue", property_json(new))
                        .with("oldValue", property_json(old))
                })
                    .collect::<Vec<_>>();
                self.send_each(conversation, notifications).await;
            }

            DomainEvent::ParticipantModified {
                conversation,
                attendee,
                property,
                old,
                new,
                ..
            } if attendee.is_federated() => {
                let notification = Notification::new(NotificationType::ParticipantModified, attendee)
                    .with("changedProperty", property.as_str())
                    .with("newValue", property_json(new))
                    .with("oldValue", property_json(old));
                self.send_each(conversation, [notification]).await;
            }

            _ => {}
        }
    }
}
