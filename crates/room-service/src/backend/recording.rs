//! Recording server notifications.
//!
//! A moderator changing `call_recording` to a starting state sends
//! `start`; a moderator stopping it sends `stop`. Status changes reported
//! by the recording server itself carry no actor and are not echoed back.

use super::signaling::http_base_url;
use super::transport::{BackendClient, BackendError};
use super::NotifyError;
use crate::events::{DomainEvent, EventListener, PropertyValue, RoomProperty};
use crate::model::{ActorRef, CallRecording, Conversation};
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

fn actor_json(actor: &ActorRef) -> Value {
    json!({
        "type": actor.actor_type.as_str(),
        "id": actor.actor_id,
    })
}

/// The message for a recording status change, if one is sent.
fn payload_for(new: &PropertyValue, actor: Option<&ActorRef>) -> Option<Value> {
    let PropertyValue::Int(code) = new else {
        return None;
    };
    let actor = actor?;
    match CallRecording::from_int(*code)? {
        CallRecording::StartingVideo | CallRecording::StartingAudio => {
            let status = if *code == CallRecording::StartingVideo.as_int() {
                CallRecording::Video
            } else {
                CallRecording::Audio
            };
            Some(json!({
                "type": "start",
                "start": {
                    "status": status.as_int(),
                    "owner": actor.actor_id,
                    "actor": actor_json(actor),
                },
            }))
        }
        CallRecording::Stopped => Some(json!({
            "type": "stop",
            "stop": {
                "actor": actor_json(actor),
            },
        })),
        _ => None,
    }
}

#[derive(Debug)]
pub struct RecordingListener {
    client: BackendClient,
    server: String,
    secret: SecretString,
}

impl RecordingListener {
    #[must_use]
    pub fn new(client: BackendClient, server: &str, secret: SecretString) -> Self {
        Self {
            client,
            server: http_base_url(server),
            secret,
        }
    }

    async fn send(&self, conversation: &Conversation, payload: &Value) -> Result<(), NotifyError> {
        let url = format!("{}/api/v1/room/{}", self.server, conversation.token);
        self.client
            .notify(&url, self.secret.expose_secret().as_bytes(), payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventListener for RecordingListener {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn on_event(&self, event: &DomainEvent) {
        let DomainEvent::RoomModified {
            conversation,
            property: RoomProperty::CallRecording,
            new,
            actor,
            ..
        } = event
        else {
            return;
        };
        let Some(payload) = payload_for(new, actor.as_ref()) else {
            return;
        };
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match self.send(conversation, &payload).await {
            Ok(()) => {
                debug!(target: "rs.backend.recording", token = %conversation.token, message = %kind, "Recording server notified");
            }
            Err(NotifyError::Backend(BackendError::NotFound)) if kind == "stop" => {
                info!(target: "rs.backend.recording", token = %conversation.token, "Recording not found");
            }
            Err(e) => {
                warn!(
                    target: "rs.backend.recording",
                    token = %conversation.token,
                    message = %kind,
                    error = %e,
                    "Failed to notify recording server"
                );
            }
        }
    }
}
