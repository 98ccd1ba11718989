use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Envelope, UserProfile};

/// Frames sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated and registered
    Connected { id: Uuid, timestamp: DateTime<Utc> },

    /// A chat message, delivered to recipients and echoed to its sender
    Message {
        id: Uuid,
        conversation_id: Uuid,
        content: String,
        sender: UserProfile,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_id: Option<String>,
        /// Client correlation token, only present on the sender's echo
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },

    /// Reply to a client `ping`
    Pong { timestamp: DateTime<Utc> },

    /// Validation or persistence failure for one inbound frame
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
}

impl GatewayEvent {
    pub fn connected() -> Self {
        Self::Connected {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>, temp_id: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            temp_id,
        }
    }

    /// Wire form of a persisted envelope.
    pub fn message(envelope: &Envelope, sender: &UserProfile, recipient_id: Option<&str>) -> Self {
        Self::Message {
            id: envelope.id,
            conversation_id: envelope.conversation_id,
            content: envelope.content.clone(),
            sender: sender.clone(),
            timestamp: envelope.created_at,
            recipient_id: recipient_id.map(str::to_string),
            temp_id: None,
        }
    }

    /// Attach the client's correlation token. No-op for frames that don't carry one.
    pub fn with_temp_id(mut self, token: Option<String>) -> Self {
        if let Self::Message { temp_id, .. } = &mut self {
            *temp_id = token;
        }
        self
    }
}

/// Frames sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Send a chat message, addressed by conversation and/or recipient
    Message {
        #[serde(default)]
        content: Option<String>,
        /// Kept as text so a bad id is reported back instead of failing the frame
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        recipient_id: Option<String>,
        #[serde(default)]
        temp_id: Option<String>,
    },

    /// Application-level keepalive; answered with `pong`
    Ping,

    /// Any `type` this server doesn't understand
    #[serde(other)]
    Unknown,
}
