use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::Claims;

const ANONYMOUS_NAME: &str = "Anonymous User";

/// The identity attached to a live connection. Immutable for the lifetime of
/// the connection it was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(rename = "avatarUrl")]
    pub avatar_url: String,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            avatar_url: default_avatar_url(&name),
            name,
            public_key: None,
        }
    }
}

impl From<Claims> for UserProfile {
    fn from(claims: Claims) -> Self {
        let name = claims
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_NAME.to_string());
        let avatar_url = claims
            .avatar_url
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| default_avatar_url(&name));

        Self {
            id: claims.sub,
            name,
            avatar_url,
            public_key: claims.public_key,
        }
    }
}

fn default_avatar_url(name: &str) -> String {
    format!("https://ui-avatars.com/api/?name={}", urlencoding::encode(name))
}

/// Canonical server-side representation of one chat message.
///
/// Only `delivered_at` and `read_at` ever change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub content: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Build a fresh text envelope with a server-assigned id and timestamp.
    pub fn text(conversation_id: Uuid, sender_id: &str, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: sender_id.to_string(),
            content,
            content_type: "text".to_string(),
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        }
    }
}
