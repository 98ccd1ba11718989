use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationIdError {
    #[error("participant identifier must not be empty")]
    EmptyParticipant,
}

/// Token verification failures at the upgrade handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token has an empty subject")]
    EmptySubject,
}

/// Why a frame could not be placed on an endpoint's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is at capacity; the peer is not keeping up.
    #[error("outbound queue full")]
    Full,

    /// The endpoint is already closing or closed.
    #[error("endpoint closing")]
    Closed,
}

/// Failures while routing one inbound frame. None of these are fatal to the
/// connection that sent the frame.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(&'static str),

    #[error(transparent)]
    ConversationId(#[from] ConversationIdError),

    #[error("failed to persist message: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl RouteError {
    /// Text sent back to the client in an `error` frame. Storage details stay
    /// in the server log.
    pub fn client_message(&self) -> &'static str {
        match self {
            RouteError::Malformed(_) => "malformed message",
            RouteError::Validation(reason) => reason,
            RouteError::ConversationId(_) => "invalid participant identifier",
            RouteError::Persistence(_) => "message could not be delivered, please retry",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("read deadline ({read_deadline:?}) must be at least twice the heartbeat interval ({heartbeat:?})")]
    DeadlineTooShort {
        read_deadline: Duration,
        heartbeat: Duration,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
