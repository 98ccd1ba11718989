use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::Envelope;

use crate::conversation::conversation_id;
use crate::endpoint::Endpoint;
use crate::error::{EnqueueError, RouteError};
use crate::registry::PresenceRegistry;
use crate::store::MessageStore;

/// Validates inbound frames, persists chat messages and fans them out to
/// live endpoints.
#[derive(Clone)]
pub struct MessageRouter {
    registry: PresenceRegistry,
    store: Arc<dyn MessageStore>,
}

/// Who a validated chat message is for.
enum Audience {
    /// One recipient. `derived` means the conversation id came from the
    /// participant pair and the conversation may not exist yet.
    Direct {
        recipient_id: String,
        conversation_id: Uuid,
        derived: bool,
    },
    /// Every participant of an existing conversation.
    Conversation {
        conversation_id: Uuid,
        participants: Vec<String>,
    },
}

impl MessageRouter {
    pub fn new(registry: PresenceRegistry, store: Arc<dyn MessageStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Handle one raw text frame from `sender`. Never fails: bad input is
    /// logged and, for chat messages, reported back to the sender only.
    pub async fn route(&self, sender: &Endpoint, raw: &str) {
        let cmd = match serde_json::from_str::<GatewayCommand>(raw) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(
                    "{} sent a bad frame: {} -- raw: {}",
                    sender.user_id(),
                    RouteError::from(e),
                    truncate(raw, 200)
                );
                return;
            }
        };

        match cmd {
            GatewayCommand::Ping => {
                self.deliver(sender, GatewayEvent::pong()).await;
            }
            GatewayCommand::Unknown => {
                debug!("{} sent a frame of unknown type, ignored", sender.user_id());
            }
            GatewayCommand::Message {
                content,
                conversation_id,
                recipient_id,
                temp_id,
            } => {
                if let Err(e) = self
                    .route_message(sender, content, conversation_id, recipient_id, temp_id.clone())
                    .await
                {
                    match &e {
                        RouteError::Persistence(_) => error!("{} message dropped: {}", sender.user_id(), e),
                        _ => warn!("{} message rejected: {}", sender.user_id(), e),
                    }
                    self.deliver(sender, GatewayEvent::error(e.client_message(), temp_id))
                        .await;
                }
            }
        }
    }

    async fn route_message(
        &self,
        sender: &Endpoint,
        content: Option<String>,
        conversation: Option<String>,
        recipient: Option<String>,
        temp_id: Option<String>,
    ) -> Result<(), RouteError> {
        let content = content
            .filter(|c| !c.trim().is_empty())
            .ok_or(RouteError::Validation("message content is empty"))?;
        let recipient = recipient.filter(|r| !r.is_empty());

        let audience = self.resolve_audience(sender, conversation, recipient).await?;

        let conversation_id = match &audience {
            Audience::Direct { conversation_id, .. } | Audience::Conversation { conversation_id, .. } => {
                *conversation_id
            }
        };
        let envelope = Envelope::text(conversation_id, sender.user_id(), content);

        // Durability boundary: nothing is fanned out unless this succeeds.
        let direct_pair = match &audience {
            Audience::Direct {
                recipient_id,
                derived: true,
                ..
            } => Some([sender.user_id().to_string(), recipient_id.clone()]),
            _ => None,
        };
        let to_save = envelope.clone();
        self.blocking(move |store| match &direct_pair {
            Some([a, b]) => store.save_direct(&to_save, [a.as_str(), b.as_str()]),
            None => store.save(&to_save),
        })
        .await?;

        let (delivered, echo) = match &audience {
            Audience::Direct { recipient_id, .. } => {
                let event = GatewayEvent::message(&envelope, sender.user(), Some(recipient_id));
                let delivered = if recipient_id == sender.user_id() {
                    // The sender is its own recipient and is online.
                    true
                } else {
                    match self.registry.lookup(recipient_id) {
                        Some(target) => self.deliver(&target, event.clone()).await,
                        None => {
                            debug!("{} is offline, message {} stored only", recipient_id, envelope.id);
                            false
                        }
                    }
                };
                (delivered, event)
            }
            Audience::Conversation { participants, .. } => {
                let event = GatewayEvent::message(&envelope, sender.user(), None);
                let mut reached = 0usize;
                for target in self.registry.snapshot() {
                    if target.user_id() == sender.user_id()
                        || !participants.iter().any(|p| p == target.user_id())
                    {
                        continue;
                    }
                    if self.deliver(&target, event.clone()).await {
                        reached += 1;
                    }
                }
                (reached > 0, event)
            }
        };

        debug!(
            "{} -> conversation {}: message {} (delivered: {})",
            sender.user_id(),
            conversation_id,
            envelope.id,
            delivered
        );

        // Storage reflects delivery before the sender sees the confirmation.
        if delivered {
            let id = envelope.id;
            if let Err(e) = self
                .blocking(move |store| store.mark_delivered(id, true, Utc::now()))
                .await
            {
                warn!("Failed to mark message {} delivered: {}", id, e);
            }
        }

        self.deliver(sender, echo.with_temp_id(temp_id)).await;

        Ok(())
    }

    async fn resolve_audience(
        &self,
        sender: &Endpoint,
        conversation: Option<String>,
        recipient: Option<String>,
    ) -> Result<Audience, RouteError> {
        let Some(explicit) = conversation.filter(|c| !c.is_empty()) else {
            let recipient_id = recipient.ok_or(RouteError::Validation(
                "message needs a conversation_id or recipient_id",
            ))?;
            return Ok(Audience::Direct {
                conversation_id: conversation_id(sender.user_id(), &recipient_id)?,
                recipient_id,
                derived: true,
            });
        };
        let explicit = Uuid::parse_str(&explicit)
            .map_err(|_| RouteError::Validation("conversation_id is not a valid id"))?;

        let participants = self
            .blocking(move |store| store.participants(explicit))
            .await?;
        if participants.is_empty() {
            return Err(RouteError::Validation("unknown conversation"));
        }
        if !participants.iter().any(|p| p == sender.user_id()) {
            return Err(RouteError::Validation("not a participant of this conversation"));
        }

        match recipient {
            Some(recipient_id) if !participants.contains(&recipient_id) => Err(
                RouteError::Validation("recipient is not a participant of this conversation"),
            ),
            Some(recipient_id) => Ok(Audience::Direct {
                recipient_id,
                conversation_id: explicit,
                derived: false,
            }),
            None => Ok(Audience::Conversation {
                conversation_id: explicit,
                participants,
            }),
        }
    }

    /// Non-blocking enqueue. A full queue means the peer can't keep up: the
    /// endpoint is closed and unregistered. Returns whether the frame was queued.
    async fn deliver(&self, target: &Endpoint, event: GatewayEvent) -> bool {
        match target.try_enqueue(event) {
            Ok(()) => true,
            Err(EnqueueError::Full) => {
                warn!(
                    "{} outbound queue full, dropping connection {}",
                    target.user_id(),
                    target.id()
                );
                target.close();
                if self.registry.unregister(target).await {
                    info!("{} removed from presence (slow consumer)", target.user_id());
                }
                false
            }
            Err(EnqueueError::Closed) => {
                debug!("{} connection {} is closing, frame dropped", target.user_id(), target.id());
                false
            }
        }
    }

    /// Run a store call on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T, RouteError>
    where
        F: FnOnce(&dyn MessageStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| RouteError::Persistence(anyhow::anyhow!("storage task failed: {}", e)))?
            .map_err(RouteError::Persistence)
    }
}

fn truncate(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
