use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::NewMessage;
use parley_types::models::Envelope;

/// Durable message storage as the router sees it. Calls block, so the
/// router runs them on the blocking pool. Implementations must tolerate
/// concurrent callers.
pub trait MessageStore: Send + Sync + 'static {
    /// Persist an envelope whose conversation already exists.
    fn save(&self, envelope: &Envelope) -> Result<()>;

    /// Persist an envelope for a derived two-party conversation, creating the
    /// conversation and its participants on first use.
    fn save_direct(&self, envelope: &Envelope, participants: [&str; 2]) -> Result<()>;

    fn mark_delivered(&self, message_id: Uuid, delivered: bool, at: DateTime<Utc>) -> Result<()>;

    /// Participant user ids; empty when the conversation is unknown.
    fn participants(&self, conversation_id: Uuid) -> Result<Vec<String>>;
}

impl MessageStore for Database {
    fn save(&self, envelope: &Envelope) -> Result<()> {
        let ids = RowIds::of(envelope);
        self.insert_message(&ids.row(envelope))
    }

    fn save_direct(&self, envelope: &Envelope, participants: [&str; 2]) -> Result<()> {
        let ids = RowIds::of(envelope);
        self.insert_direct_message(&ids.row(envelope), participants)
    }

    fn mark_delivered(&self, message_id: Uuid, delivered: bool, at: DateTime<Utc>) -> Result<()> {
        let at = delivered.then(|| at.to_rfc3339());
        if !self.set_delivered(&message_id.to_string(), at.as_deref())? {
            anyhow::bail!("message {} not found", message_id);
        }
        Ok(())
    }

    fn participants(&self, conversation_id: Uuid) -> Result<Vec<String>> {
        self.get_participants(&conversation_id.to_string())
    }
}

/// Owned text forms of the envelope's non-string columns.
struct RowIds {
    id: String,
    conversation_id: String,
    created_at: String,
}

impl RowIds {
    fn of(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id.to_string(),
            conversation_id: envelope.conversation_id.to_string(),
            created_at: envelope.created_at.to_rfc3339(),
        }
    }

    fn row<'a>(&'a self, envelope: &'a Envelope) -> NewMessage<'a> {
        NewMessage {
            id: &self.id,
            conversation_id: &self.conversation_id,
            sender_id: &envelope.sender_id,
            content: &envelope.content,
            message_type: &envelope.content_type,
            created_at: &self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_store_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let envelope = Envelope::text(Uuid::new_v4(), "u1", "hi".into());

        db.save_direct(&envelope, ["u1", "u2"]).unwrap();
        let mut participants = db.participants(envelope.conversation_id).unwrap();
        participants.sort();
        assert_eq!(participants, vec!["u1", "u2"]);

        db.mark_delivered(envelope.id, true, Utc::now()).unwrap();
        let row = db.get_message(&envelope.id.to_string()).unwrap().unwrap();
        assert!(row.delivered_at.is_some());
        assert_eq!(row.message_type, "text");

        db.mark_delivered(envelope.id, false, Utc::now()).unwrap();
        let row = db.get_message(&envelope.id.to_string()).unwrap().unwrap();
        assert!(row.delivered_at.is_none());
    }

    #[test]
    fn save_into_unknown_conversation_fails() {
        let db = Database::open_in_memory().unwrap();
        let envelope = Envelope::text(Uuid::new_v4(), "u1", "hi".into());
        assert!(MessageStore::save(&db, &envelope).is_err());
    }

    #[test]
    fn mark_delivered_unknown_message_fails() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.mark_delivered(Uuid::new_v4(), true, Utc::now()).is_err());
    }
}
