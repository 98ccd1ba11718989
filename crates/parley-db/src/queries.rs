use crate::Database;
use crate::models::{MessageRow, NewMessage};
use anyhow::Result;
use rusqlite::{Connection, Transaction};

const DIRECT_CHAT_NAME: &str = "Direct Chat";

impl Database {
    // -- Conversations --

    /// Create a conversation with its participants. Idempotent: existing rows
    /// are left untouched.
    pub fn create_conversation(&self, id: &str, name: &str, participants: &[&str]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            upsert_conversation(&tx, id, name, participants)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_participants(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| query_participants(conn, conversation_id))
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<()> {
        self.with_conn(|conn| {
            insert_message_row(conn, msg)?;
            Ok(())
        })
    }

    /// Insert a message for a two-party conversation, creating the
    /// conversation and both participant rows on first use.
    pub fn insert_direct_message(&self, msg: &NewMessage<'_>, participants: [&str; 2]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            upsert_conversation(&tx, msg.conversation_id, DIRECT_CHAT_NAME, &participants)?;
            insert_message_row(&tx, msg)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Set or clear `delivered_at`. Returns false when no such message exists.
    pub fn set_delivered(&self, id: &str, delivered_at: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET delivered_at = ?1 WHERE id = ?2",
                rusqlite::params![delivered_at, id],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }
}

fn upsert_conversation(tx: &Transaction<'_>, id: &str, name: &str, participants: &[&str]) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    tx.execute(
        "INSERT OR IGNORE INTO conversations (id, name, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, name, now],
    )?;

    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
    )?;
    for user_id in participants {
        stmt.execute(rusqlite::params![id, user_id, now])?;
    }

    Ok(())
}

fn insert_message_row(conn: &Connection, msg: &NewMessage<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, message_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            msg.id,
            msg.conversation_id,
            msg.sender_id,
            msg.content,
            msg.message_type,
            msg.created_at
        ],
    )?;
    Ok(())
}

fn query_participants(conn: &Connection, conversation_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1 ORDER BY joined_at",
    )?;

    let rows = stmt
        .query_map([conversation_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(rows)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, content, message_type, created_at, delivered_at, read_at
         FROM messages WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                content: row.get(3)?,
                message_type: row.get(4)?,
                created_at: row.get(5)?,
                delivered_at: row.get(6)?,
                read_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message<'a>(id: &'a str, conversation_id: &'a str) -> NewMessage<'a> {
        NewMessage {
            id,
            conversation_id,
            sender_id: "u1",
            content: "hi",
            message_type: "text",
            created_at: "2026-01-01T00:00:00+00:00",
        }
    }

    #[test]
    fn direct_message_creates_conversation_once() {
        let db = Database::open_in_memory().unwrap();

        db.insert_direct_message(&message("m1", "c1"), ["u1", "u2"]).unwrap();
        db.insert_direct_message(&message("m2", "c1"), ["u1", "u2"]).unwrap();

        let mut participants = db.get_participants("c1").unwrap();
        participants.sort();
        assert_eq!(participants, vec!["u1", "u2"]);

        let row = db.get_message("m2").unwrap().unwrap();
        assert_eq!(row.conversation_id, "c1");
        assert_eq!(row.sender_id, "u1");
        assert!(row.delivered_at.is_none());
        assert!(row.read_at.is_none());
    }

    #[test]
    fn message_requires_existing_conversation() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_message(&message("m1", "missing")).is_err());

        db.create_conversation("g1", "Team", &["u1", "u2", "u3"]).unwrap();
        db.insert_message(&message("m1", "g1")).unwrap();
        assert_eq!(db.get_participants("g1").unwrap().len(), 3);
    }

    #[test]
    fn duplicate_message_id_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_direct_message(&message("m1", "c1"), ["u1", "u2"]).unwrap();
        assert!(db.insert_direct_message(&message("m1", "c1"), ["u1", "u2"]).is_err());
    }

    #[test]
    fn set_delivered_round_trips() {
        let db = Database::open_in_memory().unwrap();
        db.insert_direct_message(&message("m1", "c1"), ["u1", "u2"]).unwrap();

        assert!(db.set_delivered("m1", Some("2026-01-01T00:00:01+00:00")).unwrap());
        let row = db.get_message("m1").unwrap().unwrap();
        assert_eq!(row.delivered_at.as_deref(), Some("2026-01-01T00:00:01+00:00"));

        assert!(db.set_delivered("m1", None).unwrap());
        assert!(db.get_message("m1").unwrap().unwrap().delivered_at.is_none());

        assert!(!db.set_delivered("nope", None).unwrap());
    }

    #[test]
    fn unknown_conversation_has_no_participants() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_participants("nobody").unwrap().is_empty());
        assert!(db.get_message("nothing").unwrap().is_none());
    }
}
