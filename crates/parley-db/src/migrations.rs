use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Users live with the sign-in service, so `sender_id` and `user_id` are
/// opaque text with no foreign key.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            user_id          TEXT NOT NULL,
            joined_at        TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL,
            content          TEXT NOT NULL,
            message_type     TEXT NOT NULL DEFAULT 'text',
            created_at       TEXT NOT NULL,
            delivered_at     TEXT,
            read_at          TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
