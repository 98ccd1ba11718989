use uuid::Uuid;

use crate::error::ConversationIdError;

/// Stable id for the two-party conversation between `a` and `b`.
///
/// The pair is sorted before hashing, so the result does not depend on who
/// sends first. Ids are name-based (SHA-1) UUIDs in the nil namespace over
/// the concatenated identifiers.
pub fn conversation_id(a: &str, b: &str) -> Result<Uuid, ConversationIdError> {
    if a.is_empty() || b.is_empty() {
        return Err(ConversationIdError::EmptyParticipant);
    }

    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    let mut name = Vec::with_capacity(first.len() + second.len());
    name.extend_from_slice(first.as_bytes());
    name.extend_from_slice(second.as_bytes());

    Ok(Uuid::new_v5(&Uuid::nil(), &name))
}
