//! Private messaging: one conversation per user pair, canonical ordering on
//! the pair so concurrent "start conversation" calls converge on one row.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::extractors::Principal;
use crate::state::DbPool;

pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub id: String,
    pub other_user_id: String,
    pub other_username: String,
    pub other_display_name: Option<String>,
    pub other_avatar_url: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: String,
    pub unread_count: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct StartedConversation {
    pub conversation_id: String,
    pub is_new: bool,
}

fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Start a conversation with another user, or return the existing one. The
/// (min, max) pair plus the unique index makes concurrent starts converge.
pub fn start_conversation(
    pool: &DbPool,
    principal: &Principal,
    other_user_id: &str,
) -> ApiResult<StartedConversation> {
    if other_user_id == principal.user_id {
        return Err(ApiError::BadRequest(
            "Cannot start conversation with yourself".into(),
        ));
    }

    let conn = pool.get()?;
    let other_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
        params![other_user_id],
        |row| row.get(0),
    )?;
    if !other_exists {
        return Err(ApiError::NotFound("User not found".into()));
    }

    let (user1, user2) = canonical_pair(&principal.user_id, other_user_id);

    let id = uuid::Uuid::now_v7().to_string();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conversations (id, user1_id, user2_id) VALUES (?1, ?2, ?3)",
        params![id, user1, user2],
    )?;

    let conversation_id: String = conn.query_row(
        "SELECT id FROM conversations WHERE user1_id = ?1 AND user2_id = ?2",
        params![user1, user2],
        |row| row.get(0),
    )?;

    Ok(StartedConversation {
        conversation_id,
        is_new: inserted > 0,
    })
}

fn is_participant(
    conn: &rusqlite::Connection,
    conversation_id: &str,
    user_id: &str,
) -> ApiResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM conversations \
             WHERE id = ?1 AND (user1_id = ?2 OR user2_id = ?2)",
            params![conversation_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// The caller's conversations, most recently active first, each with the
/// other user's identity, a last-message preview and an unread count.
pub fn list_conversations(pool: &DbPool, principal: &Principal) -> ApiResult<Vec<ConversationView>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT c.id, \
                other.id, other.username, other.display_name, \
                (SELECT url FROM media WHERE entity_type = 'user_avatar' AND entity_id = other.id \
                 ORDER BY position LIMIT 1), \
                (SELECT content FROM messages WHERE conversation_id = c.id \
                 ORDER BY created_at DESC, id DESC LIMIT 1), \
                c.last_message_at, \
                (SELECT COUNT(*) FROM messages WHERE conversation_id = c.id \
                 AND sender_id != ?1 AND is_read = 0), \
                c.created_at \
         FROM conversations c \
         JOIN users other ON other.id = CASE WHEN c.user1_id = ?1 THEN c.user2_id ELSE c.user1_id END \
         WHERE c.user1_id = ?1 OR c.user2_id = ?1 \
         ORDER BY c.last_message_at DESC",
    )?;
    let conversations = stmt
        .query_map(params![principal.user_id], |row| {
            Ok(ConversationView {
                id: row.get(0)?,
                other_user_id: row.get(1)?,
                other_username: row.get(2)?,
                other_display_name: row.get(3)?,
                other_avatar_url: row.get(4)?,
                last_message: row.get(5)?,
                last_message_at: row.get(6)?,
                unread_count: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(conversations)
}

/// Messages in a conversation the caller participates in, oldest first.
/// `before` pages backwards by message id.
pub fn list_messages(
    pool: &DbPool,
    principal: &Principal,
    conversation_id: &str,
    limit: i64,
    before: Option<&str>,
) -> ApiResult<Vec<MessageView>> {
    let limit = limit.clamp(1, 50);
    let conn = pool.get()?;
    if !is_participant(&conn, conversation_id, &principal.user_id)? {
        return Err(ApiError::Forbidden(
            "Access denied to this conversation".into(),
        ));
    }

    let mut messages = if let Some(before_id) = before {
        let mut stmt = conn.prepare(
            "SELECT m.id, m.conversation_id, m.sender_id, u.username, m.content, m.is_read, m.created_at \
             FROM messages m JOIN users u ON m.sender_id = u.id \
             WHERE m.conversation_id = ?1 AND m.id < ?2 \
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?3",
        )?;
        let page = stmt
            .query_map(params![conversation_id, before_id, limit], map_message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        page
    } else {
        let mut stmt = conn.prepare(
            "SELECT m.id, m.conversation_id, m.sender_id, u.username, m.content, m.is_read, m.created_at \
             FROM messages m JOIN users u ON m.sender_id = u.id \
             WHERE m.conversation_id = ?1 \
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?2",
        )?;
        let page = stmt
            .query_map(params![conversation_id, limit], map_message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        page
    };

    messages.reverse();
    Ok(messages)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageView> {
    Ok(MessageView {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        content: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Send a message; bumps the conversation's last_message_at in the same
/// transaction.
pub fn send_message(
    pool: &DbPool,
    principal: &Principal,
    conversation_id: &str,
    content: &str,
) -> ApiResult<MessageView> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Message content is required".into()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest(
            "Message too long. Maximum 2000 characters".into(),
        ));
    }

    let mut conn = pool.get()?;
    if !is_participant(&conn, conversation_id, &principal.user_id)? {
        return Err(ApiError::Forbidden(
            "Access denied to this conversation".into(),
        ));
    }

    let message_id = uuid::Uuid::now_v7().to_string();
    {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)",
            params![message_id, conversation_id, principal.user_id, content],
        )?;
        tx.execute(
            "UPDATE conversations SET last_message_at = datetime('now') WHERE id = ?1",
            params![conversation_id],
        )?;
        tx.commit()?;
    }

    let message = conn.query_row(
        "SELECT m.id, m.conversation_id, m.sender_id, u.username, m.content, m.is_read, m.created_at \
         FROM messages m JOIN users u ON m.sender_id = u.id WHERE m.id = ?1",
        params![message_id],
        map_message_row,
    )?;
    Ok(message)
}

/// Mark the other participant's messages in a conversation as read.
pub fn mark_read(pool: &DbPool, principal: &Principal, conversation_id: &str) -> ApiResult<()> {
    let conn = pool.get()?;
    if !is_participant(&conn, conversation_id, &principal.user_id)? {
        return Err(ApiError::Forbidden(
            "Access denied to this conversation".into(),
        ));
    }

    conn.execute(
        "UPDATE messages SET is_read = 1 \
         WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
        params![conversation_id, principal.user_id],
    )?;
    Ok(())
}

/// Unread messages addressed to the caller across all conversations.
pub fn unread_count(pool: &DbPool, principal: &Principal) -> ApiResult<i64> {
    let conn = pool.get()?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM messages m \
         JOIN conversations c ON m.conversation_id = c.id \
         WHERE (c.user1_id = ?1 OR c.user2_id = ?1) \
           AND m.sender_id != ?1 AND m.is_read = 0",
        params![principal.user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}
