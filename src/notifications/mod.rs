//! Notification fan-out and the notification reader surface.
//!
//! Fan-out is best-effort: a failed insert must never fail the action that
//! triggered it (post creation, like, comment, follow), so callers go through
//! [`fan_out`], which logs and swallows errors.

use rusqlite::params;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::extractors::Principal;
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Like,
    Comment,
    Mention,
    Follow,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Like => "like",
            Kind::Comment => "comment",
            Kind::Mention => "mention",
            Kind::Follow => "follow",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotificationView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub post_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
    pub actor_id: String,
    pub actor_username: String,
    pub actor_avatar: Option<String>,
    pub post_content: Option<String>,
}

/// Insert a notification unless it would notify the actor about themselves or
/// duplicate an existing (recipient, type, post, actor) row.
pub fn create_notification(
    pool: &DbPool,
    recipient_id: &str,
    kind: Kind,
    post_id: Option<&str>,
    actor_id: &str,
) -> ApiResult<()> {
    if recipient_id == actor_id {
        return Ok(());
    }

    let conn = pool.get()?;

    // Uniqueness is constraint-enforced for both shapes: the composite index
    // covers post-scoped notifications, the partial index covers NULL-post
    // ones (follows), so a concurrent duplicate lands on OR IGNORE.
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT OR IGNORE INTO notifications (id, user_id, type, post_id, actor_id) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, recipient_id, kind.as_str(), post_id, actor_id],
    )?;
    Ok(())
}

/// Best-effort wrapper around [`create_notification`].
pub fn fan_out(pool: &DbPool, recipient_id: &str, kind: Kind, post_id: Option<&str>, actor_id: &str) {
    if let Err(e) = create_notification(pool, recipient_id, kind, post_id, actor_id) {
        tracing::warn!(
            kind = kind.as_str(),
            recipient = recipient_id,
            "Failed to create notification: {}",
            e
        );
    }
}

/// Pull `@username` tokens out of post content, de-duplicated in order of
/// first occurrence.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    let mut chars = content.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '@' {
            continue;
        }
        let mut token = String::new();
        while let Some(&(_, next)) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                token.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if !token.is_empty() && !mentions.contains(&token) {
            mentions.push(token);
        }
    }
    mentions
}

/// Resolve mentions in freshly created post content and notify each mentioned
/// user. The author never notifies themselves. Skipped entirely for ghost
/// posts by the caller.
pub fn notify_mentions(pool: &DbPool, post_id: &str, content: &str, actor_id: &str) {
    for username in extract_mentions(content) {
        let mentioned: Option<String> = match pool.get() {
            Ok(conn) => conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1",
                    params![username],
                    |row| row.get(0),
                )
                .ok(),
            Err(e) => {
                tracing::warn!("Failed to resolve mention @{}: {}", username, e);
                None
            }
        };

        if let Some(user_id) = mentioned {
            fan_out(pool, &user_id, Kind::Mention, Some(post_id), actor_id);
        }
    }
}

/// Newest-first notifications for the caller, joined with actor info and a
/// post preview where one exists (follow notifications carry none).
pub fn list_notifications(
    pool: &DbPool,
    principal: &Principal,
    limit: i64,
) -> ApiResult<Vec<NotificationView>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT n.id, n.type, n.post_id, n.is_read, n.created_at, \
                actor.id, actor.username, \
                (SELECT url FROM media WHERE entity_type = 'user_avatar' AND entity_id = actor.id \
                 ORDER BY position LIMIT 1), \
                p.content \
         FROM notifications n \
         JOIN users actor ON n.actor_id = actor.id \
         LEFT JOIN posts p ON n.post_id = p.id \
         WHERE n.user_id = ?1 \
         ORDER BY n.created_at DESC \
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![principal.user_id, limit], |row| {
            Ok(NotificationView {
                id: row.get(0)?,
                kind: row.get(1)?,
                post_id: row.get(2)?,
                is_read: row.get(3)?,
                created_at: row.get(4)?,
                actor_id: row.get(5)?,
                actor_username: row.get(6)?,
                actor_avatar: row.get(7)?,
                post_content: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn unread_count(pool: &DbPool, principal: &Principal) -> ApiResult<i64> {
    let conn = pool.get()?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
        params![principal.user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Mark one notification read. Scoped to the recipient so nobody can mark
/// another user's notifications.
pub fn mark_read(pool: &DbPool, principal: &Principal, notification_id: &str) -> ApiResult<()> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
        params![notification_id, principal.user_id],
    )?;
    if updated == 0 {
        return Err(ApiError::NotFound("Notification not found".into()));
    }
    Ok(())
}

pub fn mark_all_read(pool: &DbPool, principal: &Principal) -> ApiResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
        params![principal.user_id],
    )?;
    Ok(())
}
