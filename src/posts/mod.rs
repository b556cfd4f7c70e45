//! Post store, engagement ledger and feed assembly.
//!
//! Ghost posts are stored with their true author and redacted at read time:
//! every view scrubs the identity to "Anonymous" while ownership checks keep
//! using the stored author id. Expiry is a lazy read-time filter — an expired
//! ghost post vanishes from every read surface without being deleted.

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::extractors::Principal;
use crate::media::{self, MediaItem};
use crate::notifications::{self, Kind};
use crate::state::DbPool;

pub const MAX_CONTENT_CHARS: usize = 500;
pub const MAX_IMAGES: usize = 4;
pub const MAX_GHOST_HOURS: i64 = 24 * 365;

const VISIBLE: &str = "(p.expires_at IS NULL OR p.expires_at > datetime('now'))";

#[derive(Debug, Serialize)]
pub struct PostView {
    pub id: String,
    pub content: String,
    pub is_ghost: bool,
    pub expires_at: Option<String>,
    pub likes_count: i64,
    pub comments_count: i64,
    pub created_at: String,
    /// None for ghost posts — identity is scrubbed before it leaves the store.
    pub user_id: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
    pub media: Vec<MediaItem>,
    pub liked_by_user: bool,
    pub bookmarked_by_user: bool,
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: String,
    pub post_id: String,
    pub content: String,
    pub created_at: String,
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

pub struct NewPost {
    pub content: String,
    pub image_urls: Vec<String>,
    pub is_ghost: bool,
    pub expires_in_hours: Option<i64>,
}

struct PostRow {
    id: String,
    content: String,
    image_url: Option<String>,
    is_ghost: bool,
    expires_at: Option<String>,
    likes_count: i64,
    comments_count: i64,
    created_at: String,
    author_id: String,
    author_username: String,
    author_avatar: Option<String>,
}

const POST_COLUMNS: &str = "p.id, p.content, p.image_url, p.is_ghost, p.expires_at, \
     p.likes_count, p.comments_count, p.created_at, \
     u.id, u.username, \
     (SELECT url FROM media WHERE entity_type = 'user_avatar' AND entity_id = u.id \
      ORDER BY position LIMIT 1)";

fn map_post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        content: row.get(1)?,
        image_url: row.get(2)?,
        is_ghost: row.get(3)?,
        expires_at: row.get(4)?,
        likes_count: row.get(5)?,
        comments_count: row.get(6)?,
        created_at: row.get(7)?,
        author_id: row.get(8)?,
        author_username: row.get(9)?,
        author_avatar: row.get(10)?,
    })
}

/// Create a post. Mention fan-out runs for non-ghost posts only; anonymity
/// takes precedence over mention notifications.
pub fn create_post(pool: &DbPool, principal: &Principal, new_post: NewPost) -> ApiResult<PostView> {
    let content = new_post.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Content is required".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::BadRequest(
            "Content must be 500 characters or less".into(),
        ));
    }

    let image_urls: Vec<String> = new_post
        .image_urls
        .into_iter()
        .filter(|u| !u.trim().is_empty())
        .collect();
    if image_urls.len() > MAX_IMAGES {
        return Err(ApiError::BadRequest(
            "A post can have at most 4 images".into(),
        ));
    }

    // Ghost posts without an explicit duration never expire.
    let expires_at = match (new_post.is_ghost, new_post.expires_in_hours) {
        (true, Some(hours)) if hours > MAX_GHOST_HOURS => {
            return Err(ApiError::BadRequest(
                "Expiry must be at most one year".into(),
            ));
        }
        (true, Some(hours)) if hours > 0 => Some(
            (Utc::now() + Duration::hours(hours))
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        _ => None,
    };

    let post_id = uuid::Uuid::now_v7().to_string();
    {
        let mut conn = pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO posts (id, user_id, content, is_ghost, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![post_id, principal.user_id, content, new_post.is_ghost, expires_at],
        )?;
        media::attach_images(&tx, media::ENTITY_POST, &post_id, &image_urls)?;
        tx.commit()?;
    }

    if !new_post.is_ghost {
        notifications::notify_mentions(pool, &post_id, &content, &principal.user_id);
    }

    get_post(pool, &post_id, Some(&principal.user_id))?
        .ok_or_else(|| ApiError::Internal("Created post not readable".into()))
}

/// Single post, viewer-scoped, honoring the expiry filter.
pub fn get_post(pool: &DbPool, post_id: &str, viewer: Option<&str>) -> ApiResult<Option<PostView>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON p.user_id = u.id \
         WHERE p.id = ?1 AND {VISIBLE}"
    );
    let row = conn
        .query_row(&sql, params![post_id], map_post_row)
        .optional()?;
    match row {
        Some(row) => Ok(Some(assemble_views(&conn, vec![row], viewer)?.remove(0))),
        None => Ok(None),
    }
}

/// Main feed (no author filter) or profile listing (author filter, which
/// additionally excludes ghost posts — even the viewer's own).
pub fn list_posts(
    pool: &DbPool,
    viewer: Option<&str>,
    page: i64,
    limit: i64,
    author: Option<&str>,
) -> ApiResult<Vec<PostView>> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    // Query-string page numbers are unbounded; keep the offset arithmetic safe.
    let offset = page.saturating_sub(1).saturating_mul(limit);

    let conn = pool.get()?;
    let rows = if let Some(author_id) = author {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON p.user_id = u.id \
             WHERE p.user_id = ?1 AND p.is_ghost = 0 AND {VISIBLE} \
             ORDER BY p.created_at DESC, p.id DESC LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![author_id, limit, offset], map_post_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON p.user_id = u.id \
             WHERE {VISIBLE} \
             ORDER BY p.created_at DESC, p.id DESC LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit, offset], map_post_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    assemble_views(&conn, rows, viewer)
}

/// Posts the caller bookmarked, newest bookmark first.
pub fn list_bookmarks(pool: &DbPool, principal: &Principal) -> ApiResult<Vec<PostView>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {POST_COLUMNS} FROM bookmarks b \
         JOIN posts p ON b.post_id = p.id \
         JOIN users u ON p.user_id = u.id \
         WHERE b.user_id = ?1 AND {VISIBLE} \
         ORDER BY b.created_at DESC, b.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![principal.user_id], map_post_row)?
        .collect::<Result<Vec<_>, _>>()?;

    assemble_views(&conn, rows, Some(&principal.user_id))
}

/// Substring search over non-ghost, non-expired post content.
pub fn search_posts(pool: &DbPool, query: &str, limit: i64) -> ApiResult<Vec<PostView>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON p.user_id = u.id \
         WHERE p.content LIKE ?1 AND p.is_ghost = 0 AND {VISIBLE} \
         ORDER BY p.created_at DESC, p.id DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![format!("%{query}%"), limit], map_post_row)?
        .collect::<Result<Vec<_>, _>>()?;

    assemble_views(&conn, rows, None)
}

/// Delete a post the caller owns. Ownership is checked against the stored
/// author, so ghost posts remain deletable by (and only by) their author.
pub fn delete_post(pool: &DbPool, principal: &Principal, post_id: &str) -> ApiResult<()> {
    let mut conn = pool.get()?;
    let author: Option<String> = conn
        .query_row(
            "SELECT user_id FROM posts WHERE id = ?1",
            params![post_id],
            |row| row.get(0),
        )
        .optional()?;

    let author = author.ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
    if author != principal.user_id {
        return Err(ApiError::Forbidden(
            "You can only delete your own posts".into(),
        ));
    }

    // Likes, comments and notifications go via FK cascade; media rows are
    // attached generically and need explicit cleanup. Same transaction so a
    // failure cannot leave orphaned media rows.
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;
    media::delete_for_entity(&tx, media::ENTITY_POST, post_id)?;
    tx.commit()?;
    Ok(())
}

/// Toggle a like. Relation row and denormalized counter move in the same
/// transaction so concurrent toggles cannot lose updates.
pub fn toggle_like(pool: &DbPool, principal: &Principal, post_id: &str) -> ApiResult<(bool, i64)> {
    let mut conn = pool.get()?;

    let author: Option<String> = conn
        .query_row(
            &format!("SELECT user_id FROM posts p WHERE p.id = ?1 AND {VISIBLE}"),
            params![post_id],
            |row| row.get(0),
        )
        .optional()?;
    let author = author.ok_or_else(|| ApiError::NotFound("Post not found".into()))?;

    let liked = {
        let tx = conn.transaction()?;
        let existing: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, principal.user_id],
            |row| row.get(0),
        )?;

        let liked = if existing {
            tx.execute(
                "DELETE FROM likes WHERE post_id = ?1 AND user_id = ?2",
                params![post_id, principal.user_id],
            )?;
            tx.execute(
                "UPDATE posts SET likes_count = likes_count - 1 WHERE id = ?1",
                params![post_id],
            )?;
            false
        } else {
            let id = uuid::Uuid::now_v7().to_string();
            tx.execute(
                "INSERT INTO likes (id, post_id, user_id) VALUES (?1, ?2, ?3)",
                params![id, post_id, principal.user_id],
            )?;
            tx.execute(
                "UPDATE posts SET likes_count = likes_count + 1 WHERE id = ?1",
                params![post_id],
            )?;
            true
        };
        tx.commit()?;
        liked
    };

    let likes_count: i64 = conn.query_row(
        "SELECT likes_count FROM posts WHERE id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;
    // Release the connection before fan-out; it draws its own from the pool.
    drop(conn);

    if liked {
        notifications::fan_out(pool, &author, Kind::Like, Some(post_id), &principal.user_id);
    }
    Ok((liked, likes_count))
}

/// Toggle a bookmark. No counter and no notification.
pub fn toggle_bookmark(pool: &DbPool, principal: &Principal, post_id: &str) -> ApiResult<bool> {
    let conn = pool.get()?;

    let exists: bool = conn.query_row(
        &format!("SELECT COUNT(*) > 0 FROM posts p WHERE p.id = ?1 AND {VISIBLE}"),
        params![post_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(ApiError::NotFound("Post not found".into()));
    }

    let bookmarked: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM bookmarks WHERE post_id = ?1 AND user_id = ?2",
        params![post_id, principal.user_id],
        |row| row.get(0),
    )?;

    if bookmarked {
        conn.execute(
            "DELETE FROM bookmarks WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, principal.user_id],
        )?;
        Ok(false)
    } else {
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT OR IGNORE INTO bookmarks (id, post_id, user_id) VALUES (?1, ?2, ?3)",
            params![id, post_id, principal.user_id],
        )?;
        Ok(true)
    }
}

/// Append a comment and bump the denormalized counter in one transaction.
pub fn add_comment(
    pool: &DbPool,
    principal: &Principal,
    post_id: &str,
    content: &str,
) -> ApiResult<CommentView> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest(
            "Comment content cannot be empty".into(),
        ));
    }

    let mut conn = pool.get()?;
    let author: Option<String> = conn
        .query_row(
            &format!("SELECT user_id FROM posts p WHERE p.id = ?1 AND {VISIBLE}"),
            params![post_id],
            |row| row.get(0),
        )
        .optional()?;
    let author = author.ok_or_else(|| ApiError::NotFound("Post not found".into()))?;

    let comment_id = uuid::Uuid::now_v7().to_string();
    {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO comments (id, post_id, user_id, content) VALUES (?1, ?2, ?3, ?4)",
            params![comment_id, post_id, principal.user_id, content],
        )?;
        tx.execute(
            "UPDATE posts SET comments_count = comments_count + 1 WHERE id = ?1",
            params![post_id],
        )?;
        tx.commit()?;
    }

    let comment = conn.query_row(
        "SELECT c.id, c.post_id, c.content, c.created_at, u.id, u.username, \
                (SELECT url FROM media WHERE entity_type = 'user_avatar' AND entity_id = u.id \
                 ORDER BY position LIMIT 1) \
         FROM comments c JOIN users u ON c.user_id = u.id WHERE c.id = ?1",
        params![comment_id],
        map_comment_row,
    )?;
    // Release the connection before fan-out; it draws its own from the pool.
    drop(conn);

    notifications::fan_out(pool, &author, Kind::Comment, Some(post_id), &principal.user_id);
    Ok(comment)
}

/// Comments for a visible post, oldest first.
pub fn list_comments(pool: &DbPool, post_id: &str) -> ApiResult<Vec<CommentView>> {
    let conn = pool.get()?;

    let visible: bool = conn.query_row(
        &format!("SELECT COUNT(*) > 0 FROM posts p WHERE p.id = ?1 AND {VISIBLE}"),
        params![post_id],
        |row| row.get(0),
    )?;
    if !visible {
        return Err(ApiError::NotFound("Post not found".into()));
    }

    let mut stmt = conn.prepare(
        "SELECT c.id, c.post_id, c.content, c.created_at, u.id, u.username, \
                (SELECT url FROM media WHERE entity_type = 'user_avatar' AND entity_id = u.id \
                 ORDER BY position LIMIT 1) \
         FROM comments c JOIN users u ON c.user_id = u.id \
         WHERE c.post_id = ?1 ORDER BY c.created_at ASC, c.id ASC",
    )?;
    let comments = stmt
        .query_map(params![post_id], map_comment_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

fn map_comment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentView> {
    Ok(CommentView {
        id: row.get(0)?,
        post_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        user_id: row.get(4)?,
        username: row.get(5)?,
        avatar_url: row.get(6)?,
    })
}

/// Decorate raw post rows: per-viewer liked/bookmarked flags, media arrays
/// (with legacy single-image fallback), and ghost redaction.
fn assemble_views(
    conn: &Connection,
    rows: Vec<PostRow>,
    viewer: Option<&str>,
) -> ApiResult<Vec<PostView>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut media_by_post = media::for_entities(conn, media::ENTITY_POST, &ids)?;

    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        let (liked, bookmarked) = match viewer {
            Some(viewer_id) => {
                let liked: bool = conn.query_row(
                    "SELECT COUNT(*) > 0 FROM likes WHERE post_id = ?1 AND user_id = ?2",
                    params![row.id, viewer_id],
                    |r| r.get(0),
                )?;
                let bookmarked: bool = conn.query_row(
                    "SELECT COUNT(*) > 0 FROM bookmarks WHERE post_id = ?1 AND user_id = ?2",
                    params![row.id, viewer_id],
                    |r| r.get(0),
                )?;
                (liked, bookmarked)
            }
            None => (false, false),
        };

        let mut items = media_by_post.remove(&row.id).unwrap_or_default();
        if items.is_empty() {
            // Legacy rows store a single image url on the post itself.
            if let Some(url) = row.image_url.clone() {
                items.push(MediaItem {
                    url,
                    media_type: "image".to_string(),
                    position: 0,
                });
            }
        }

        let (user_id, username, avatar_url) = if row.is_ghost {
            (None, "Anonymous".to_string(), None)
        } else {
            (
                Some(row.author_id),
                row.author_username,
                row.author_avatar,
            )
        };

        views.push(PostView {
            id: row.id,
            content: row.content,
            is_ghost: row.is_ghost,
            expires_at: row.expires_at,
            likes_count: row.likes_count,
            comments_count: row.comments_count,
            created_at: row.created_at,
            user_id,
            username,
            avatar_url,
            media: items,
            liked_by_user: liked,
            bookmarked_by_user: bookmarked,
        });
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn principal(id: &str, name: &str) -> Principal {
        Principal {
            user_id: id.to_string(),
            username: name.to_string(),
        }
    }

    fn pool_with_users() -> DbPool {
        let pool = db::create_test_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, username) VALUES ('ua', 'alice');
             INSERT INTO users (id, username) VALUES ('ub', 'bob');",
        )
        .unwrap();
        pool
    }

    fn plain_post(content: &str) -> NewPost {
        NewPost {
            content: content.to_string(),
            image_urls: vec![],
            is_ghost: false,
            expires_in_hours: None,
        }
    }

    fn likes_in_db(pool: &DbPool, post_id: &str) -> i64 {
        pool.get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
                params![post_id],
                |r| r.get(0),
            )
            .unwrap()
    }

    #[test]
    fn create_rejects_empty_and_oversized_content() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");

        assert!(matches!(
            create_post(&pool, &alice, plain_post("   ")),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            create_post(&pool, &alice, plain_post(&"x".repeat(501))),
            Err(ApiError::BadRequest(_))
        ));
        // Exactly at the limit is fine.
        create_post(&pool, &alice, plain_post(&"x".repeat(500))).unwrap();
    }

    #[test]
    fn create_rejects_more_than_four_images() {
        let pool = pool_with_users();
        let urls: Vec<String> = (0..5).map(|i| format!("/uploads/{i}.png")).collect();
        let result = create_post(
            &pool,
            &principal("ua", "alice"),
            NewPost {
                content: "pics".into(),
                image_urls: urls,
                is_ghost: false,
                expires_in_hours: None,
            },
        );
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn create_rejects_out_of_range_expiry() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");

        let absurd = NewPost {
            content: "soon gone".into(),
            image_urls: vec![],
            is_ghost: true,
            expires_in_hours: Some(i64::MAX),
        };
        assert!(matches!(
            create_post(&pool, &alice, absurd),
            Err(ApiError::BadRequest(_))
        ));

        // The cap itself is accepted.
        let at_cap = NewPost {
            content: "long secret".into(),
            image_urls: vec![],
            is_ghost: true,
            expires_in_hours: Some(MAX_GHOST_HOURS),
        };
        assert!(create_post(&pool, &alice, at_cap).unwrap().expires_at.is_some());
    }

    #[test]
    fn absurd_page_numbers_return_empty_not_panic() {
        let pool = pool_with_users();
        create_post(&pool, &principal("ua", "alice"), plain_post("only one")).unwrap();

        assert!(list_posts(&pool, None, i64::MAX, 100, None).unwrap().is_empty());
        assert_eq!(list_posts(&pool, None, -5, 100, None).unwrap().len(), 1);
    }

    #[test]
    fn created_post_starts_with_zero_counters() {
        let pool = pool_with_users();
        let post = create_post(&pool, &principal("ua", "alice"), plain_post("hello")).unwrap();
        assert_eq!(post.likes_count, 0);
        assert_eq!(post.comments_count, 0);
        assert_eq!(post.username, "alice");
        assert_eq!(post.user_id.as_deref(), Some("ua"));
    }

    #[test]
    fn ghost_post_view_is_anonymous() {
        let pool = pool_with_users();
        let post = create_post(
            &pool,
            &principal("ua", "alice"),
            NewPost {
                content: "whisper".into(),
                image_urls: vec![],
                is_ghost: true,
                expires_in_hours: Some(1),
            },
        )
        .unwrap();

        assert!(post.is_ghost);
        assert_eq!(post.username, "Anonymous");
        assert!(post.user_id.is_none());
        assert!(post.avatar_url.is_none());
        assert!(post.expires_at.is_some());

        // True authorship survives in storage.
        let stored_author: String = pool
            .get()
            .unwrap()
            .query_row(
                "SELECT user_id FROM posts WHERE id = ?1",
                params![post.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stored_author, "ua");
    }

    #[test]
    fn ghost_without_duration_never_expires() {
        let pool = pool_with_users();
        let post = create_post(
            &pool,
            &principal("ua", "alice"),
            NewPost {
                content: "forever".into(),
                image_urls: vec![],
                is_ghost: true,
                expires_in_hours: None,
            },
        )
        .unwrap();
        assert!(post.expires_at.is_none());
        assert_eq!(list_posts(&pool, None, 1, 20, None).unwrap().len(), 1);
    }

    #[test]
    fn mentions_fan_out_skips_ghost_posts() {
        let pool = pool_with_users();
        create_post(
            &pool,
            &principal("ua", "alice"),
            NewPost {
                content: "hi @bob".into(),
                image_urls: vec![],
                is_ghost: true,
                expires_in_hours: Some(1),
            },
        )
        .unwrap();
        let bob = principal("ub", "bob");
        assert_eq!(notifications::unread_count(&pool, &bob).unwrap(), 0);

        create_post(&pool, &principal("ua", "alice"), plain_post("Hello @bob #exam")).unwrap();
        assert_eq!(notifications::unread_count(&pool, &bob).unwrap(), 1);
    }

    #[test]
    fn expired_ghost_hidden_from_every_read_but_still_stored() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        let post = create_post(
            &pool,
            &alice,
            NewPost {
                content: "fading secret".into(),
                image_urls: vec![],
                is_ghost: true,
                expires_in_hours: Some(1),
            },
        )
        .unwrap();

        // Visible while active, as Anonymous.
        let feed = list_posts(&pool, Some("ua"), 1, 20, None).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].username, "Anonymous");

        // Force expiry.
        pool.get()
            .unwrap()
            .execute(
                "UPDATE posts SET expires_at = datetime('now', '-1 hour') WHERE id = ?1",
                params![post.id],
            )
            .unwrap();

        assert!(list_posts(&pool, Some("ua"), 1, 20, None).unwrap().is_empty());
        assert!(search_posts(&pool, "fading", 20).unwrap().is_empty());
        assert!(list_posts(&pool, Some("ua"), 1, 20, Some("ua"))
            .unwrap()
            .is_empty());
        assert!(get_post(&pool, &post.id, None).unwrap().is_none());

        // Not physically deleted: the owner can still delete it.
        delete_post(&pool, &alice, &post.id).unwrap();
        assert!(matches!(
            delete_post(&pool, &alice, &post.id),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn profile_listing_excludes_own_ghost_posts() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        create_post(&pool, &alice, plain_post("public note")).unwrap();
        create_post(
            &pool,
            &alice,
            NewPost {
                content: "secret".into(),
                image_urls: vec![],
                is_ghost: true,
                expires_in_hours: None,
            },
        )
        .unwrap();

        let profile = list_posts(&pool, Some("ua"), 1, 20, Some("ua")).unwrap();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile[0].content, "public note");

        // Both appear on the main feed.
        assert_eq!(list_posts(&pool, Some("ua"), 1, 20, None).unwrap().len(), 2);
    }

    #[test]
    fn like_toggle_is_idempotent_over_even_sequences() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        let bob = principal("ub", "bob");
        let post = create_post(&pool, &alice, plain_post("like me")).unwrap();

        let (liked, count) = toggle_like(&pool, &bob, &post.id).unwrap();
        assert!(liked);
        assert_eq!(count, 1);
        assert_eq!(likes_in_db(&pool, &post.id), 1);

        let (liked, count) = toggle_like(&pool, &bob, &post.id).unwrap();
        assert!(!liked);
        assert_eq!(count, 0);
        assert_eq!(likes_in_db(&pool, &post.id), 0);

        // Counter mirrors relation cardinality after arbitrary sequences.
        for _ in 0..5 {
            toggle_like(&pool, &bob, &post.id).unwrap();
        }
        let stored: i64 = pool
            .get()
            .unwrap()
            .query_row(
                "SELECT likes_count FROM posts WHERE id = ?1",
                params![post.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stored, likes_in_db(&pool, &post.id));
        assert_eq!(stored, 1);
    }

    #[test]
    fn liking_notifies_author_once_unliking_never() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        let bob = principal("ub", "bob");
        let post = create_post(&pool, &alice, plain_post("like me")).unwrap();

        toggle_like(&pool, &bob, &post.id).unwrap();
        toggle_like(&pool, &bob, &post.id).unwrap();
        toggle_like(&pool, &bob, &post.id).unwrap();

        // Like, unlike, re-like: the dedup rule keeps it at one notification.
        assert_eq!(notifications::unread_count(&pool, &alice).unwrap(), 1);

        // Liking your own post never notifies.
        toggle_like(&pool, &alice, &post.id).unwrap();
        assert_eq!(notifications::unread_count(&pool, &alice).unwrap(), 1);
    }

    #[test]
    fn like_unknown_post_is_not_found() {
        let pool = pool_with_users();
        assert!(matches!(
            toggle_like(&pool, &principal("ua", "alice"), "missing"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn comments_increment_counter_and_notify() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        let bob = principal("ub", "bob");
        let post = create_post(&pool, &alice, plain_post("discuss")).unwrap();

        assert!(matches!(
            add_comment(&pool, &bob, &post.id, "  "),
            Err(ApiError::BadRequest(_))
        ));

        add_comment(&pool, &bob, &post.id, "first").unwrap();
        // Ids are time-ordered at millisecond granularity; keep writes apart.
        std::thread::sleep(std::time::Duration::from_millis(3));
        add_comment(&pool, &bob, &post.id, "second").unwrap();

        let (count, stored): (i64, i64) = {
            let conn = pool.get().unwrap();
            let relation = conn
                .query_row(
                    "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
                    params![post.id],
                    |r| r.get(0),
                )
                .unwrap();
            let counter = conn
                .query_row(
                    "SELECT comments_count FROM posts WHERE id = ?1",
                    params![post.id],
                    |r| r.get(0),
                )
                .unwrap();
            (relation, counter)
        };
        assert_eq!(count, 2);
        assert_eq!(stored, 2);

        assert_eq!(notifications::unread_count(&pool, &alice).unwrap(), 1);

        let comments = list_comments(&pool, &post.id).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].content, "first");
        assert_eq!(comments[1].username, "bob");
    }

    #[test]
    fn bookmark_toggle_round_trip() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        let bob = principal("ub", "bob");
        let post = create_post(&pool, &alice, plain_post("keep this")).unwrap();

        assert!(toggle_bookmark(&pool, &bob, &post.id).unwrap());
        let saved = list_bookmarks(&pool, &bob).unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].bookmarked_by_user);

        assert!(!toggle_bookmark(&pool, &bob, &post.id).unwrap());
        assert!(list_bookmarks(&pool, &bob).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_and_is_owner_only() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        let bob = principal("ub", "bob");
        let post = create_post(
            &pool,
            &alice,
            NewPost {
                content: "ephemeral".into(),
                image_urls: vec!["/uploads/pic.png".into()],
                is_ghost: false,
                expires_in_hours: None,
            },
        )
        .unwrap();

        toggle_like(&pool, &bob, &post.id).unwrap();
        add_comment(&pool, &bob, &post.id, "nice").unwrap();
        add_comment(&pool, &alice, &post.id, "thanks").unwrap();

        assert!(matches!(
            delete_post(&pool, &bob, &post.id),
            Err(ApiError::Forbidden(_))
        ));

        delete_post(&pool, &alice, &post.id).unwrap();

        let conn = pool.get().unwrap();
        let likes: i64 = conn
            .query_row("SELECT COUNT(*) FROM likes", [], |r| r.get(0))
            .unwrap();
        let comments: i64 = conn
            .query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))
            .unwrap();
        let media_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM media", [], |r| r.get(0))
            .unwrap();
        assert_eq!(likes, 0);
        assert_eq!(comments, 0);
        assert_eq!(media_rows, 0);
        drop(conn);

        assert!(matches!(
            delete_post(&pool, &alice, &post.id),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn viewer_flags_are_per_viewer() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        let bob = principal("ub", "bob");
        let post = create_post(&pool, &alice, plain_post("flag test")).unwrap();
        toggle_like(&pool, &bob, &post.id).unwrap();

        let as_bob = &list_posts(&pool, Some("ub"), 1, 20, None).unwrap()[0];
        assert!(as_bob.liked_by_user);
        let as_alice = &list_posts(&pool, Some("ua"), 1, 20, None).unwrap()[0];
        assert!(!as_alice.liked_by_user);
        let anonymous = &list_posts(&pool, None, 1, 20, None).unwrap()[0];
        assert!(!anonymous.liked_by_user);
    }

    #[test]
    fn media_array_normalizes_legacy_single_image() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        let with_list = create_post(
            &pool,
            &alice,
            NewPost {
                content: "gallery".into(),
                image_urls: vec!["/uploads/a.png".into(), "/uploads/b.png".into()],
                is_ghost: false,
                expires_in_hours: None,
            },
        )
        .unwrap();
        assert_eq!(with_list.media.len(), 2);
        assert_eq!(with_list.media[0].url, "/uploads/a.png");

        // Legacy row with only image_url set.
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO posts (id, user_id, content, image_url) \
                 VALUES ('legacy', 'ua', 'old style', '/uploads/old.png')",
                [],
            )
            .unwrap();
        let legacy = get_post(&pool, "legacy", None).unwrap().unwrap();
        assert_eq!(legacy.media.len(), 1);
        assert_eq!(legacy.media[0].url, "/uploads/old.png");
    }

    #[test]
    fn pagination_pages_through_feed() {
        let pool = pool_with_users();
        let alice = principal("ua", "alice");
        for i in 0..5 {
            create_post(&pool, &alice, plain_post(&format!("post {i}"))).unwrap();
            // Ids are time-ordered at millisecond granularity; keep posts apart.
            std::thread::sleep(std::time::Duration::from_millis(3));
        }

        let first = list_posts(&pool, None, 1, 2, None).unwrap();
        let second = list_posts(&pool, None, 2, 2, None).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(first[0].content, "post 4");
        assert_eq!(second[0].content, "post 2");
        assert_ne!(first[0].id, second[0].id);
    }
}
