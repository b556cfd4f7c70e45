//! Follow edges and profile aggregation.
//!
//! Follower/following counts are live COUNT aggregations rather than stored
//! counters: profile reads are rare next to feed reads, and the edge table
//! stays the single source of truth.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::extractors::Principal;
use crate::media;
use crate::notifications::{self, Kind};
use crate::state::DbPool;

#[derive(Debug, Serialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub major: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub created_at: String,
    pub post_count: i64,
    pub follower_count: i64,
    pub following_count: i64,
    pub is_following: bool,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub bio: Option<String>,
    pub major: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

#[derive(Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub major: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// Toggle a follow edge. Following (not unfollowing) fans out a notification.
pub fn toggle_follow(
    pool: &DbPool,
    principal: &Principal,
    target_id: &str,
) -> ApiResult<(bool, i64)> {
    if principal.user_id == target_id {
        return Err(ApiError::BadRequest("Cannot follow yourself".into()));
    }

    let conn = pool.get()?;
    let target_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
        params![target_id],
        |row| row.get(0),
    )?;
    if !target_exists {
        return Err(ApiError::NotFound("User not found".into()));
    }

    let following: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM followers WHERE follower_id = ?1 AND following_id = ?2",
        params![principal.user_id, target_id],
        |row| row.get(0),
    )?;

    let is_following = if following {
        conn.execute(
            "DELETE FROM followers WHERE follower_id = ?1 AND following_id = ?2",
            params![principal.user_id, target_id],
        )?;
        false
    } else {
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT OR IGNORE INTO followers (id, follower_id, following_id) VALUES (?1, ?2, ?3)",
            params![id, principal.user_id, target_id],
        )?;
        true
    };
    drop(conn);

    if is_following {
        notifications::fan_out(pool, target_id, Kind::Follow, None, &principal.user_id);
    }

    let follower_count = follower_count(pool, target_id)?;
    Ok((is_following, follower_count))
}

pub fn follower_count(pool: &DbPool, user_id: &str) -> ApiResult<i64> {
    let conn = pool.get()?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM followers WHERE following_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Profile by id or username, with viewer-scoped is_following.
pub fn get_profile(
    pool: &DbPool,
    id: Option<&str>,
    username: Option<&str>,
    viewer: Option<&str>,
) -> ApiResult<Profile> {
    let conn = pool.get()?;

    let row = match (id, username) {
        (Some(id), _) => conn
            .query_row(
                "SELECT id, username, display_name, bio, major, created_at \
                 FROM users WHERE id = ?1",
                params![id],
                map_user_core,
            )
            .optional()?,
        (None, Some(username)) => conn
            .query_row(
                "SELECT id, username, display_name, bio, major, created_at \
                 FROM users WHERE username = ?1",
                params![username],
                map_user_core,
            )
            .optional()?,
        (None, None) => {
            return Err(ApiError::BadRequest("User id or username is required".into()))
        }
    };
    let (id, username, display_name, bio, major, created_at) =
        row.ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    // Ghost posts stay out of the public post count.
    let post_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM posts p WHERE p.user_id = ?1 AND p.is_ghost = 0 \
         AND (p.expires_at IS NULL OR p.expires_at > datetime('now'))",
        params![id],
        |row| row.get(0),
    )?;
    let follower_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM followers WHERE following_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let following_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM followers WHERE follower_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let is_following = match viewer {
        Some(viewer_id) => conn.query_row(
            "SELECT COUNT(*) > 0 FROM followers WHERE follower_id = ?1 AND following_id = ?2",
            params![viewer_id, id],
            |row| row.get(0),
        )?,
        None => false,
    };

    let avatar_url = media::avatar_url(&conn, &id)?;
    let banner_url = media::banner_url(&conn, &id)?;

    Ok(Profile {
        id,
        username,
        display_name,
        bio,
        major,
        avatar_url,
        banner_url,
        created_at,
        post_count,
        follower_count,
        following_count,
        is_following,
    })
}

type UserCore = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

fn map_user_core(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserCore> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

/// Update the caller's own profile fields. Only provided fields change.
pub fn update_profile(
    pool: &DbPool,
    principal: &Principal,
    update: ProfileUpdate,
) -> ApiResult<Profile> {
    if update.display_name.is_none()
        && update.bio.is_none()
        && update.major.is_none()
        && update.email.is_none()
        && update.avatar_url.is_none()
    {
        return Err(ApiError::BadRequest("No valid fields to update".into()));
    }

    let conn = pool.get()?;
    if let Some(display_name) = &update.display_name {
        conn.execute(
            "UPDATE users SET display_name = ?1 WHERE id = ?2",
            params![display_name, principal.user_id],
        )?;
    }
    if let Some(bio) = &update.bio {
        conn.execute(
            "UPDATE users SET bio = ?1 WHERE id = ?2",
            params![bio, principal.user_id],
        )?;
    }
    if let Some(major) = &update.major {
        conn.execute(
            "UPDATE users SET major = ?1 WHERE id = ?2",
            params![major, principal.user_id],
        )?;
    }
    if let Some(email) = &update.email {
        conn.execute(
            "UPDATE users SET email = ?1 WHERE id = ?2",
            params![email, principal.user_id],
        )?;
    }
    if let Some(avatar_url) = &update.avatar_url {
        media::set_avatar(&conn, &principal.user_id, avatar_url)?;
    }
    drop(conn);

    get_profile(pool, Some(&principal.user_id), None, Some(&principal.user_id))
}

/// Substring search over username and bio.
pub fn search_users(pool: &DbPool, query: &str, limit: i64) -> ApiResult<Vec<UserSummary>> {
    let conn = pool.get()?;
    let pattern = format!("%{query}%");
    let mut stmt = conn.prepare(
        "SELECT id, username, bio, major, \
                (SELECT url FROM media WHERE entity_type = 'user_avatar' AND entity_id = users.id \
                 ORDER BY position LIMIT 1), \
                created_at \
         FROM users \
         WHERE username LIKE ?1 OR bio LIKE ?1 \
         ORDER BY username ASC LIMIT ?2",
    )?;
    let users = stmt
        .query_map(params![pattern, limit], |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                username: row.get(1)?,
                bio: row.get(2)?,
                major: row.get(3)?,
                avatar_url: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}
