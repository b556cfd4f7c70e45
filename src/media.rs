//! Generic media attachment table shared by post images, avatars and banners.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::ApiResult;

pub const ENTITY_POST: &str = "post";
pub const ENTITY_USER_AVATAR: &str = "user_avatar";
pub const ENTITY_USER_BANNER: &str = "user_banner";

#[derive(Debug, Clone, Serialize)]
pub struct MediaItem {
    pub url: String,
    pub media_type: String,
    pub position: i64,
}

/// Attach an ordered list of image urls to an entity.
pub fn attach_images(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    urls: &[String],
) -> ApiResult<()> {
    for (position, url) in urls.iter().enumerate() {
        if url.is_empty() {
            continue;
        }
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO media (id, entity_type, entity_id, url, media_type, position) \
             VALUES (?1, ?2, ?3, ?4, 'image', ?5)",
            params![id, entity_type, entity_id, url, position as i64],
        )?;
    }
    Ok(())
}

/// Media for one entity, ordered by position.
pub fn for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> ApiResult<Vec<MediaItem>> {
    let mut stmt = conn.prepare(
        "SELECT url, media_type, position FROM media \
         WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY position ASC",
    )?;
    let items = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok(MediaItem {
                url: row.get(0)?,
                media_type: row.get(1)?,
                position: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Media for many entities at once, grouped by entity id. Avoids a query per
/// post when assembling a feed page.
pub fn for_entities(
    conn: &Connection,
    entity_type: &str,
    entity_ids: &[String],
) -> ApiResult<HashMap<String, Vec<MediaItem>>> {
    let mut grouped: HashMap<String, Vec<MediaItem>> = HashMap::new();
    if entity_ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders = (2..entity_ids.len() + 2)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT entity_id, url, media_type, position FROM media \
         WHERE entity_type = ?1 AND entity_id IN ({placeholders}) \
         ORDER BY entity_id, position ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut values: Vec<&dyn rusqlite::ToSql> = vec![&entity_type];
    for id in entity_ids {
        values.push(id);
    }

    let rows = stmt.query_map(values.as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            MediaItem {
                url: row.get(1)?,
                media_type: row.get(2)?,
                position: row.get(3)?,
            },
        ))
    })?;

    for row in rows {
        let (entity_id, item) = row?;
        grouped.entry(entity_id).or_default().push(item);
    }
    Ok(grouped)
}

/// Remove every media row attached to an entity.
pub fn delete_for_entity(conn: &Connection, entity_type: &str, entity_id: &str) -> ApiResult<()> {
    conn.execute(
        "DELETE FROM media WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type, entity_id],
    )?;
    Ok(())
}

/// Replace a user's avatar with a new url.
pub fn set_avatar(conn: &Connection, user_id: &str, url: &str) -> ApiResult<()> {
    delete_for_entity(conn, ENTITY_USER_AVATAR, user_id)?;
    attach_images(conn, ENTITY_USER_AVATAR, user_id, &[url.to_string()])
}

pub fn avatar_url(conn: &Connection, user_id: &str) -> ApiResult<Option<String>> {
    Ok(for_entity(conn, ENTITY_USER_AVATAR, user_id)?
        .into_iter()
        .next()
        .map(|m| m.url))
}

pub fn banner_url(conn: &Connection, user_id: &str) -> ApiResult<Option<String>> {
    Ok(for_entity(conn, ENTITY_USER_BANNER, user_id)?
        .into_iter()
        .next()
        .map(|m| m.url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::state::DbPool;

    fn pool() -> DbPool {
        let pool = db::create_test_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        pool
    }

    #[test]
    fn attach_preserves_order_and_skips_empty() {
        let pool = pool();
        let conn = pool.get().unwrap();
        attach_images(
            &conn,
            ENTITY_POST,
            "p1",
            &[
                "/uploads/a.png".to_string(),
                String::new(),
                "/uploads/b.png".to_string(),
            ],
        )
        .unwrap();

        let items = for_entity(&conn, ENTITY_POST, "p1").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "/uploads/a.png");
        assert_eq!(items[1].url, "/uploads/b.png");
        assert!(items[0].position < items[1].position);
    }

    #[test]
    fn for_entities_groups_by_id() {
        let pool = pool();
        let conn = pool.get().unwrap();
        attach_images(&conn, ENTITY_POST, "p1", &["/uploads/a.png".to_string()]).unwrap();
        attach_images(
            &conn,
            ENTITY_POST,
            "p2",
            &["/uploads/b.png".to_string(), "/uploads/c.png".to_string()],
        )
        .unwrap();

        let grouped =
            for_entities(&conn, ENTITY_POST, &["p1".to_string(), "p2".to_string()]).unwrap();
        assert_eq!(grouped["p1"].len(), 1);
        assert_eq!(grouped["p2"].len(), 2);
    }

    #[test]
    fn set_avatar_replaces_previous() {
        let pool = pool();
        let conn = pool.get().unwrap();
        set_avatar(&conn, "u1", "/uploads/old.png").unwrap();
        set_avatar(&conn, "u1", "/uploads/new.png").unwrap();

        assert_eq!(
            avatar_url(&conn, "u1").unwrap().as_deref(),
            Some("/uploads/new.png")
        );
        let count = for_entity(&conn, ENTITY_USER_AVATAR, "u1").unwrap().len();
        assert_eq!(count, 1);
    }
}
