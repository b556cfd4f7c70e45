use rand::Rng;
use rusqlite::params;

use crate::error::{ApiError, ApiResult};
use crate::state::DbPool;

/// Create a new session for a user. Returns the session token.
pub fn create_session(pool: &DbPool, user_id: &str, hours: u64) -> ApiResult<String> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id, token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Delete a session by token.
pub fn delete_session(pool: &DbPool, token: &str) -> ApiResult<()> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Resolve a session token to the owning user id, if the session is live.
pub fn resolve_session(pool: &DbPool, token: &str) -> ApiResult<Option<(String, String)>> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT u.id, u.username FROM sessions s \
         JOIN users u ON u.id = s.user_id \
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
        params![token],
        |row| Ok((row.get(0)?, row.get(1)?)),
    );
    match result {
        Ok(pair) => Ok(Some(pair)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(ApiError::Database(e)),
    }
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
    }

    #[test]
    fn session_round_trip() {
        let pool = db::create_test_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        pool.get()
            .unwrap()
            .execute("INSERT INTO users (id, username) VALUES ('u1', 'alice')", [])
            .unwrap();

        let token = create_session(&pool, "u1", 24).unwrap();
        let resolved = resolve_session(&pool, &token).unwrap();
        assert_eq!(resolved, Some(("u1".to_string(), "alice".to_string())));

        delete_session(&pool, &token).unwrap();
        assert_eq!(resolve_session(&pool, &token).unwrap(), None);
    }

    #[test]
    fn expired_session_does_not_resolve() {
        let pool = db::create_test_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();
        conn.execute("INSERT INTO users (id, username) VALUES ('u1', 'alice')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO sessions (id, user_id, token, expires_at) \
             VALUES ('s1', 'u1', 'stale', datetime('now', '-1 hour'))",
            [],
        )
        .unwrap();
        drop(conn);

        assert_eq!(resolve_session(&pool, "stale").unwrap(), None);
    }
}
