pub mod session;

use rusqlite::params;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::media;
use crate::state::DbPool;

#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub major: Option<String>,
    pub avatar_url: Option<String>,
}

pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub major: Option<String>,
}

/// Register a new account. Password is bcrypt-hashed before it touches the
/// database; username/email uniqueness is backed by the schema.
pub fn register(pool: &DbPool, new_user: NewUser) -> ApiResult<AuthUser> {
    let username = new_user.username.trim().to_string();
    let email = new_user.email.trim().to_string();

    if username.len() < 3 || username.len() > 50 {
        return Err(ApiError::BadRequest(
            "Username must be between 3 and 50 characters".into(),
        ));
    }
    if !is_plausible_email(&email) {
        return Err(ApiError::BadRequest("Invalid email address".into()));
    }
    if new_user.password.len() < 6 {
        return Err(ApiError::BadRequest(
            "Password must be at least 6 characters".into(),
        ));
    }

    let conn = pool.get()?;

    let taken: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE username = ?1 OR email = ?2",
        params![username, email],
        |row| row.get(0),
    )?;
    if taken {
        return Err(ApiError::Conflict("Username or email already exists".into()));
    }

    let password_hash = bcrypt::hash(&new_user.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {e}")))?;

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash, major) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, username, email, password_hash, new_user.major],
    )?;

    Ok(AuthUser {
        id,
        username,
        email: Some(email),
        display_name: None,
        bio: None,
        major: new_user.major,
        avatar_url: None,
    })
}

/// Verify credentials and return the account. The error message is the same
/// for an unknown username and a wrong password.
pub fn login(pool: &DbPool, username: &str, password: &str) -> ApiResult<AuthUser> {
    let invalid = || ApiError::Unauthorized;

    let conn = pool.get()?;
    let row = conn.query_row(
        "SELECT id, username, email, password_hash, display_name, bio, major \
         FROM users WHERE username = ?1",
        params![username.trim()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        },
    );

    let (id, username, email, password_hash, display_name, bio, major) = match row {
        Ok(row) => row,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Err(invalid()),
        Err(e) => return Err(ApiError::Database(e)),
    };

    // Accounts provisioned externally carry no password credential.
    let hash = password_hash.ok_or_else(invalid)?;
    let ok = bcrypt::verify(password, &hash)
        .map_err(|e| ApiError::Internal(format!("Failed to verify password: {e}")))?;
    if !ok {
        return Err(invalid());
    }

    let avatar_url = media::avatar_url(&conn, &id)?;

    Ok(AuthUser {
        id,
        username,
        email,
        display_name,
        bio,
        major,
        avatar_url,
    })
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn pool() -> DbPool {
        let pool = db::create_test_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        pool
    }

    fn alice() -> NewUser {
        NewUser {
            username: "alice".into(),
            email: "alice@campus.edu".into(),
            password: "hunter22".into(),
            major: Some("CS".into()),
        }
    }

    #[test]
    fn register_then_login() {
        let pool = pool();
        let created = register(&pool, alice()).unwrap();
        assert_eq!(created.username, "alice");

        let user = login(&pool, "alice", "hunter22").unwrap();
        assert_eq!(user.id, created.id);
        assert_eq!(user.major.as_deref(), Some("CS"));
    }

    #[test]
    fn register_rejects_short_username() {
        let pool = pool();
        let mut user = alice();
        user.username = "ab".into();
        assert!(matches!(
            register(&pool, user),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn register_rejects_bad_email() {
        let pool = pool();
        let mut user = alice();
        user.email = "not-an-email".into();
        assert!(matches!(
            register(&pool, user),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn register_rejects_short_password() {
        let pool = pool();
        let mut user = alice();
        user.password = "short".into();
        assert!(matches!(
            register(&pool, user),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn duplicate_username_conflicts() {
        let pool = pool();
        register(&pool, alice()).unwrap();
        let mut dup = alice();
        dup.email = "other@campus.edu".into();
        assert!(matches!(register(&pool, dup), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn login_failure_is_uniform() {
        let pool = pool();
        register(&pool, alice()).unwrap();

        let unknown = login(&pool, "nobody", "hunter22").unwrap_err();
        let wrong = login(&pool, "alice", "wrong-password").unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
    }
}
