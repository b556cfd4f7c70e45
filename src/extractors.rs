use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use rusqlite::params;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller, resolved from the session cookie. Threaded into
/// every core operation as an explicit value rather than ambient state.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
}

/// Extractor that requires authentication. Returns 401 if no valid session.
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_session_token(parts, &state.config.auth.cookie_name)
            .ok_or(ApiError::Unauthorized)?;

        let conn = state.db.get()?;
        conn.query_row(
            "SELECT u.id, u.username FROM sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.token = ?1 AND s.expires_at > datetime('now')",
            params![token],
            |row| {
                Ok(Principal {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                })
            },
        )
        .map_err(|_| ApiError::Unauthorized)
    }
}

/// Optional variant — returns None instead of 401 when not authenticated.
/// Read surfaces use this to compute viewer-scoped flags for logged-in callers
/// while staying open to anonymous ones.
pub struct MaybePrincipal(pub Option<Principal>);

impl FromRequestParts<AppState> for MaybePrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Principal::from_request_parts(parts, state).await {
            Ok(principal) => Ok(MaybePrincipal(Some(principal))),
            Err(_) => Ok(MaybePrincipal(None)),
        }
    }
}

fn extract_session_token<'a>(parts: &'a Parts, cookie_name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == cookie_name {
                Some(val)
            } else {
                None
            }
        })
}
