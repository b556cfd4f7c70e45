use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{self, session, NewUser};
use crate::error::{ApiError, ApiResult};
use crate::extractors::MaybePrincipal;
use crate::state::AppState;

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    major: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name,
        token,
        max_age_hours * 3600
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = auth::register(
        &state.db,
        NewUser {
            username: request.username,
            email: request.email,
            password: request.password,
            major: request.major,
        },
    )?;

    let token = session::create_session(&state.db, &user.id, state.config.auth.session_hours)?;
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "success": true, "user": user })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = auth::login(&state.db, &request.username, &request.password)
        .map_err(|e| match e {
            // Same message for unknown user and wrong password.
            ApiError::Unauthorized => {
                ApiError::BadRequest("Invalid username or password".into())
            }
            other => other,
        })?;

    let token = session::create_session(&state.db, &user.id, state.config.auth.session_hours)?;
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "success": true, "user": user })),
    ))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    if let Some(token) = cookie_value(&headers, &state.config.auth.cookie_name) {
        session::delete_session(&state.db, &token)?;
    }

    Ok((
        [(
            header::SET_COOKIE,
            clear_session_cookie(&state.config.auth.cookie_name),
        )],
        Json(json!({ "success": true })),
    ))
}

async fn verify(MaybePrincipal(principal): MaybePrincipal) -> Json<serde_json::Value> {
    match principal {
        Some(p) => Json(json!({
            "authenticated": true,
            "user_id": p.user_id,
            "username": p.username,
        })),
        None => Json(json!({ "authenticated": false })),
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let (key, value) = cookie.split_once('=')?;
            if key.trim() == name {
                Some(value.trim().to_string())
            } else {
                None
            }
        })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/verify", get(verify))
}
