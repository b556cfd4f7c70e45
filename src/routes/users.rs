use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::extractors::{MaybePrincipal, Principal};
use crate::social::{self, ProfileUpdate};
use crate::state::AppState;

#[derive(Deserialize)]
struct ProfileQuery {
    id: Option<String>,
    username: Option<String>,
}

#[derive(Deserialize)]
struct UpdateRequest {
    display_name: Option<String>,
    bio: Option<String>,
    major: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct FollowRequest {
    user_id: String,
}

async fn get_profile(
    State(state): State<AppState>,
    MaybePrincipal(viewer): MaybePrincipal,
    Query(query): Query<ProfileQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if query.id.is_none() && query.username.is_none() {
        return Err(ApiError::BadRequest("User id or username is required".into()));
    }
    let viewer_id = viewer.as_ref().map(|p| p.user_id.as_str());
    let profile = social::get_profile(
        &state.db,
        query.id.as_deref(),
        query.username.as_deref(),
        viewer_id,
    )?;
    Ok(Json(json!({ "success": true, "user": profile })))
}

async fn update_profile(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<UpdateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let profile = social::update_profile(
        &state.db,
        &principal,
        ProfileUpdate {
            display_name: request.display_name,
            bio: request.bio,
            major: request.major,
            email: request.email,
            avatar_url: request.avatar_url,
        },
    )?;
    Ok(Json(json!({ "success": true, "user": profile })))
}

async fn toggle_follow(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<FollowRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (is_following, follower_count) =
        social::toggle_follow(&state.db, &principal, &request.user_id)?;
    Ok(Json(json!({
        "success": true,
        "is_following": is_following,
        "follower_count": follower_count,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(get_profile).put(update_profile))
        .route("/api/users/follow", post(toggle_follow))
}
