use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::extractors::{MaybePrincipal, Principal};
use crate::posts::{self, NewPost};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Deserialize)]
struct CreatePostRequest {
    content: String,
    #[serde(default)]
    image_urls: Vec<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    is_ghost: bool,
    expires_in_hours: Option<i64>,
}

#[derive(Deserialize)]
struct ListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct PostIdQuery {
    id: Option<String>,
    post_id: Option<String>,
}

#[derive(Deserialize)]
struct PostIdBody {
    post_id: String,
}

#[derive(Deserialize)]
struct CommentBody {
    post_id: String,
    content: String,
}

/// Clients send `is_ghost` as a bool, a string ("true"/"1"/"yes") or a
/// number. Normalize here so the core only ever sees a typed boolean.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Num(i64),
        Str(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => b,
        Raw::Num(n) => n != 0,
        Raw::Str(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
    })
}

async fn list_posts(
    State(state): State<AppState>,
    MaybePrincipal(viewer): MaybePrincipal,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let viewer_id = viewer.as_ref().map(|p| p.user_id.as_str());

    let posts = posts::list_posts(&state.db, viewer_id, page, limit, query.user_id.as_deref())?;
    Ok(Json(json!({
        "success": true,
        "posts": posts,
        "page": page,
        "limit": limit,
    })))
}

async fn create_post(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let post = posts::create_post(
        &state.db,
        &principal,
        NewPost {
            content: request.content,
            image_urls: request.image_urls,
            is_ghost: request.is_ghost,
            expires_in_hours: request.expires_in_hours,
        },
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "post": post })),
    ))
}

async fn delete_post(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<PostIdQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let post_id = query
        .id
        .or(query.post_id)
        .ok_or_else(|| ApiError::BadRequest("Post ID is required".into()))?;
    posts::delete_post(&state.db, &principal, &post_id)?;
    Ok(Json(json!({ "success": true })))
}

async fn toggle_like(
    State(state): State<AppState>,
    principal: Principal,
    Json(body): Json<PostIdBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let (liked, likes_count) = posts::toggle_like(&state.db, &principal, &body.post_id)?;
    Ok(Json(json!({
        "success": true,
        "liked": liked,
        "likes_count": likes_count,
    })))
}

async fn toggle_bookmark(
    State(state): State<AppState>,
    principal: Principal,
    Json(body): Json<PostIdBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let bookmarked = posts::toggle_bookmark(&state.db, &principal, &body.post_id)?;
    Ok(Json(json!({ "success": true, "bookmarked": bookmarked })))
}

async fn add_comment(
    State(state): State<AppState>,
    principal: Principal,
    Json(body): Json<CommentBody>,
) -> ApiResult<impl IntoResponse> {
    let comment = posts::add_comment(&state.db, &principal, &body.post_id, &body.content)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "comment": comment })),
    ))
}

async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<PostIdQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let post_id = query
        .post_id
        .or(query.id)
        .ok_or_else(|| ApiError::BadRequest("Post ID is required".into()))?;
    let comments = posts::list_comments(&state.db, &post_id)?;
    Ok(Json(json!({ "success": true, "comments": comments })))
}

async fn list_bookmarks(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<serde_json::Value>> {
    let posts = posts::list_bookmarks(&state.db, &principal)?;
    Ok(Json(json!({ "success": true, "posts": posts })))
}

async fn user_posts(
    State(state): State<AppState>,
    MaybePrincipal(viewer): MaybePrincipal,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let author = query
        .user_id
        .ok_or_else(|| ApiError::BadRequest("User ID is required".into()))?;
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let viewer_id = viewer.as_ref().map(|p| p.user_id.as_str());

    let posts = posts::list_posts(&state.db, viewer_id, page, limit, Some(&author))?;
    Ok(Json(json!({
        "success": true,
        "posts": posts,
        "page": page,
        "limit": limit,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/posts",
            get(list_posts).post(create_post).delete(delete_post),
        )
        .route("/api/posts/user", get(user_posts))
        .route("/api/posts/like", post(toggle_like))
        .route("/api/posts/bookmark", post(toggle_bookmark))
        .route("/api/posts/comment", post(add_comment))
        .route("/api/posts/comments", get(list_comments))
        .route("/api/posts/bookmarks", get(list_bookmarks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct GhostFlag {
        #[serde(default, deserialize_with = "lenient_bool")]
        is_ghost: bool,
    }

    fn parse(raw: &str) -> bool {
        serde_json::from_str::<GhostFlag>(raw).unwrap().is_ghost
    }

    #[test]
    fn lenient_bool_accepts_mixed_representations() {
        assert!(parse(r#"{"is_ghost": true}"#));
        assert!(parse(r#"{"is_ghost": "true"}"#));
        assert!(parse(r#"{"is_ghost": "1"}"#));
        assert!(parse(r#"{"is_ghost": "yes"}"#));
        assert!(parse(r#"{"is_ghost": 1}"#));

        assert!(!parse(r#"{"is_ghost": false}"#));
        assert!(!parse(r#"{"is_ghost": "false"}"#));
        assert!(!parse(r#"{"is_ghost": "no"}"#));
        assert!(!parse(r#"{"is_ghost": 0}"#));
        assert!(!parse(r#"{}"#));
    }
}
