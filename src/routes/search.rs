use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::posts;
use crate::social;
use crate::state::AppState;

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<i64>,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let q = query.q.as_deref().unwrap_or("").trim().to_string();
    if q.is_empty() {
        return Err(ApiError::BadRequest("Search query is required".into()));
    }
    if q.chars().count() < 2 {
        return Err(ApiError::BadRequest(
            "Search query must be at least 2 characters".into(),
        ));
    }

    let kind = query.kind.as_deref().unwrap_or("all");
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let posts = if kind == "posts" || kind == "all" {
        posts::search_posts(&state.db, &q, limit)?
    } else {
        Vec::new()
    };
    let users = if kind == "users" || kind == "all" {
        social::search_users(&state.db, &q, limit)?
    } else {
        Vec::new()
    };

    Ok(Json(json!({
        "success": true,
        "query": q,
        "posts": posts,
        "users": users,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/search", get(search))
}
