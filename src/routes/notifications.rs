use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiResult;
use crate::extractors::Principal;
use crate::notifications;
use crate::state::AppState;

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct MarkReadRequest {
    notification_id: String,
}

async fn list(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let notifications = notifications::list_notifications(&state.db, &principal, limit)?;
    Ok(Json(json!({ "success": true, "notifications": notifications })))
}

async fn unread_count(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<serde_json::Value>> {
    let count = notifications::unread_count(&state.db, &principal)?;
    Ok(Json(json!({ "success": true, "count": count })))
}

async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<MarkReadRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    notifications::mark_read(&state.db, &principal, &request.notification_id)?;
    Ok(Json(json!({ "success": true })))
}

async fn mark_all_read(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<serde_json::Value>> {
    notifications::mark_all_read(&state.db, &principal)?;
    Ok(Json(json!({ "success": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/mark-read", post(mark_read))
        .route("/api/notifications/mark-all-read", post(mark_all_read))
}
