use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiResult;
use crate::extractors::Principal;
use crate::messages;
use crate::state::AppState;

#[derive(Deserialize)]
struct MessagesQuery {
    conversation_id: String,
    limit: Option<i64>,
    before: Option<String>,
}

#[derive(Deserialize)]
struct StartRequest {
    user_id: String,
}

#[derive(Deserialize)]
struct SendRequest {
    conversation_id: String,
    content: String,
}

#[derive(Deserialize)]
struct MarkReadRequest {
    conversation_id: String,
}

async fn conversations(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<serde_json::Value>> {
    let conversations = messages::list_conversations(&state.db, &principal)?;
    Ok(Json(json!({ "success": true, "conversations": conversations })))
}

async fn list(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let messages = messages::list_messages(
        &state.db,
        &principal,
        &query.conversation_id,
        query.limit.unwrap_or(50),
        query.before.as_deref(),
    )?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

async fn start(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let started = messages::start_conversation(&state.db, &principal, &request.user_id)?;
    Ok(Json(json!({
        "success": true,
        "conversation_id": started.conversation_id,
        "is_new": started.is_new,
    })))
}

async fn send(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<SendRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let message =
        messages::send_message(&state.db, &principal, &request.conversation_id, &request.content)?;
    Ok(Json(json!({ "success": true, "message": message })))
}

async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<MarkReadRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    messages::mark_read(&state.db, &principal, &request.conversation_id)?;
    Ok(Json(json!({ "success": true })))
}

async fn unread_count(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<serde_json::Value>> {
    let count = messages::unread_count(&state.db, &principal)?;
    Ok(Json(json!({ "success": true, "count": count })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/messages", get(list))
        .route("/api/messages/conversations", get(conversations))
        .route("/api/messages/start", post(start))
        .route("/api/messages/send", post(send))
        .route("/api/messages/mark-read", post(mark_read))
        .route("/api/messages/unread-count", get(unread_count))
}
