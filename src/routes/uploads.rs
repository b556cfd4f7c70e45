use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::extractors::Principal;
use crate::state::AppState;

// Keep the multipart limit above the validated file size so oversized
// uploads get the 400 from our check, not a generic body-limit rejection.
const BODY_LIMIT: usize = 8 * 1024 * 1024;

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

async fn upload(
    State(state): State<AppState>,
    _principal: Principal,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let content_type = field
            .content_type()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("Missing file content type".into()))?;
        let extension = extension_for(&content_type).ok_or_else(|| {
            ApiError::BadRequest(
                "Invalid file type. Only JPEG, PNG, GIF, and WebP images are allowed".into(),
            )
        })?;

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;
        if data.is_empty() {
            return Err(ApiError::BadRequest("No file uploaded".into()));
        }
        if data.len() as u64 > state.config.max_upload_bytes() {
            return Err(ApiError::BadRequest(
                "File too large. Maximum size is 5MB".into(),
            ));
        }

        let filename = format!("img_{}.{}", uuid::Uuid::now_v7(), extension);
        let uploads_dir = state.config.uploads_path();
        tokio::fs::create_dir_all(uploads_dir)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to create uploads dir: {e}")))?;
        tokio::fs::write(uploads_dir.join(&filename), &data)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to save uploaded file: {e}")))?;

        return Ok(Json(json!({
            "success": true,
            "url": format!("/uploads/{filename}"),
        })));
    }

    Err(ApiError::BadRequest("No file uploaded".into()))
}

async fn serve(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // Generated names only; anything path-like is rejected outright.
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(ApiError::NotFound("File not found".into()));
    }

    let path = state.config.uploads_path().join(&filename);
    let data = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("File not found".into()))?;

    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], data))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/upload",
            post(upload).layer(DefaultBodyLimit::max(BODY_LIMIT)),
        )
        .route("/uploads/{filename}", get(serve))
}
