//! 라우트 핸들러
//!
//! 모든 실패는 `RagError`의 JSON 응답으로 반환됩니다 (추출기 거부 포함).

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::error::{RagError, Result};
use crate::knowledge::SessionId;
use crate::service::{ChatRequest, ChatResponse, UploadResponse, UploadedFile};

use super::AppState;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// POST /sessions
pub async fn create_session(State(state): State<AppState>) -> Result<(StatusCode, Json<Value>)> {
    let id = state.create_session()?;
    Ok((StatusCode::CREATED, Json(json!({ "session_id": id }))))
}

/// DELETE /sessions/:id
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let id = SessionId::parse(&id)?;
    state.delete_session(&id).await?;
    Ok(Json(json!({ "deleted": id })))
}

/// POST /upload - multipart `files` (또는 `files[]`), 선택적 `session_id`
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut session: Option<SessionId> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RagError::InvalidInput(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "session_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| RagError::InvalidInput(format!("Failed to read session_id: {}", e)))?;
                if !text.trim().is_empty() {
                    session = Some(SessionId::parse(&text)?);
                }
            }
            "files" | "files[]" | "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    RagError::InvalidInput(format!("Failed to read {}: {}", file_name, e))
                })?;
                tracing::info!("Received {} ({} bytes)", file_name, bytes.len());
                files.push(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            other => tracing::debug!("Ignoring multipart field {:?}", other),
        }
    }

    Ok(Json(state.upload(session, files).await?))
}

/// POST /chat
pub async fn chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let Json(request) = payload.map_err(|e| RagError::InvalidInput(e.body_text()))?;
    Ok(Json(state.chat(&request).await?))
}

// ============================================================================
// Tests
// ============================================================================
