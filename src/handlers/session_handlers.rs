//! HTTP handlers for upload sessions: open, upload a slot image, drop a card.

use crate::{errors::AppError, handlers::caller::CallerId, state::AppState};
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional body of `POST /theme-assets/sessions`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionReq {
    pub theme_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: Uuid,
    pub theme_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDeleted {
    pub deleted_count: usize,
}

/// `POST /theme-assets/sessions`. An empty body opens a session for a new theme.
pub async fn create_session(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionReq::default()
    } else {
        serde_json::from_slice::<CreateSessionReq>(&body)
            .map_err(|err| AppError::bad_request(format!("invalid request body: {err}")))?
    };

    let session = state.sessions.create_session(caller, req.theme_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: session.id,
            theme_id: session.theme_id,
            created_at: session.created_at,
        }),
    ))
}

/// `POST /theme-assets/sessions/{sessionId}/upload` with multipart fields
/// `file` and `slotKey`.
pub async fn upload_asset(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(session_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut slot_key = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("slotKey") => slot_key = Some(field.text().await?),
            Some("file") => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                file = Some((content_type, field.bytes().await?));
            }
            _ => {}
        }
    }

    let slot_key = slot_key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("slotKey is required"))?;
    let (content_type, bytes) = file.ok_or_else(|| AppError::bad_request("file is required"))?;

    let stored = state
        .uploads
        .upload_asset(caller, session_id, &slot_key, &content_type, bytes)
        .await?;
    Ok(Json(stored))
}

/// `DELETE /theme-assets/sessions/{sessionId}/cards/{cardIndex}`
pub async fn delete_card(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path((session_id, card_index)): Path<(Uuid, u32)>,
) -> Result<impl IntoResponse, AppError> {
    let deleted_count = state
        .cleanup
        .delete_card_assets(caller, session_id, card_index)
        .await?;
    Ok(Json(CardDeleted { deleted_count }))
}
