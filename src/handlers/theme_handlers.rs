//! HTTP handlers for theme commits and theme records.

use crate::{
    errors::AppError, handlers::caller::CallerId, models::theme::ThemePayload, state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

/// `POST /themes`: create a theme from an upload session.
pub async fn create_theme(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Json(payload): Json<ThemePayload>,
) -> Result<Response, AppError> {
    let theme = state.themes.create_theme(caller, payload).await?;

    let mut response = (StatusCode::CREATED, Json(json!({ "id": theme.id }))).into_response();
    if let Ok(location) = HeaderValue::from_str(&format!("/themes/{}", theme.id)) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// `GET /themes/my-themes`: the caller's themes, newest first.
pub async fn list_my_themes(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
) -> Result<impl IntoResponse, AppError> {
    let themes = state.themes.list_themes(caller).await?;
    Ok(Json(themes))
}

/// `GET /themes/{id}`
pub async fn get_theme(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let theme = state.themes.get_theme(caller, id).await?;
    Ok(Json(theme))
}

/// `PUT /themes/{id}`: rewrite a theme, promoting staged images.
pub async fn update_theme(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Json(payload): Json<ThemePayload>,
) -> Result<StatusCode, AppError> {
    state.themes.update_theme(caller, id, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /themes/{id}`
pub async fn delete_theme(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.themes.delete_theme(caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
