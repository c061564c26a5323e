//! Defines routes for upload sessions, theme commits and media.
//!
//! ## Structure
//! - **Upload sessions**
//!   - `POST   /theme-assets/sessions`: open a session (optionally for a theme)
//!   - `POST   /theme-assets/sessions/{sessionId}/upload`: stage one slot image
//!   - `DELETE /theme-assets/sessions/{sessionId}/cards/{cardIndex}`: drop a card's images
//!
//! - **Themes**
//!   - `POST   /themes`: create commit
//!   - `GET    /themes/my-themes`: the caller's themes
//!   - `GET    /themes/{id}`, `PUT /themes/{id}`, `DELETE /themes/{id}`
//!
//! - **Media**
//!   - `GET    {basePath}/{*path}`: stored files, mounted when the public base has a path

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        media_handlers::get_media,
        session_handlers::{create_session, delete_card, upload_asset},
        theme_handlers::{create_theme, delete_theme, get_theme, list_my_themes, update_theme},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Headroom for multipart boundaries and the `slotKey` field.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router. `base_path` is the path part of the public base.
pub fn routes(base_path: &str, max_upload_bytes: usize) -> Router<AppState> {
    let mut router = Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Upload sessions
        .route("/theme-assets/sessions", post(create_session))
        .route(
            "/theme-assets/sessions/{session_id}/upload",
            post(upload_asset),
        )
        .route(
            "/theme-assets/sessions/{session_id}/cards/{card_index}",
            delete(delete_card),
        )
        // Themes
        .route("/themes", post(create_theme))
        .route("/themes/my-themes", get(list_my_themes))
        .route(
            "/themes/{id}",
            get(get_theme).put(update_theme).delete(delete_theme),
        );

    let base_path = base_path.trim_end_matches('/');
    if !base_path.is_empty() {
        router = router.route(&format!("{base_path}/{{*path}}"), get(get_media));
    }

    router.layer(DefaultBodyLimit::max(
        max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
    ))
}
