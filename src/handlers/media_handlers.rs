//! Serves stored theme images under the public base path.

use crate::{
    errors::{AppError, StagingError},
    services::layout::THEMES_DIR,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use std::io;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Stream a stored file as the response body.
pub async fn get_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let not_found = || AppError::not_found("file not found");

    if !path.starts_with(&format!("{THEMES_DIR}/")) {
        return Err(not_found());
    }
    let file_path = match state.layout.resolve(&path) {
        Ok(file_path) => file_path,
        Err(StagingError::PathTraversal(_)) => return Err(not_found()),
        Err(err) => return Err(err.into()),
    };
    if !file_path.starts_with(state.layout.root().join(THEMES_DIR)) {
        return Err(not_found());
    }

    let file = File::open(&file_path).await.map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => not_found(),
        _ => AppError::from(StagingError::Io(err)),
    })?;
    let meta = file
        .metadata()
        .await
        .map_err(|err| AppError::from(StagingError::Io(err)))?;
    if !meta.is_file() {
        return Err(not_found());
    }

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_media_headers(
        response.headers_mut(),
        &path,
        meta.len(),
        meta.modified().ok().map(DateTime::<Utc>::from),
    );
    Ok(response)
}

fn set_media_headers(
    headers: &mut HeaderMap,
    path: &str,
    len: u64,
    modified: Option<DateTime<Utc>>,
) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(path)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Some(modified) = modified {
        let http_date = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&http_date) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::files::write_atomic, state::test_support::harness};

    #[tokio::test]
    async fn streams_stored_files() {
        let h = harness().await;
        let file = h.root().join("themes/abc/cover.webp");
        write_atomic(&file, b"RIFFxxxxWEBP").await.unwrap();

        let response = get_media(State(h.state.clone()), Path("themes/abc/cover.webp".into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "12");
    }

    #[tokio::test]
    async fn hides_missing_and_escaping_paths() {
        let h = harness().await;
        std::fs::create_dir_all(h.root().join("themes/abc")).unwrap();
        std::fs::write(h.root().join("secret.txt"), b"x").unwrap();

        for path in [
            "themes/abc/missing.webp",
            "themes/abc",
            "themes/../secret.txt",
            "secret.txt",
        ] {
            let err = get_media(State(h.state.clone()), Path(path.into()))
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::NOT_FOUND, "{path}");
        }
    }
}
