//! Shared application state handed to every handler.

use crate::services::{
    asset_service::{AssetUploader, UploadLimits},
    cleanup::Cleanup,
    codec::ImageCodec,
    layout::StorageLayout,
    session_service::SessionManager,
    theme_service::ThemeService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub layout: StorageLayout,
    pub sessions: SessionManager,
    pub uploads: AssetUploader,
    pub cleanup: Cleanup,
    pub themes: ThemeService,
}

impl AppState {
    pub fn new(
        db: Arc<SqlitePool>,
        layout: StorageLayout,
        codec: Arc<dyn ImageCodec>,
        limits: UploadLimits,
    ) -> Self {
        let sessions = SessionManager::new(db.clone());
        let uploads = AssetUploader::new(
            db.clone(),
            layout.clone(),
            codec.clone(),
            sessions.clone(),
            limits,
        );
        let cleanup = Cleanup::new(db.clone(), layout.clone(), sessions.clone());
        let themes = ThemeService::new(
            db.clone(),
            layout.clone(),
            codec,
            sessions.clone(),
            cleanup.clone(),
            limits,
        );

        Self {
            db,
            layout,
            sessions,
            uploads,
            cleanup,
            themes,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{db::memory_pool, services::codec::WebpCodec};
    use std::path::Path;
    use tempfile::TempDir;

    /// Application state over an in-memory database and a temporary storage root.
    pub struct Harness {
        pub state: AppState,
        _root: TempDir,
    }

    impl Harness {
        pub fn root(&self) -> &Path {
            self.state.layout.root()
        }
    }

    pub async fn harness() -> Harness {
        let root = TempDir::new().unwrap();
        let layout = StorageLayout::new(root.path(), "/media").unwrap();
        let state = AppState::new(
            memory_pool().await,
            layout,
            Arc::new(WebpCodec),
            UploadLimits::default(),
        );
        Harness { state, _root: root }
    }
}
