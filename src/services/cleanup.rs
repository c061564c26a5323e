//! Best-effort removal of staged card images and whole theme folders.

use crate::{
    errors::StagingResult,
    models::{asset::UploadAsset, slot::SlotKey},
    services::{
        files,
        layout::{StorageLayout, THEMES_DIR},
        session_service::SessionManager,
    },
};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct Cleanup {
    pub db: Arc<SqlitePool>,
    pub layout: StorageLayout,
    pub sessions: SessionManager,
}

impl Cleanup {
    pub fn new(db: Arc<SqlitePool>, layout: StorageLayout, sessions: SessionManager) -> Self {
        Self {
            db,
            layout,
            sessions,
        }
    }

    /// Drop the eight staged images of one card from an open session.
    ///
    /// Returns the number of asset rows deleted. Files that are already gone
    /// are not an error.
    pub async fn delete_card_assets(
        &self,
        caller: Uuid,
        session_id: Uuid,
        card_index: u32,
    ) -> StagingResult<usize> {
        let session = self.sessions.find_open(session_id, caller).await?;
        let slot_keys: Vec<String> = SlotKey::card_slots(card_index)
            .iter()
            .map(ToString::to_string)
            .collect();

        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT id, session_id, slot_key, url, created_at FROM upload_assets WHERE session_id = ",
        );
        select.push_bind(session.id);
        push_slot_filter(&mut select, &slot_keys);
        let assets: Vec<UploadAsset> = select.build_query_as().fetch_all(&*self.db).await?;

        for asset in &assets {
            files::remove_public_file(&self.layout, &asset.url).await;
        }

        let card_dir = format!(
            "{THEMES_DIR}/{}/cards/{card_index}",
            session.staging_dir_id()
        );
        match self.layout.resolve(&card_dir) {
            Ok(path) => files::remove_dir_best_effort(&path).await,
            Err(err) => warn!("not removing card directory {}: {}", card_dir, err),
        }

        let mut tx = self.db.begin().await?;
        let mut delete = QueryBuilder::<Sqlite>::new("DELETE FROM upload_assets WHERE session_id = ");
        delete.push_bind(session.id);
        push_slot_filter(&mut delete, &slot_keys);
        let deleted = delete.build().execute(&mut *tx).await?.rows_affected() as usize;
        SessionManager::touch_in(&mut *tx, session.id).await?;
        tx.commit().await?;

        info!(
            session_id = %session.id,
            card_index,
            deleted,
            "deleted staged card images"
        );
        Ok(deleted)
    }

    /// Recursively remove `themes/{theme_id}`. Never fails; problems are logged.
    pub async fn delete_theme_folder(&self, theme_id: Uuid) {
        match self.layout.dir_path(theme_id) {
            Ok(path) => files::remove_dir_best_effort(&path).await,
            Err(err) => warn!(theme_id = %theme_id, "not removing theme folder: {}", err),
        }
    }
}

fn push_slot_filter(builder: &mut QueryBuilder<'_, Sqlite>, slot_keys: &[String]) {
    builder.push(" AND slot_key IN (");
    let mut separated = builder.separated(", ");
    for key in slot_keys {
        separated.push_bind(key.clone());
    }
    separated.push_unseparated(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::codec::fixtures::png, state::test_support::harness};
    use bytes::Bytes;

    #[tokio::test]
    async fn deletes_exactly_one_cards_slots() {
        let h = harness().await;
        let user = Uuid::new_v4();
        let session = h.state.sessions.create_session(user, None).await.unwrap();
        let image = Bytes::from(png(8, 8));

        for card in [0, 1] {
            for slot in SlotKey::card_slots(card) {
                h.state
                    .uploads
                    .upload_asset(user, session.id, &slot.to_string(), "image/png", image.clone())
                    .await
                    .unwrap();
            }
        }

        let deleted = h
            .state
            .cleanup
            .delete_card_assets(user, session.id, 1)
            .await
            .unwrap();
        assert_eq!(deleted, 8);

        let remaining: Vec<String> = sqlx::query_scalar(
            "SELECT slot_key FROM upload_assets WHERE session_id = ? ORDER BY slot_key",
        )
        .bind(session.id)
        .fetch_all(&*h.state.db)
        .await
        .unwrap();
        assert_eq!(remaining.len(), 8);
        assert!(remaining.iter().all(|key| key.starts_with("cards[0]")));

        let staging = h.root().join(format!("themes/{}", session.id));
        assert!(!staging.join("cards/1").exists());
        assert!(staging.join("cards/0/main.webp").exists());
        assert!(staging.join("cards/0/correlation/items/2.webp").exists());

        let again = h
            .state
            .cleanup
            .delete_card_assets(user, session.id, 1)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn card_deletion_requires_the_owners_open_session() {
        let h = harness().await;
        let user = Uuid::new_v4();
        let session = h.state.sessions.create_session(user, None).await.unwrap();

        let err = h
            .state
            .cleanup
            .delete_card_assets(Uuid::new_v4(), session.id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::errors::StagingError::SessionNotFound));
    }

    #[tokio::test]
    async fn theme_folder_removal_tolerates_absence() {
        let h = harness().await;
        let theme = Uuid::new_v4();
        let file = h.root().join(format!("themes/{theme}/cards/0/main.webp"));
        files::write_atomic(&file, b"x").await.unwrap();

        h.state.cleanup.delete_theme_folder(theme).await;
        assert!(!h.root().join(format!("themes/{theme}")).exists());

        h.state.cleanup.delete_theme_folder(theme).await;
    }
}
