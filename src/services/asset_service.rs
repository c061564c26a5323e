//! Stores one uploaded image into its session's staging directory.

use crate::{
    errors::{StagingError, StagingResult},
    models::{asset::UploadAsset, slot::SlotKey},
    services::{
        codec::ImageCodec,
        files,
        layout::{StorageLayout, urls_match},
        session_service::SessionManager,
    },
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::{io, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Size caps applied to every stored image.
#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    pub max_upload_bytes: usize,
    pub max_image_dimension: u32,
    /// WebP quality (1-100) stored images are encoded at.
    pub image_quality: u8,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            max_image_dimension: 1200,
            image_quality: 50,
        }
    }
}

/// Result of a successful upload, returned to the client as-is.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredAsset {
    pub slot_key: SlotKey,
    pub url: String,
}

#[derive(Clone)]
pub struct AssetUploader {
    pub db: Arc<SqlitePool>,
    pub layout: StorageLayout,
    pub codec: Arc<dyn ImageCodec>,
    pub sessions: SessionManager,
    pub limits: UploadLimits,
}

impl AssetUploader {
    pub fn new(
        db: Arc<SqlitePool>,
        layout: StorageLayout,
        codec: Arc<dyn ImageCodec>,
        sessions: SessionManager,
        limits: UploadLimits,
    ) -> Self {
        Self {
            db,
            layout,
            codec,
            sessions,
            limits,
        }
    }

    /// Validate, normalise and stage one image for `raw_slot` of a session.
    ///
    /// Re-uploading the same slot overwrites both the file and the asset row.
    pub async fn upload_asset(
        &self,
        caller: Uuid,
        session_id: Uuid,
        raw_slot: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> StagingResult<StoredAsset> {
        let slot = SlotKey::parse(raw_slot)?;
        self.check_payload(content_type, bytes.len())?;
        let session = self.sessions.find_open(session_id, caller).await?;

        let encoded = {
            let codec = Arc::clone(&self.codec);
            let content_type = content_type.to_string();
            let UploadLimits {
                max_image_dimension,
                image_quality,
                ..
            } = self.limits;
            tokio::task::spawn_blocking(move || {
                codec.normalize(&bytes, &content_type, max_image_dimension, image_quality)
            })
            .await
            .map_err(|err| StagingError::Io(io::Error::other(err)))??
        };

        let relative = StorageLayout::slot_relative(session.staging_dir_id(), &slot);
        let path = self.layout.resolve(&relative)?;
        let url = self.layout.public_url(&relative);
        let slot_key = slot.to_string();

        let previous: Option<String> = sqlx::query_scalar(
            "SELECT url FROM upload_assets WHERE session_id = ? AND slot_key = ?",
        )
        .bind(session.id)
        .bind(&slot_key)
        .fetch_optional(&*self.db)
        .await?;
        let replaces_same_file = previous
            .as_deref()
            .is_some_and(|prev| self.same_file(prev, &url));

        files::write_atomic(&path, &encoded.bytes).await?;
        debug!(
            session_id = %session.id,
            slot = %slot,
            width = encoded.width,
            height = encoded.height,
            "staged image"
        );

        let asset = match self.record(session.id, &slot_key, &url).await {
            Ok(asset) => asset,
            Err(err) => {
                if !replaces_same_file {
                    if let Err(rm_err) = files::remove_file_if_exists(&path).await {
                        warn!("failed to remove {} after db error: {}", path.display(), rm_err);
                    }
                }
                return Err(err);
            }
        };

        if let Some(prev) = previous.filter(|_| !replaces_same_file) {
            files::remove_public_file(&self.layout, &prev).await;
        }

        info!(session_id = %session.id, slot = %slot, url = %asset.url, "stored upload");
        Ok(StoredAsset {
            slot_key: slot,
            url: asset.url,
        })
    }

    fn check_payload(&self, content_type: &str, len: usize) -> StagingResult<()> {
        let is_image = content_type
            .trim()
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"));
        if !is_image {
            return Err(StagingError::InvalidImage(format!(
                "unsupported content type `{}`",
                content_type.chars().take(64).collect::<String>()
            )));
        }
        if len == 0 {
            return Err(StagingError::InvalidImage("empty payload".into()));
        }
        if len > self.limits.max_upload_bytes {
            return Err(StagingError::PayloadTooLarge {
                limit: self.limits.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Upsert the asset row and touch the session in one transaction.
    async fn record(&self, session_id: Uuid, slot_key: &str, url: &str) -> StagingResult<UploadAsset> {
        let mut tx = self.db.begin().await?;

        let asset = sqlx::query_as::<_, UploadAsset>(
            r#"
            INSERT INTO upload_assets (id, session_id, slot_key, url, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id, slot_key) DO UPDATE SET
                url = excluded.url,
                created_at = excluded.created_at
            RETURNING id, session_id, slot_key, url, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(slot_key)
        .bind(url)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        SessionManager::touch_in(&mut *tx, session_id).await?;
        tx.commit().await?;
        Ok(asset)
    }

    fn same_file(&self, a: &str, b: &str) -> bool {
        match (self.layout.normalize_url(a), self.layout.normalize_url(b)) {
            (Some(a), Some(b)) => urls_match(&a, &b),
            _ => false,
        }
    }
}
