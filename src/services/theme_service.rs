//! Theme commits: create and update a theme from a staged upload session.
//!
//! A commit validates the payload shape, proves every card image against the
//! session (or the theme's own directory), stores the cover, promotes staged
//! files on update, and finally writes the theme row, closes the session and
//! drops its asset rows in one transaction.

use crate::{
    db::is_unique_violation,
    errors::{StagingError, StagingResult},
    models::{
        asset::UploadAsset,
        theme::{Theme, ThemePayload, ThemeSummary},
    },
    services::{
        asset_service::UploadLimits,
        cleanup::Cleanup,
        codec::{EncodedImage, ImageCodec},
        files,
        layout::StorageLayout,
        promoter::Promoter,
        session_service::SessionManager,
        slot_validator::{SessionAssets, SlotValidator},
        theme_validator::{self, CommitKind, is_data_url},
    },
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use sqlx::{SqlitePool, types::Json};
use std::{io, path::PathBuf, sync::Arc};
use tracing::{info, warn};
use uuid::Uuid;

/// Smallest accepted cover, in pixels per side.
pub const MIN_COVER_DIMENSION: u32 = 128;

const COVER_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

const THEME_COLUMNS: &str = "id, creator_user_id, name, resume, recommendation, image, \
                             ready_to_play, cards, created_at, updated_at";

#[derive(Clone)]
pub struct ThemeService {
    pub db: Arc<SqlitePool>,
    pub layout: StorageLayout,
    pub codec: Arc<dyn ImageCodec>,
    pub sessions: SessionManager,
    pub promoter: Promoter,
    pub cleanup: Cleanup,
    pub limits: UploadLimits,
}

impl ThemeService {
    pub fn new(
        db: Arc<SqlitePool>,
        layout: StorageLayout,
        codec: Arc<dyn ImageCodec>,
        sessions: SessionManager,
        cleanup: Cleanup,
        limits: UploadLimits,
    ) -> Self {
        Self {
            promoter: Promoter::new(layout.clone()),
            db,
            layout,
            codec,
            sessions,
            cleanup,
            limits,
        }
    }

    /// Create a theme whose id is the upload session's id.
    ///
    /// Card images must match the session's uploads exactly; nothing is moved
    /// because the session directory already is the theme directory.
    pub async fn create_theme(&self, caller: Uuid, payload: ThemePayload) -> StagingResult<Theme> {
        let mut payload = payload.into_normalized();
        let errors = theme_validator::validate(&payload, CommitKind::Create);
        if !errors.is_empty() {
            return Err(StagingError::Validation(errors));
        }

        let session_id = payload
            .upload_session_id
            .ok_or_else(|| session_error("an upload session is required to create a theme"))?;
        let session = self
            .sessions
            .find_open(session_id, caller)
            .await
            .map_err(invalid_session)?;
        if session.theme_id.is_some() {
            return Err(session_error(
                "an edit session cannot be used to create a theme",
            ));
        }

        let assets = self.session_assets(session.id).await?;
        SlotValidator::new(&self.layout)
            .validate_create(&payload.expected_slots()?, &assets)
            .into_result()?;

        let theme_id = session.staging_dir_id();
        if self.theme_exists(theme_id).await? {
            return Err(StagingError::ThemeAlreadyExists(theme_id));
        }

        payload.image = self.store_cover(theme_id, &payload.image).await?;

        let mut tx = self.db.begin().await?;
        if !SessionManager::close_in(&mut *tx, session.id).await? {
            return Err(invalid_session(StagingError::SessionNotFound));
        }

        let now = Utc::now();
        let inserted = sqlx::query_as::<_, Theme>(&format!(
            "INSERT INTO themes ({THEME_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {THEME_COLUMNS}"
        ))
        .bind(theme_id)
        .bind(caller)
        .bind(&payload.name)
        .bind(&payload.resume)
        .bind(&payload.recommendation)
        .bind(&payload.image)
        .bind(payload.ready_to_play())
        .bind(Json(&payload.cards))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let theme = match inserted {
            Ok(theme) => theme,
            Err(err) if is_unique_violation(&err) => {
                return Err(StagingError::ThemeAlreadyExists(theme_id));
            }
            Err(err) => return Err(StagingError::Sqlx(err)),
        };

        let cleared = delete_session_assets(&mut tx, session.id).await?;
        tx.commit().await?;

        info!(
            theme_id = %theme.id,
            user_id = %caller,
            cards = theme.cards.len(),
            cleared,
            "created theme"
        );
        Ok(theme)
    }

    /// Rewrite an existing theme, promoting any images staged in the given session.
    pub async fn update_theme(
        &self,
        caller: Uuid,
        theme_id: Uuid,
        payload: ThemePayload,
    ) -> StagingResult<Theme> {
        let mut payload = payload.into_normalized();
        let errors = theme_validator::validate(&payload, CommitKind::Update);
        if !errors.is_empty() {
            return Err(StagingError::Validation(errors));
        }

        self.owned_theme(caller, theme_id).await?;

        let session = match payload.upload_session_id.filter(|id| !id.is_nil()) {
            None => None,
            Some(session_id) if session_id == theme_id => {
                return Err(session_error(
                    "the upload session cannot be the theme being edited",
                ));
            }
            Some(session_id) => {
                let session = self
                    .sessions
                    .find_open(session_id, caller)
                    .await
                    .map_err(invalid_session)?;
                if session.theme_id.is_some_and(|bound| bound != theme_id) {
                    return Err(session_error(
                        "the upload session belongs to another theme",
                    ));
                }
                let assets = self.session_assets(session.id).await?;
                Some((session, assets))
            }
        };

        let promote = SlotValidator::new(&self.layout)
            .validate_update(
                &payload.expected_slots()?,
                theme_id,
                session.as_ref().map(|(_, assets)| assets),
            )
            .into_result()?;

        let cover = if is_data_url(&payload.image) {
            let pending = self.stage_cover(theme_id, &payload.image).await?;
            payload.image = self.layout.public_url(&StorageLayout::cover_relative(theme_id));
            Some(pending)
        } else {
            None
        };

        let mut promoted = Vec::new();
        if let Some((session, assets)) = &session {
            let moved = self
                .promoter
                .promote(session.staging_dir_id(), theme_id, &promote, assets)
                .await;
            promoted = match moved {
                Ok(promoted) => promoted,
                Err(err) => {
                    if let Some(cover) = cover {
                        cover.discard().await;
                    }
                    return Err(err);
                }
            };
            for (slot, url) in &promoted {
                payload.set_slot_url(*slot, url.clone());
            }
        }

        let session_id = session.as_ref().map(|(session, _)| session.id);
        match self.persist_update(theme_id, session_id, &payload).await {
            Ok(theme) => {
                if let Some(cover) = cover {
                    cover.publish().await?;
                }
                info!(
                    theme_id = %theme.id,
                    user_id = %caller,
                    promoted = promoted.len(),
                    "updated theme"
                );
                Ok(theme)
            }
            Err(err) => {
                if let Some(cover) = cover {
                    cover.discard().await;
                }
                for (slot, url) in &promoted {
                    warn!(
                        theme_id = %theme_id,
                        slot = %slot,
                        "theme update failed after promoting {}; file is orphaned",
                        url
                    );
                }
                Err(err)
            }
        }
    }

    /// Themes created by `caller`, newest first.
    pub async fn list_themes(&self, caller: Uuid) -> StagingResult<Vec<ThemeSummary>> {
        let themes = sqlx::query_as::<_, ThemeSummary>(
            "SELECT id, name, image, ready_to_play, created_at,
                    json_array_length(cards) AS card_count
             FROM themes
             WHERE creator_user_id = ?
             ORDER BY created_at DESC",
        )
        .bind(caller)
        .fetch_all(&*self.db)
        .await?;
        Ok(themes)
    }

    /// Fetch a theme owned by `caller`.
    pub async fn get_theme(&self, caller: Uuid, theme_id: Uuid) -> StagingResult<Theme> {
        self.owned_theme(caller, theme_id).await
    }

    /// Delete a theme row, then its folder on disk.
    pub async fn delete_theme(&self, caller: Uuid, theme_id: Uuid) -> StagingResult<()> {
        self.owned_theme(caller, theme_id).await?;

        let deleted = sqlx::query("DELETE FROM themes WHERE id = ? AND creator_user_id = ?")
            .bind(theme_id)
            .bind(caller)
            .execute(&*self.db)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StagingError::ThemeNotFound(theme_id));
        }

        self.cleanup.delete_theme_folder(theme_id).await;
        info!(theme_id = %theme_id, user_id = %caller, "deleted theme");
        Ok(())
    }

    /// Decode a `data:image/...;base64,` cover, check it, and store it as the
    /// theme's cover. Returns the public URL.
    pub async fn store_cover(&self, theme_id: Uuid, data_url: &str) -> StagingResult<String> {
        let encoded = self.encode_cover(data_url).await?;
        let relative = StorageLayout::cover_relative(theme_id);
        files::write_atomic(&self.layout.resolve(&relative)?, &encoded.bytes).await?;
        Ok(self.layout.public_url(&relative))
    }

    /// Write a replacement cover next to the live one. The live cover is only
    /// replaced by [`PendingCover::publish`].
    async fn stage_cover(&self, theme_id: Uuid, data_url: &str) -> StagingResult<PendingCover> {
        let encoded = self.encode_cover(data_url).await?;
        let live = self.layout.resolve(&StorageLayout::cover_relative(theme_id))?;
        let staged = self.layout.resolve(&format!(
            "{}/.cover-{}.webp",
            StorageLayout::dir_relative(theme_id),
            Uuid::new_v4()
        ))?;
        files::write_atomic(&staged, &encoded.bytes).await?;
        Ok(PendingCover { staged, live })
    }

    async fn encode_cover(&self, data_url: &str) -> StagingResult<EncodedImage> {
        let (mime, bytes) = parse_data_url(data_url).map_err(cover_error)?;
        if !COVER_MIME_TYPES.contains(&mime.as_str()) {
            return Err(cover_error(
                "unsupported cover format (jpeg, png or webp only)".into(),
            ));
        }

        let codec = Arc::clone(&self.codec);
        let UploadLimits {
            max_image_dimension,
            image_quality,
            ..
        } = self.limits;
        tokio::task::spawn_blocking(move || {
            let (width, height) = codec.dimensions(&bytes, &mime)?;
            if width < MIN_COVER_DIMENSION || height < MIN_COVER_DIMENSION {
                return Err(StagingError::InvalidImage(format!(
                    "cover must be at least {MIN_COVER_DIMENSION}x{MIN_COVER_DIMENSION} pixels"
                )));
            }
            codec.normalize(&bytes, &mime, max_image_dimension, image_quality)
        })
        .await
        .map_err(|err| StagingError::Io(io::Error::other(err)))?
        .map_err(|err| match err {
            StagingError::InvalidImage(message) => cover_error(message),
            other => other,
        })
    }

    async fn persist_update(
        &self,
        theme_id: Uuid,
        session_id: Option<Uuid>,
        payload: &ThemePayload,
    ) -> StagingResult<Theme> {
        let mut tx = self.db.begin().await?;

        if let Some(session_id) = session_id {
            if !SessionManager::close_in(&mut *tx, session_id).await? {
                return Err(invalid_session(StagingError::SessionNotFound));
            }
            delete_session_assets(&mut tx, session_id).await?;
        }

        let theme = sqlx::query_as::<_, Theme>(&format!(
            "UPDATE themes SET name = ?, resume = ?, recommendation = ?, image = ?,
                    ready_to_play = ?, cards = ?, updated_at = ?
             WHERE id = ?
             RETURNING {THEME_COLUMNS}"
        ))
        .bind(&payload.name)
        .bind(&payload.resume)
        .bind(&payload.recommendation)
        .bind(&payload.image)
        .bind(payload.ready_to_play())
        .bind(Json(&payload.cards))
        .bind(Utc::now())
        .bind(theme_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StagingError::ThemeNotFound(theme_id),
            other => StagingError::Sqlx(other),
        })?;

        tx.commit().await?;
        Ok(theme)
    }

    async fn owned_theme(&self, caller: Uuid, theme_id: Uuid) -> StagingResult<Theme> {
        let theme = sqlx::query_as::<_, Theme>(&format!(
            "SELECT {THEME_COLUMNS} FROM themes WHERE id = ?"
        ))
        .bind(theme_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StagingError::ThemeNotFound(theme_id),
            other => StagingError::Sqlx(other),
        })?;

        if theme.creator_user_id != caller {
            return Err(StagingError::Forbidden(theme_id));
        }
        Ok(theme)
    }

    async fn theme_exists(&self, theme_id: Uuid) -> StagingResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM themes WHERE id = ?")
            .bind(theme_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(found.is_some())
    }

    async fn session_assets(&self, session_id: Uuid) -> StagingResult<SessionAssets> {
        let rows = sqlx::query_as::<_, UploadAsset>(
            "SELECT id, session_id, slot_key, url, created_at FROM upload_assets WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(SessionAssets::from_rows(session_id, rows))
    }
}

/// A cover written beside the live one, waiting for its commit.
struct PendingCover {
    staged: PathBuf,
    live: PathBuf,
}

impl PendingCover {
    async fn publish(self) -> StagingResult<()> {
        if let Err(err) = tokio::fs::rename(&self.staged, &self.live).await {
            warn!(
                "could not replace cover {} with {}: {}",
                self.live.display(),
                self.staged.display(),
                err
            );
            return Err(StagingError::Io(err));
        }
        Ok(())
    }

    async fn discard(self) {
        if let Err(err) = files::remove_file_if_exists(&self.staged).await {
            warn!("could not remove staged cover {}: {}", self.staged.display(), err);
        }
    }
}

async fn delete_session_assets(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: Uuid,
) -> StagingResult<u64> {
    let deleted = sqlx::query("DELETE FROM upload_assets WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    Ok(deleted)
}

/// Split a base64 image data URL into its mime type and decoded bytes.
fn parse_data_url(data_url: &str) -> Result<(String, Vec<u8>), String> {
    let trimmed = data_url.trim();
    if !is_data_url(trimmed) {
        return Err("theme image must be an image data url".into());
    }
    let (meta, payload) = trimmed
        .split_once(',')
        .ok_or_else(|| String::from("malformed data url"))?;

    let mut params = meta["data:".len()..].split(';');
    let mime = params.next().unwrap_or_default().trim().to_ascii_lowercase();
    if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
        return Err("data url must be base64 encoded".into());
    }

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| String::from("invalid base64 payload"))?;
    Ok((mime, bytes))
}

fn session_error(message: &str) -> StagingError {
    StagingError::field("theme.uploadSessionId", message)
}

fn invalid_session(err: StagingError) -> StagingError {
    match err {
        StagingError::SessionNotFound => {
            session_error("upload session is invalid, closed, or owned by another user")
        }
        other => other,
    }
}

fn cover_error(message: String) -> StagingError {
    StagingError::field("theme.image", message)
}
