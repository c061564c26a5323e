//! Moves staged files from a session directory into a theme's permanent
//! directory.
//!
//! The path arithmetic lives in [`plan_promotion`], a pure function; the
//! [`Promoter`] only performs the file moves it plans.

use crate::{
    errors::{StagingError, StagingResult},
    models::slot::SlotKey,
    services::{
        files,
        layout::{StorageLayout, THEMES_DIR, resolve_within, starts_with_ignore_case},
        slot_validator::SessionAssets,
    },
};
use std::{collections::BTreeSet, path::PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Source and destination of one promoted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionPlan {
    pub source_relative: String,
    pub destination_relative: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Compute where a staged asset moves to when promoted into `theme_id`.
///
/// The asset URL must be served from the public base and live under
/// `themes/{session_id}/`; that prefix is swapped for `themes/{theme_id}/`.
/// Both resulting paths must stay inside their own directory under the root.
pub fn plan_promotion(
    layout: &StorageLayout,
    asset_url: &str,
    session_id: Uuid,
    theme_id: Uuid,
) -> StagingResult<PromotionPlan> {
    if session_id == theme_id {
        return Err(StagingError::SelfPromotion(session_id));
    }

    let traversal = || StagingError::PathTraversal(asset_url.chars().take(256).collect());
    let relative = layout.relative_from_url(asset_url).ok_or_else(traversal)?;

    let session_prefix = format!("{THEMES_DIR}/{session_id}/");
    if !starts_with_ignore_case(&relative, &session_prefix) {
        return Err(traversal());
    }
    let suffix = &relative[session_prefix.len()..];
    if suffix.is_empty() {
        return Err(traversal());
    }

    let source_relative = format!("{session_prefix}{suffix}");
    let destination_relative = format!("{THEMES_DIR}/{theme_id}/{suffix}");

    let source = resolve_within(layout.root(), &source_relative)?;
    let destination = resolve_within(layout.root(), &destination_relative)?;
    if !source.starts_with(layout.dir_path(session_id)?)
        || !destination.starts_with(layout.dir_path(theme_id)?)
    {
        return Err(traversal());
    }

    Ok(PromotionPlan {
        source_relative,
        destination_relative,
        source,
        destination,
    })
}

#[derive(Clone)]
pub struct Promoter {
    pub layout: StorageLayout,
}

impl Promoter {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Move one staged file and return its new public URL.
    pub async fn promote_slot(
        &self,
        slot: &SlotKey,
        asset_url: &str,
        session_id: Uuid,
        theme_id: Uuid,
    ) -> StagingResult<String> {
        let plan = plan_promotion(&self.layout, asset_url, session_id, theme_id)?;
        files::move_file(&plan.source, &plan.destination, &slot.to_string()).await?;
        debug!(
            slot = %slot,
            "promoted {} -> {}",
            plan.source_relative,
            plan.destination_relative
        );
        Ok(self.layout.public_url(&plan.destination_relative))
    }

    /// Promote every slot in `slots`, in key order, returning the new URLs.
    ///
    /// There is no rollback: on failure the slots moved so far stay moved and
    /// are logged.
    pub async fn promote(
        &self,
        session_id: Uuid,
        theme_id: Uuid,
        slots: &BTreeSet<SlotKey>,
        assets: &SessionAssets,
    ) -> StagingResult<Vec<(SlotKey, String)>> {
        let mut promoted = Vec::with_capacity(slots.len());

        for slot in slots {
            let moved = match assets.url(slot) {
                Some(url) => self.promote_slot(slot, url, session_id, theme_id).await,
                None => Err(StagingError::PromotionSourceMissing(slot.to_string())),
            };

            match moved {
                Ok(url) => promoted.push((*slot, url)),
                Err(err) => {
                    for (done, url) in &promoted {
                        warn!(
                            session_id = %session_id,
                            theme_id = %theme_id,
                            slot = %done,
                            "promotion aborted after moving {}",
                            url
                        );
                    }
                    return Err(err);
                }
            }
        }

        if !promoted.is_empty() {
            info!(
                session_id = %session_id,
                theme_id = %theme_id,
                count = promoted.len(),
                "promoted staged images"
            );
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn layout(root: &std::path::Path) -> StorageLayout {
        StorageLayout::new(root, "https://cdn.example.com/media").unwrap()
    }

    #[test]
    fn plan_swaps_the_session_prefix_for_the_theme() {
        let layout = layout(std::path::Path::new("/srv/storage"));
        let (session, theme) = (Uuid::new_v4(), Uuid::new_v4());
        let slot = SlotKey::ImageQuizOption(2, 1);
        let url = layout.public_url(&StorageLayout::slot_relative(session, &slot));

        let plan = plan_promotion(&layout, &url, session, theme).unwrap();

        assert_eq!(plan.source_relative, StorageLayout::slot_relative(session, &slot));
        assert_eq!(plan.destination_relative, StorageLayout::slot_relative(theme, &slot));
        assert_eq!(
            plan.destination,
            PathBuf::from(format!("/srv/storage/themes/{theme}/cards/2/imageQuiz/options/1.webp"))
        );
    }

    #[test]
    fn plan_canonicalizes_case_of_the_session_prefix() {
        let layout = layout(std::path::Path::new("/srv/storage"));
        let (session, theme) = (Uuid::new_v4(), Uuid::new_v4());
        let url = format!(
            "/MEDIA/THEMES/{}/cards/0/main.webp",
            session.to_string().to_uppercase()
        );

        let plan = plan_promotion(&layout, &url, session, theme).unwrap();
        assert_eq!(plan.source_relative, format!("themes/{session}/cards/0/main.webp"));
    }

    #[test]
    fn plan_refuses_self_promotion() {
        let layout = layout(std::path::Path::new("/srv/storage"));
        let id = Uuid::new_v4();
        let url = layout.public_url(&StorageLayout::slot_relative(id, &SlotKey::CardImage(0)));
        assert!(matches!(
            plan_promotion(&layout, &url, id, id),
            Err(StagingError::SelfPromotion(_))
        ));
    }

    #[test]
    fn plan_rejects_urls_outside_the_session_directory() {
        let layout = layout(std::path::Path::new("/srv/storage"));
        let (session, theme) = (Uuid::new_v4(), Uuid::new_v4());
        for url in [
            format!("/media/themes/{session}/../{theme}/cards/0/main.webp"),
            format!("/media/themes/{session}/cards/../../../../etc/passwd"),
            format!("/media/themes/{}/cards/0/main.webp", Uuid::new_v4()),
            format!("/media/themes/{session}/"),
            format!("/elsewhere/themes/{session}/cards/0/main.webp"),
            format!("/media/themes/{session}\\..\\x/main.webp"),
        ] {
            assert!(
                matches!(
                    plan_promotion(&layout, &url, session, theme),
                    Err(StagingError::PathTraversal(_))
                ),
                "expected rejection for {url}"
            );
        }
    }

    #[tokio::test]
    async fn promote_moves_files_and_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        let (session, theme) = (Uuid::new_v4(), Uuid::new_v4());
        let slot = SlotKey::CorrelationItem(1, 2);

        let staged = dir.path().join(StorageLayout::slot_relative(session, &slot));
        let existing = dir.path().join(StorageLayout::slot_relative(theme, &slot));
        files::write_atomic(&staged, b"new").await.unwrap();
        files::write_atomic(&existing, b"old").await.unwrap();

        let assets = SessionAssets {
            session_id: session,
            urls: HashMap::from([(
                slot,
                layout.public_url(&StorageLayout::slot_relative(session, &slot)),
            )]),
        };

        let promoted = Promoter::new(layout.clone())
            .promote(session, theme, &BTreeSet::from([slot]), &assets)
            .await
            .unwrap();

        assert_eq!(
            promoted,
            vec![(
                slot,
                layout.public_url(&StorageLayout::slot_relative(theme, &slot))
            )]
        );
        assert!(!staged.exists());
        assert_eq!(std::fs::read(&existing).unwrap(), b"new");
    }

    #[tokio::test]
    async fn missing_source_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        let (session, theme) = (Uuid::new_v4(), Uuid::new_v4());
        let slot = SlotKey::CardImage(0);
        let assets = SessionAssets {
            session_id: session,
            urls: HashMap::from([(
                slot,
                layout.public_url(&StorageLayout::slot_relative(session, &slot)),
            )]),
        };

        let err = Promoter::new(layout)
            .promote(session, theme, &BTreeSet::from([slot]), &assets)
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::PromotionSourceMissing(label) if label == "cards[0].imageUrl"));
        assert!(!dir.path().join(format!("themes/{theme}")).exists());
    }
}
