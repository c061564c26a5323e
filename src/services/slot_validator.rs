//! Commit-time check that every image URL in a theme payload was really
//! uploaded through the session (or already belongs to the theme).

use crate::{
    errors::{FieldErrors, StagingError, StagingResult},
    models::{asset::UploadAsset, slot::SlotKey},
    services::layout::{StorageLayout, urls_match},
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;
use uuid::Uuid;

/// The recorded uploads of one session, keyed by parsed slot.
#[derive(Clone, Debug, Default)]
pub struct SessionAssets {
    pub session_id: Uuid,
    pub urls: HashMap<SlotKey, String>,
}

impl SessionAssets {
    pub fn from_rows(session_id: Uuid, rows: Vec<UploadAsset>) -> Self {
        let mut urls = HashMap::with_capacity(rows.len());
        for row in rows {
            match row.slot() {
                Ok(slot) => {
                    urls.insert(slot, row.url);
                }
                Err(_) => warn!(
                    session_id = %session_id,
                    "ignoring asset row with unparseable slot key `{}`",
                    row.slot_key
                ),
            }
        }
        Self { session_id, urls }
    }

    pub fn url(&self, slot: &SlotKey) -> Option<&str> {
        self.urls.get(slot).map(String::as_str)
    }
}

/// Outcome of a slot check: per-slot errors and the slots whose files must be
/// moved out of the session directory.
#[derive(Debug, Default)]
pub struct SlotCheck {
    pub errors: FieldErrors,
    pub promote: BTreeSet<SlotKey>,
}

impl SlotCheck {
    /// Fail with every collected slot error, or hand back the promotion set.
    pub fn into_result(self) -> StagingResult<BTreeSet<SlotKey>> {
        if self.errors.is_empty() {
            Ok(self.promote)
        } else {
            Err(StagingError::SlotMismatch(self.errors))
        }
    }
}

pub struct SlotValidator<'a> {
    layout: &'a StorageLayout,
}

impl<'a> SlotValidator<'a> {
    pub fn new(layout: &'a StorageLayout) -> Self {
        Self { layout }
    }

    /// Every declared URL must match the session's upload for that slot.
    pub fn validate_create(
        &self,
        expected: &BTreeMap<SlotKey, String>,
        assets: &SessionAssets,
    ) -> SlotCheck {
        let mut check = SlotCheck::default();
        for (slot, declared) in expected {
            if let Err(message) = self.matches_session(slot, declared, assets) {
                check.errors.insert(slot.to_string(), message.into());
            }
        }
        check
    }

    /// A declared URL passes if it already lives under the theme's directory,
    /// or if it matches the session's upload, in which case the slot must be
    /// promoted.
    pub fn validate_update(
        &self,
        expected: &BTreeMap<SlotKey, String>,
        theme_id: Uuid,
        assets: Option<&SessionAssets>,
    ) -> SlotCheck {
        let mut check = SlotCheck::default();
        for (slot, declared) in expected {
            let in_theme = self
                .layout
                .normalize_url(declared)
                .is_some_and(|url| self.layout.is_under_dir(&url, theme_id));
            if in_theme {
                continue;
            }

            let outcome = match assets {
                Some(assets) => self.matches_session(slot, declared, assets),
                None if declared.trim().is_empty() => Err("image is required"),
                None => Err("image is neither stored with the theme nor uploaded in a session"),
            };
            match outcome {
                Ok(()) => {
                    check.promote.insert(*slot);
                }
                Err(message) => {
                    check.errors.insert(slot.to_string(), message.into());
                }
            }
        }
        check
    }

    fn matches_session(
        &self,
        slot: &SlotKey,
        declared: &str,
        assets: &SessionAssets,
    ) -> Result<(), &'static str> {
        if declared.trim().is_empty() {
            return Err("image is required");
        }
        let Some(uploaded) = assets.url(slot) else {
            return Err("no image was uploaded for this slot in the session");
        };

        let declared = self.layout.normalize_url(declared);
        let uploaded = self.layout.normalize_url(uploaded);
        match (declared, uploaded) {
            (Some(declared), Some(uploaded)) if urls_match(&declared, &uploaded) => Ok(()),
            _ => Err("image url does not match the session upload"),
        }
    }
}
