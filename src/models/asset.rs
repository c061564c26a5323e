//! Represents one staged image recorded against a session slot.

use crate::{errors::StagingResult, models::slot::SlotKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per `(session_id, slot_key)`; re-uploading overwrites it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadAsset {
    pub id: Uuid,

    /// Owning session.
    pub session_id: Uuid,

    /// Canonical slot key, e.g. `cards[0].imageQuiz.options[2].imageUrl`.
    pub slot_key: String,

    /// Public URL of the stored file.
    pub url: String,

    pub created_at: DateTime<Utc>,
}

impl UploadAsset {
    pub fn slot(&self) -> StagingResult<SlotKey> {
        SlotKey::parse(&self.slot_key)
    }
}
