//! Represents an upload session: one authoring workflow of one user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an upload session. Sessions move `Open -> Closed` exactly once.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Closed,
}

/// A staging scope for slot uploads, created before the theme is committed.
///
/// `theme_id` is empty when the session authors a new theme and set when it
/// edits an existing one. Uploads always land under the session's own id; an
/// edit commit promotes them into the theme directory.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Session id, also the name of the staging directory under `themes/`.
    pub id: Uuid,

    /// The user who opened the session.
    pub owner_user_id: Uuid,

    /// Theme being edited, if any.
    pub theme_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,

    /// Bumped by every upload and card deletion.
    pub last_touched_at: DateTime<Utc>,

    pub state: SessionState,
}

impl UploadSession {
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Directory under `themes/` that receives this session's uploads.
    pub fn staging_dir_id(&self) -> Uuid {
        self.id
    }
}
