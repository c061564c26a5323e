//! Upload session lifecycle.
//!
//! A user owns at most one open session at a time. Opening a new one closes
//! every other open session of that user in the same transaction; the partial
//! unique index `ux_upload_sessions_open_per_user` backs this up at the
//! database level. Files staged by superseded sessions are left on disk.

use crate::{
    db::is_unique_violation,
    errors::{StagingError, StagingResult},
    models::session::{SessionState, UploadSession},
};
use chrono::Utc;
use sqlx::{Executor, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, owner_user_id, theme_id, created_at, last_touched_at, state";

#[derive(Clone)]
pub struct SessionManager {
    /// Shared SQLite connection pool used for session metadata.
    pub db: Arc<SqlitePool>,
}

impl SessionManager {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open a fresh session for `user_id`, superseding any open one.
    ///
    /// With `theme_id` the session edits that theme, which must exist and be
    /// owned by the caller.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        theme_id: Option<Uuid>,
    ) -> StagingResult<UploadSession> {
        if let Some(theme_id) = theme_id {
            let owned: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM themes WHERE id = ? AND creator_user_id = ?")
                    .bind(theme_id)
                    .bind(user_id)
                    .fetch_optional(&*self.db)
                    .await?;
            if owned.is_none() {
                return Err(StagingError::field(
                    "themeId",
                    "theme not found or not owned by the caller",
                ));
            }
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let superseded = sqlx::query(
            "UPDATE upload_sessions SET state = ?, last_touched_at = ?
             WHERE owner_user_id = ? AND state = ?",
        )
        .bind(SessionState::Closed)
        .bind(now)
        .bind(user_id)
        .bind(SessionState::Open)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let inserted = sqlx::query_as::<_, UploadSession>(&format!(
            "INSERT INTO upload_sessions ({SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(theme_id)
        .bind(now)
        .bind(now)
        .bind(SessionState::Open)
        .fetch_one(&mut *tx)
        .await;

        let session = match inserted {
            Ok(session) => session,
            Err(err) if is_unique_violation(&err) => return Err(StagingError::SessionConflict),
            Err(err) => return Err(StagingError::Sqlx(err)),
        };
        tx.commit().await?;

        info!(
            session_id = %session.id,
            user_id = %user_id,
            theme_id = ?theme_id,
            superseded,
            "opened upload session"
        );
        Ok(session)
    }

    /// The session, if it exists, belongs to `user_id` and is still open.
    pub async fn find_open(&self, session_id: Uuid, user_id: Uuid) -> StagingResult<UploadSession> {
        sqlx::query_as::<_, UploadSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions
             WHERE id = ? AND owner_user_id = ? AND state = ?"
        ))
        .bind(session_id)
        .bind(user_id)
        .bind(SessionState::Open)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(StagingError::SessionNotFound)
    }

    /// Fetch a session regardless of owner or state.
    #[cfg(test)]
    pub async fn fetch(&self, session_id: Uuid) -> StagingResult<Option<UploadSession>> {
        let session = sqlx::query_as::<_, UploadSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(session)
    }

    /// Close a session. Closing an already closed session is a no-op.
    #[cfg(test)]
    pub async fn close(&self, session_id: Uuid) -> StagingResult<bool> {
        Self::close_in(&*self.db, session_id).await
    }

    /// Bump `last_touched_at` of an open session.
    #[cfg(test)]
    pub async fn touch(&self, session_id: Uuid) -> StagingResult<()> {
        Self::touch_in(&*self.db, session_id).await
    }

    /// Close inside a caller-provided executor. Returns true if this call
    /// performed the `Open -> Closed` transition.
    pub async fn close_in<'e, E>(executor: E, session_id: Uuid) -> StagingResult<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let closed = sqlx::query(
            "UPDATE upload_sessions SET state = ?, last_touched_at = ? WHERE id = ? AND state = ?",
        )
        .bind(SessionState::Closed)
        .bind(Utc::now())
        .bind(session_id)
        .bind(SessionState::Open)
        .execute(executor)
        .await?
        .rows_affected()
            == 1;

        debug!(session_id = %session_id, closed, "close upload session");
        Ok(closed)
    }

    /// Touch inside a caller-provided executor. Fails with
    /// [`StagingError::SessionNotFound`] if the session is no longer open.
    pub async fn touch_in<'e, E>(executor: E, session_id: Uuid) -> StagingResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let touched = sqlx::query(
            "UPDATE upload_sessions SET last_touched_at = ? WHERE id = ? AND state = ?",
        )
        .bind(Utc::now())
        .bind(session_id)
        .bind(SessionState::Open)
        .execute(executor)
        .await?
        .rows_affected();

        if touched == 0 {
            return Err(StagingError::SessionNotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Insert a minimal theme row owned by `owner`.
    pub async fn insert_theme(db: &SqlitePool, id: Uuid, owner: Uuid) {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO themes (id, creator_user_id, name, image, ready_to_play, cards, created_at, updated_at)
             VALUES (?, ?, 'Existing', '/media/cover.webp', 0, '[]', ?, ?)",
        )
        .bind(id)
        .bind(owner)
        .bind(now)
        .bind(now)
        .execute(db)
        .await
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    async fn open_count(db: &SqlitePool, user: Uuid) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM upload_sessions WHERE owner_user_id = ? AND state = 'open'",
        )
        .bind(user)
        .fetch_one(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn new_session_supersedes_the_open_one() {
        let manager = SessionManager::new(memory_pool().await);
        let user = Uuid::new_v4();

        let first = manager.create_session(user, None).await.unwrap();
        assert!(first.is_open());
        assert_eq!(open_count(&manager.db, user).await, 1);

        let second = manager.create_session(user, None).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(open_count(&manager.db, user).await, 1);

        let first = manager.fetch(first.id).await.unwrap().unwrap();
        assert_eq!(first.state, SessionState::Closed);
        assert!(manager.find_open(second.id, user).await.is_ok());
        assert!(matches!(
            manager.find_open(first.id, user).await,
            Err(StagingError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn sessions_of_other_users_are_untouched() {
        let manager = SessionManager::new(memory_pool().await);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let alice_session = manager.create_session(alice, None).await.unwrap();
        manager.create_session(bob, None).await.unwrap();

        assert!(manager.find_open(alice_session.id, alice).await.is_ok());
        assert!(matches!(
            manager.find_open(alice_session.id, bob).await,
            Err(StagingError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn edit_session_requires_an_owned_theme() {
        let manager = SessionManager::new(memory_pool().await);
        let owner = Uuid::new_v4();
        let theme = Uuid::new_v4();
        test_support::insert_theme(&manager.db, theme, owner).await;

        let session = manager.create_session(owner, Some(theme)).await.unwrap();
        assert_eq!(session.theme_id, Some(theme));
        assert_eq!(session.staging_dir_id(), session.id);

        let stranger = manager.create_session(Uuid::new_v4(), Some(theme)).await;
        assert!(matches!(stranger, Err(StagingError::Validation(errors)) if errors.contains_key("themeId")));

        let missing = manager.create_session(owner, Some(Uuid::new_v4())).await;
        assert!(matches!(missing, Err(StagingError::Validation(_))));
        // A rejected request leaves the current session open.
        assert!(manager.find_open(session.id, owner).await.is_ok());
    }

    #[tokio::test]
    async fn close_is_terminal_and_idempotent() {
        let manager = SessionManager::new(memory_pool().await);
        let user = Uuid::new_v4();
        let session = manager.create_session(user, None).await.unwrap();

        assert!(manager.close(session.id).await.unwrap());
        assert!(!manager.close(session.id).await.unwrap());
        assert!(matches!(
            manager.touch(session.id).await,
            Err(StagingError::SessionNotFound)
        ));
        assert_eq!(open_count(&manager.db, user).await, 0);
    }

    #[tokio::test]
    async fn touch_moves_last_touched_forward() {
        let manager = SessionManager::new(memory_pool().await);
        let user = Uuid::new_v4();
        let session = manager.create_session(user, None).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        manager.touch(session.id).await.unwrap();

        let touched = manager.fetch(session.id).await.unwrap().unwrap();
        assert!(touched.last_touched_at > session.last_touched_at);
        assert_eq!(touched.created_at, session.created_at);
    }
}
