//! Low-level file operations under the storage root.
//!
//! Writes go through a temp file + rename so readers never see a partially
//! written image. Removal helpers are best-effort: they log and carry on.

use crate::{
    errors::{StagingError, StagingResult},
    services::layout::StorageLayout,
};
use std::{
    io::{self, ErrorKind},
    path::Path,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Write `bytes` to `path`, creating parent directories, replacing any existing file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StagingResult<()> {
    let parent = path.parent().ok_or_else(|| {
        StagingError::Io(io::Error::new(
            ErrorKind::Other,
            "target path missing parent directory",
        ))
    })?;
    fs::create_dir_all(parent).await?;

    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StagingError::Io(err));
    }

    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StagingError::Io(err));
    }

    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Move `source` onto `destination`, overwriting it.
///
/// A missing source is reported as [`StagingError::PromotionSourceMissing`]
/// with `label` identifying it.
pub async fn move_file(source: &Path, destination: &Path, label: &str) -> StagingResult<()> {
    if !fs::try_exists(source).await? {
        return Err(StagingError::PromotionSourceMissing(label.to_string()));
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::remove_file(destination).await {
        Ok(()) => debug!("replaced existing file {}", destination.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(StagingError::Io(err)),
    }

    fs::rename(source, destination).await.map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            StagingError::PromotionSourceMissing(label.to_string())
        } else {
            StagingError::Io(err)
        }
    })?;

    debug!("moved {} -> {}", source.display(), destination.display());
    Ok(())
}

/// Remove a file, tolerating its absence.
pub async fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Remove the file behind a public URL, but only if the URL is served from
/// the public base and resolves inside the storage root. Never fails.
pub async fn remove_public_file(layout: &StorageLayout, url: &str) {
    let Some(relative) = layout.relative_from_url(url) else {
        debug!("not removing {}: outside the public base", url);
        return;
    };
    let path = match layout.resolve(&relative) {
        Ok(path) => path,
        Err(err) => {
            warn!("not removing {}: {}", url, err);
            return;
        }
    };

    match remove_file_if_exists(&path).await {
        Ok(true) => debug!("removed physical file {}", path.display()),
        Ok(false) => debug!("file {} already missing", path.display()),
        Err(err) => warn!("failed to remove {}: {}", path.display(), err),
    }
}

/// Recursively remove a directory. Absence is fine; other failures are logged.
pub async fn remove_dir_best_effort(path: &Path) {
    match fs::remove_dir_all(path).await {
        Ok(()) => debug!("removed directory {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove directory {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_atomic_creates_parents_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a/b/c.webp");

        write_atomic(&target, b"one").await.unwrap();
        write_atomic(&target, b"two").await.unwrap();

        assert_eq!(fs::read(&target).await.unwrap(), b"two");
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn move_file_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src/x.webp");
        let destination = dir.path().join("dst/nested/x.webp");
        write_atomic(&source, b"new").await.unwrap();
        write_atomic(&destination, b"old").await.unwrap();

        move_file(&source, &destination, "x").await.unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&destination).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn move_file_fails_loudly_on_missing_source() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("dst/x.webp");
        write_atomic(&destination, b"keep").await.unwrap();

        let err = move_file(&dir.path().join("nope.webp"), &destination, "cards[0].imageUrl")
            .await
            .unwrap_err();

        assert!(matches!(err, StagingError::PromotionSourceMissing(label) if label == "cards[0].imageUrl"));
        assert_eq!(fs::read(&destination).await.unwrap(), b"keep");
    }

    #[tokio::test]
    async fn remove_public_file_ignores_foreign_urls() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path(), "/media").unwrap();
        let inside = dir.path().join("themes/t/cover.webp");
        write_atomic(&inside, b"x").await.unwrap();

        remove_public_file(&layout, "https://elsewhere.example/static/themes/t/cover.webp").await;
        assert!(inside.exists());

        remove_public_file(&layout, "/media/themes/t/cover.webp").await;
        assert!(!inside.exists());

        remove_public_file(&layout, "/media/themes/t/cover.webp").await;
    }
}
