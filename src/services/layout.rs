//! Physical and public addressing of stored theme files.
//!
//! Every file lives at `{root}/themes/{dir}/{relative}` and is served at
//! `{public_base}/themes/{dir}/{relative}`, where `dir` is a session id
//! (staging) or a theme id (permanent). All path construction goes through
//! [`StorageLayout::resolve`], which refuses anything that would land outside
//! the storage root.

use crate::{
    errors::{StagingError, StagingResult},
    models::slot::SlotKey,
};
use std::path::{Component, Path, PathBuf};
use url::Url;
use uuid::Uuid;

/// Top-level directory holding one folder per session or theme.
pub const THEMES_DIR: &str = "themes";

/// File name of a theme's cover image.
pub const COVER_FILE: &str = "cover.webp";

#[derive(Clone, Debug)]
pub struct StorageLayout {
    root: PathBuf,
    public_base: String,
    base_path: String,
}

impl StorageLayout {
    /// Build a layout from the configured root and public base.
    ///
    /// `public_base` may be a bare path (`/media`) or an absolute URL
    /// (`https://cdn.example.com/media`); URLs handed out keep it verbatim.
    pub fn new(root: impl Into<PathBuf>, public_base: &str) -> StagingResult<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(StagingError::StorageMisconfigured(
                "storage root is not set".into(),
            ));
        }

        let public_base = public_base.trim().trim_end_matches('/').to_string();
        if public_base.is_empty() {
            return Err(StagingError::StorageMisconfigured(
                "public base is not set".into(),
            ));
        }

        let base_path = url_path(&public_base)
            .ok_or_else(|| {
                StagingError::StorageMisconfigured(
                    "public base must be a path or an http(s) url".into(),
                )
            })?
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            root,
            public_base,
            base_path,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_base(&self) -> &str {
        &self.public_base
    }

    /// Path component of the public base without a trailing slash (may be empty).
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Root-relative location of a directory under `themes/`.
    pub fn dir_relative(dir_id: Uuid) -> String {
        format!("{THEMES_DIR}/{dir_id}")
    }

    /// Root-relative location of a slot's file inside a session or theme directory.
    pub fn slot_relative(dir_id: Uuid, slot: &SlotKey) -> String {
        format!("{THEMES_DIR}/{dir_id}/{}", slot.relative_path())
    }

    pub fn cover_relative(dir_id: Uuid) -> String {
        format!("{THEMES_DIR}/{dir_id}/{COVER_FILE}")
    }

    /// Public URL for a root-relative path.
    pub fn public_url(&self, relative: &str) -> String {
        format!("{}/{}", self.public_base, relative.trim_start_matches('/'))
    }

    /// Join a root-relative path onto the root, rejecting any escape.
    pub fn resolve(&self, relative: &str) -> StagingResult<PathBuf> {
        resolve_within(&self.root, relative)
    }

    /// Physical directory of a session or theme.
    pub fn dir_path(&self, dir_id: Uuid) -> StagingResult<PathBuf> {
        self.resolve(&Self::dir_relative(dir_id))
    }

    /// Reduce a URL to its public path, or `None` if it is not served from
    /// the public base.
    ///
    /// Absolute URLs are reduced to their path (query and fragment dropped).
    /// A bare `/themes/...` path is re-anchored under the base path. Paths with
    /// `.`/`..` segments or backslashes are never considered storage URLs.
    /// Case is preserved; compare results with [`urls_match`].
    pub fn normalize_url(&self, url: &str) -> Option<String> {
        let trimmed = url.trim();
        if trimmed.is_empty() || has_unsafe_segments(trimmed) {
            return None;
        }

        let mut path = url_path(trimmed)?;
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        let base_prefix = format!("{}/", self.base_path);
        if !self.base_path.is_empty()
            && !starts_with_ignore_case(&path, &base_prefix)
            && starts_with_ignore_case(&path, &format!("/{THEMES_DIR}/"))
        {
            path = format!("{}{}", self.base_path, path);
        }

        if !starts_with_ignore_case(&path, &base_prefix) {
            return None;
        }
        Some(path)
    }

    /// Root-relative path (`themes/...`) addressed by a public URL.
    pub fn relative_from_url(&self, url: &str) -> Option<String> {
        let normalized = self.normalize_url(url)?;
        let relative = &normalized[self.base_path.len() + 1..];
        (!relative.is_empty()).then(|| relative.to_string())
    }

    /// Whether a normalized URL points inside `themes/{dir_id}/`.
    pub fn is_under_dir(&self, normalized: &str, dir_id: Uuid) -> bool {
        starts_with_ignore_case(
            normalized,
            &format!("{}/{THEMES_DIR}/{dir_id}/", self.base_path),
        )
    }
}

/// Case-insensitive comparison of two normalized URLs.
pub fn urls_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Lexically resolve `relative` beneath `root`.
///
/// The result must name an entry strictly inside `root`: absolute inputs,
/// `..` that climbs above the root, backslashes, control characters and
/// empty paths are all rejected as [`StagingError::PathTraversal`].
pub fn resolve_within(root: &Path, relative: &str) -> StagingResult<PathBuf> {
    let traversal = || StagingError::PathTraversal(relative.chars().take(256).collect());

    if relative.bytes().any(|b| b == b'\\' || b.is_ascii_control()) {
        return Err(traversal());
    }

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(traversal());
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    if depth == 0 {
        return Err(traversal());
    }
    Ok(resolved)
}

/// Path part of a URL.
///
/// Absolute `http(s)` URLs are parsed and reduced to their path. Other schemes
/// have no storage path. Input that is not an absolute URL is taken as a path
/// with its query and fragment dropped.
fn url_path(url: &str) -> Option<String> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
            Some(parsed.path().to_string())
        }
        Ok(_) => None,
        Err(_) => url.split(['?', '#']).next().map(str::to_string),
    }
}

/// URL parsing folds `.`/`..` segments and backslashes away; storage URLs
/// must not contain them in the first place.
fn has_unsafe_segments(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment == "." || segment == "..")
}

pub(crate) fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}
