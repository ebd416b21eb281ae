//! Filesystem cleanup for sources and asset subtrees
//!
//! Removal targets are always passed in explicitly; nothing here infers
//! paths from other state. A target that is already gone is a successful
//! no-op; only an actual removal failure (permissions, IO) is an error.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

/// Cleanup failure on a path that exists but could not be removed.
#[derive(Debug, Error)]
#[error("failed to remove {path}: {source}")]
pub struct CleanupError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}

/// What happened to a single cleanup target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed(PathBuf),
    /// Target was already absent.
    Missing(PathBuf),
}

impl fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupOutcome::Removed(path) => write!(f, "deleted {}", path.display()),
            CleanupOutcome::Missing(path) => write!(f, "{} not found", path.display()),
        }
    }
}

/// Remove exactly one file (the original upload after HLS conversion).
pub async fn cleanup_source(path: &Path) -> Result<CleanupOutcome, CleanupError> {
    if !path.exists() {
        info!(path = %path.display(), "Source already absent, nothing to clean");
        return Ok(CleanupOutcome::Missing(path.to_path_buf()));
    }

    tokio::fs::remove_file(path)
        .await
        .map_err(|source| CleanupError {
            path: path.display().to_string(),
            source,
        })?;

    info!(path = %path.display(), "Removed original source");
    Ok(CleanupOutcome::Removed(path.to_path_buf()))
}

/// Summary of an asset-wide cleanup.
#[derive(Debug, Default)]
pub struct AssetCleanup {
    pub outcomes: Vec<CleanupOutcome>,
}

impl AssetCleanup {
    pub fn removed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, CleanupOutcome::Removed(_)))
            .count()
    }
}

impl fmt::Display for AssetCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.outcomes.is_empty() {
            return write!(f, "nothing to clean");
        }
        let parts: Vec<String> = self.outcomes.iter().map(|o| o.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Remove an asset's on-disk remains: its video directory and/or thumbnail.
///
/// Each component is checked and removed independently; a missing one never
/// blocks removal of the other. The first hard failure is returned after
/// every component has been attempted.
pub async fn cleanup_asset(
    video_dir: Option<&Path>,
    thumbnail: Option<&Path>,
) -> Result<AssetCleanup, CleanupError> {
    let mut summary = AssetCleanup::default();
    let mut first_error: Option<CleanupError> = None;

    if let Some(dir) = video_dir {
        match remove_dir(dir).await {
            Ok(outcome) => summary.outcomes.push(outcome),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to remove video directory");
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(thumb) = thumbnail {
        match remove_file(thumb).await {
            Ok(outcome) => summary.outcomes.push(outcome),
            Err(e) => {
                warn!(path = %thumb.display(), error = %e, "Failed to remove thumbnail");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!(summary = %summary, "Asset cleanup finished");
            Ok(summary)
        }
    }
}

async fn remove_dir(path: &Path) -> Result<CleanupOutcome, CleanupError> {
    if !path.exists() {
        return Ok(CleanupOutcome::Missing(path.to_path_buf()));
    }
    tokio::fs::remove_dir_all(path)
        .await
        .map_err(|source| CleanupError {
            path: path.display().to_string(),
            source,
        })?;
    Ok(CleanupOutcome::Removed(path.to_path_buf()))
}

async fn remove_file(path: &Path) -> Result<CleanupOutcome, CleanupError> {
    if !path.exists() {
        return Ok(CleanupOutcome::Missing(path.to_path_buf()));
    }
    tokio::fs::remove_file(path)
        .await
        .map_err(|source| CleanupError {
            path: path.display().to_string(),
            source,
        })?;
    Ok(CleanupOutcome::Removed(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn cleanup_source_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("in.mp4");
        tokio::fs::write(&file, b"video").await.unwrap();

        let outcome = cleanup_source(&file).await.unwrap();
        assert_matches!(outcome, CleanupOutcome::Removed(_));
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn cleanup_source_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gone.mp4");

        let outcome = cleanup_source(&file).await.unwrap();
        assert_matches!(outcome, CleanupOutcome::Missing(_));
    }

    #[tokio::test]
    async fn cleanup_asset_removes_both_components() {
        let dir = tempfile::tempdir().unwrap();
        let video_dir = dir.path().join("videos").join("a1");
        tokio::fs::create_dir_all(video_dir.join("480p")).await.unwrap();
        tokio::fs::write(video_dir.join("480p").join("index.m3u8"), "#EXTM3U\n")
            .await
            .unwrap();
        let thumb = dir.path().join("thumb.jpg");
        tokio::fs::write(&thumb, b"jpg").await.unwrap();

        let summary = cleanup_asset(Some(&video_dir), Some(&thumb)).await.unwrap();
        assert_eq!(summary.removed_count(), 2);
        assert!(!video_dir.exists());
        assert!(!thumb.exists());
    }

    #[tokio::test]
    async fn cleanup_asset_missing_component_does_not_block_other() {
        let dir = tempfile::tempdir().unwrap();
        let video_dir = dir.path().join("videos").join("a1");
        let thumb = dir.path().join("thumb.jpg");
        tokio::fs::write(&thumb, b"jpg").await.unwrap();

        let summary = cleanup_asset(Some(&video_dir), Some(&thumb)).await.unwrap();
        assert_eq!(summary.removed_count(), 1);
        assert!(!thumb.exists());
    }

    #[tokio::test]
    async fn cleanup_asset_on_nothing_is_a_noop() {
        let summary = cleanup_asset(None, None).await.unwrap();
        assert!(summary.outcomes.is_empty());
        assert_eq!(summary.to_string(), "nothing to clean");
    }

    #[tokio::test]
    async fn cleanup_asset_missing_everything_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let summary = cleanup_asset(
            Some(&dir.path().join("no-such-dir")),
            Some(&dir.path().join("no-such.jpg")),
        )
        .await
        .unwrap();
        assert_eq!(summary.removed_count(), 0);
        assert_eq!(summary.outcomes.len(), 2);
    }
}
