//! Stale transcode output garbage collection
//!
//! Failed or interrupted encodes leave partial rendition directories (no
//! playlist) and orphaned temp master files behind on purpose, so they can
//! be inspected. This sweep removes them once they are older than the
//! retention window.

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::media::transcoder::{RENDITION_PLAYLIST, Resolution};

const MASTER_TMP: &str = ".master.m3u8.tmp";

/// Sweep result counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub removed_dirs: usize,
    pub removed_files: usize,
}

/// Remove stale partial output under `<media_root>/videos`.
pub async fn sweep(media_root: &Path, retention: Duration) -> Result<GcStats> {
    let root = media_root.join("videos");
    tokio::task::spawn_blocking(move || sweep_blocking(&root, retention))
        .await
        .context("GC sweep task failed")?
}

fn sweep_blocking(videos_root: &Path, retention: Duration) -> Result<GcStats> {
    let mut stats = GcStats::default();
    if !videos_root.is_dir() {
        return Ok(stats);
    }

    // Asset directories are exactly one level below the videos root; their
    // children are rendition directories, the master playlist, and (while
    // an encode is unfinished) the artifacts this sweep is after.
    for entry in WalkDir::new(videos_root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if entry.file_type().is_dir() && is_rendition_dir(name) {
            if path.join(RENDITION_PLAYLIST).exists() {
                continue;
            }
            if is_older_than(path, retention) {
                std::fs::remove_dir_all(path)
                    .with_context(|| format!("removing {}", path.display()))?;
                debug!(path = %path.display(), "Removed partial rendition directory");
                stats.removed_dirs += 1;
            }
        } else if entry.file_type().is_file() && name == MASTER_TMP && is_older_than(path, retention)
        {
            std::fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
            debug!(path = %path.display(), "Removed orphaned temp master playlist");
            stats.removed_files += 1;
        }
    }

    info!(
        removed_dirs = stats.removed_dirs,
        removed_files = stats.removed_files,
        "Stale transcode output sweep completed"
    );
    Ok(stats)
}

fn is_rendition_dir(name: &str) -> bool {
    Resolution::all().iter().any(|r| r.dir_name() == name)
}

fn is_older_than(path: &Path, retention: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age >= retention)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_rendition(root: &Path, asset: &str, res: &str, complete: bool) -> PathBuf {
        let dir = root.join("videos").join(asset).join(res);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("000.ts"), b"seg").unwrap();
        if complete {
            std::fs::write(dir.join(RENDITION_PLAYLIST), "#EXTM3U\n").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn removes_partial_renditions_only() {
        let tmp = tempfile::tempdir().unwrap();
        let partial = make_rendition(tmp.path(), "a1", "720p", false);
        let complete = make_rendition(tmp.path(), "a1", "480p", true);

        let stats = sweep(tmp.path(), Duration::ZERO).await.unwrap();
        assert_eq!(stats.removed_dirs, 1);
        assert!(!partial.exists());
        assert!(complete.exists());
    }

    #[tokio::test]
    async fn removes_orphaned_temp_master() {
        let tmp = tempfile::tempdir().unwrap();
        let asset_dir = tmp.path().join("videos").join("a2");
        std::fs::create_dir_all(&asset_dir).unwrap();
        let tmp_master = asset_dir.join(MASTER_TMP);
        std::fs::write(&tmp_master, "#EXTM3U\n").unwrap();

        let stats = sweep(tmp.path(), Duration::ZERO).await.unwrap();
        assert_eq!(stats.removed_files, 1);
        assert!(!tmp_master.exists());
    }

    #[tokio::test]
    async fn respects_retention_window() {
        let tmp = tempfile::tempdir().unwrap();
        let partial = make_rendition(tmp.path(), "a3", "1080p", false);

        // Everything here was just created, so a one-hour window keeps it.
        let stats = sweep(tmp.path(), Duration::from_secs(3600)).await.unwrap();
        assert_eq!(stats, GcStats::default());
        assert!(partial.exists());
    }

    #[tokio::test]
    async fn missing_videos_root_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let stats = sweep(&tmp.path().join("nowhere"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(stats, GcStats::default());
    }

    #[tokio::test]
    async fn ignores_unrelated_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let extras = tmp.path().join("videos").join("a4").join("extras");
        std::fs::create_dir_all(&extras).unwrap();

        let stats = sweep(tmp.path(), Duration::ZERO).await.unwrap();
        assert_eq!(stats, GcStats::default());
        assert!(extras.exists());
    }
}
