//! Asset model for pipeline-managed videos
//!
//! An asset is the logical video whose lifecycle the pipeline owns: one
//! immutable identifier, one source file, one output subtree that every
//! rendition and playlist lives under.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::transcoder::Resolution;

/// Opaque, immutable asset identifier.
///
/// Assigned once at creation and used for every derived storage path.
/// Deliberately not derived from titles or filenames, so edits to either
/// never move or collide the on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A video under pipeline management.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Stable identifier, assigned at creation.
    pub id: AssetId,

    /// The uploaded source file to transcode.
    pub source_path: PathBuf,

    /// Directory that all renditions and playlists live under.
    /// Owned exclusively by this asset's job graph.
    pub output_root: PathBuf,

    /// Target renditions, ascending.
    pub resolutions: Vec<Resolution>,
}

impl Asset {
    /// Create an asset for an already-stored source file.
    pub fn new(source_path: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            id: AssetId::new(),
            source_path: source_path.into(),
            output_root: output_root.into(),
            resolutions: Resolution::all().to_vec(),
        }
    }

    /// Build the storage location for a fresh upload under `media_root`:
    /// `<media_root>/videos/<asset_id>/<sanitized original filename>`.
    ///
    /// The id directory makes the layout collision-free regardless of what
    /// users name their files.
    pub fn upload_location(media_root: &Path, id: AssetId, original_name: &str) -> PathBuf {
        let name = sanitize_filename::sanitize(original_name);
        media_root.join("videos").join(id.to_string()).join(name)
    }
}

/// Caller-visible lifecycle state of an asset's processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetStatus {
    /// Graph submitted, nothing dispatched yet.
    Pending,
    /// At least one job has run or is running.
    InProgress,
    /// Every job succeeded; the master playlist is live.
    Ready,
    /// A job failed (or was skipped behind a failure); processing stopped.
    Failed { reason: String },
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::InProgress => "in_progress",
            AssetStatus::Ready => "ready",
            AssetStatus::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetStatus::Failed { reason } => write!(f, "failed: {reason}"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_ids_are_unique() {
        assert_ne!(AssetId::new(), AssetId::new());
    }

    #[test]
    fn upload_location_is_id_scoped() {
        let id = AssetId::new();
        let path = Asset::upload_location(Path::new("/data/media"), id, "My Movie.mp4");
        assert_eq!(
            path,
            Path::new("/data/media")
                .join("videos")
                .join(id.to_string())
                .join("My Movie.mp4")
        );
    }

    #[test]
    fn upload_location_sanitizes_hostile_names() {
        let id = AssetId::new();
        let path = Asset::upload_location(Path::new("/data/media"), id, "../../etc/passwd");
        assert!(
            path.starts_with(Path::new("/data/media").join("videos").join(id.to_string())),
            "sanitized path must stay inside the asset directory: {}",
            path.display()
        );
    }

    #[test]
    fn new_asset_targets_all_renditions() {
        let asset = Asset::new("/tmp/in.mp4", "/tmp/out");
        assert_eq!(asset.resolutions, Resolution::all().to_vec());
    }
}
