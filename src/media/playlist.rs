//! Master playlist assembly
//!
//! Builds the adaptive-streaming entry point once every rendition exists.
//! The manifest is rendered fully in memory and published with a rename so
//! the read path never observes a half-written file.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::transcoder::{RENDITION_PLAYLIST, Resolution};

/// Name of the master manifest at the asset output root.
pub const MASTER_PLAYLIST: &str = "master.m3u8";

/// Master playlist failure.
#[derive(Debug, Error)]
pub enum PlaylistError {
    /// A rendition the manifest must reference is absent. The dependency
    /// edges should make this impossible; hitting it means an upstream
    /// invariant broke, so it is terminal and never retried.
    #[error("rendition playlist missing at {path}")]
    MissingRendition { path: String },

    #[error("failed to write master playlist under {dir}: {source}")]
    Io {
        dir: String,
        #[source]
        source: std::io::Error,
    },
}

/// Render the manifest body for the given renditions, ascending.
///
/// Pure and deterministic: the same rendition set always yields the same
/// bytes.
pub fn render_master(renditions: &[Resolution]) -> String {
    let mut ordered: Vec<Resolution> = renditions.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for res in ordered {
        body.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}/{}\n",
            res.bandwidth(),
            res.width(),
            res.height(),
            res.dir_name(),
            RENDITION_PLAYLIST,
        ));
    }
    body
}

/// Assemble and atomically publish `master.m3u8` under `output_root`.
///
/// Every referenced rendition playlist must already exist; this re-check is
/// defense in depth behind the scheduler's dependency ordering.
pub async fn build_master(
    output_root: &Path,
    renditions: &[Resolution],
) -> Result<PathBuf, PlaylistError> {
    let mut ordered: Vec<Resolution> = renditions.to_vec();
    ordered.sort();
    ordered.dedup();

    for res in &ordered {
        let rendition_playlist = output_root.join(res.dir_name()).join(RENDITION_PLAYLIST);
        if !rendition_playlist.exists() {
            return Err(PlaylistError::MissingRendition {
                path: rendition_playlist.display().to_string(),
            });
        }
    }

    let body = render_master(&ordered);
    let master_path = output_root.join(MASTER_PLAYLIST);
    let tmp_path = output_root.join(".master.m3u8.tmp");

    let io_err = |source| PlaylistError::Io {
        dir: output_root.display().to_string(),
        source,
    };
    tokio::fs::write(&tmp_path, body.as_bytes())
        .await
        .map_err(io_err)?;
    tokio::fs::rename(&tmp_path, &master_path)
        .await
        .map_err(io_err)?;

    info!(
        master = %master_path.display(),
        renditions = ordered.len(),
        "Master playlist published"
    );
    Ok(master_path)
}
