//! FFmpeg-based HLS transcoding
//!
//! One call produces one rendition: a resolution-named subdirectory under
//! the asset's output root containing `index.m3u8` plus numbered `.ts`
//! segments. The argument template is fixed so reruns are deterministic and
//! safe to retry.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::probe::{ProbeError, Prober};

/// Name of the per-rendition playlist inside its resolution directory.
pub const RENDITION_PLAYLIST: &str = "index.m3u8";

/// Supported target renditions, ascending.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Resolution {
    /// 854x480 @ 800 kbps
    P480,
    /// 1280x720 @ 2.8 Mbps
    P720,
    /// 1920x1080 @ 5 Mbps
    P1080,
}

impl Resolution {
    pub fn all() -> [Resolution; 3] {
        [Resolution::P480, Resolution::P720, Resolution::P1080]
    }

    pub fn height(&self) -> u32 {
        match self {
            Resolution::P480 => 480,
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Resolution::P480 => 854,
            Resolution::P720 => 1280,
            Resolution::P1080 => 1920,
        }
    }

    /// Bandwidth hint advertised in the master playlist, bits per second.
    pub fn bandwidth(&self) -> u32 {
        match self {
            Resolution::P480 => 800_000,
            Resolution::P720 => 2_800_000,
            Resolution::P1080 => 5_000_000,
        }
    }

    /// Subdirectory name under the asset output root ("480p", ...).
    pub fn dir_name(&self) -> &'static str {
        match self {
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
        }
    }

    /// Scale filter keeping aspect ratio, width rounded to an even value.
    fn scale_filter(&self) -> String {
        format!("scale=-2:{}", self.height())
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// One completed resolution-specific output.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub resolution: Resolution,
    /// The rendition playlist (`<root>/<res>/index.m3u8`).
    pub playlist: PathBuf,
    /// Media segments in playback order.
    pub segments: Vec<PathBuf>,
}

/// Encoding failure.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("source file '{path}' does not exist")]
    SourceMissing { path: String },

    #[error("source is not an encodable video: {0}")]
    UnsupportedSource(#[source] ProbeError),

    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg exited with code {exit_code} for {resolution}: {stderr}")]
    Failed {
        resolution: Resolution,
        exit_code: String,
        stderr: String,
    },

    #[error("ffmpeg succeeded but produced no {missing} under {dir}")]
    MissingOutput { dir: String, missing: &'static str },

    #[error("encode cancelled")]
    Cancelled,

    #[error("failed to prepare output directory {dir}: {source}")]
    Io {
        dir: String,
        #[source]
        source: std::io::Error,
    },
}

impl EncodeError {
    /// Whether the scheduler may retry this failure.
    ///
    /// Launch problems (missing binary, fork failure) and output-directory
    /// IO are environmental; a non-zero ffmpeg exit or a rejected source is
    /// a property of the input and will not get better on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            EncodeError::Launch { .. } | EncodeError::Io { .. } => true,
            EncodeError::UnsupportedSource(probe) => probe.is_transient(),
            EncodeError::SourceMissing { .. }
            | EncodeError::Failed { .. }
            | EncodeError::MissingOutput { .. }
            | EncodeError::Cancelled => false,
        }
    }
}

/// HLS transcoding service wrapping the ffmpeg command line.
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg_path: String,
    prober: Prober,
}

impl Transcoder {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            prober: Prober::new(),
        }
    }

    pub fn with_paths(ffmpeg_path: String, prober: Prober) -> Self {
        Self {
            ffmpeg_path,
            prober,
        }
    }

    /// Check if ffmpeg is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Transcode `source` to one HLS rendition under
    /// `<output_root>/<resolution>/`.
    ///
    /// Writes only inside its own resolution subdirectory. On failure,
    /// partial output is left in place for diagnostics; the stale-output
    /// sweep or a cleanup job removes it later.
    pub async fn transcode(
        &self,
        source: &Path,
        resolution: Resolution,
        output_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<Rendition, EncodeError> {
        if !source.exists() {
            return Err(EncodeError::SourceMissing {
                path: source.display().to_string(),
            });
        }

        let info = self
            .prober
            .probe(source)
            .await
            .map_err(EncodeError::UnsupportedSource)?;
        if !info.has_video() {
            return Err(EncodeError::UnsupportedSource(ProbeError::Rejected {
                path: source.display().to_string(),
                exit_code: "0".to_string(),
                stderr: "no video stream in source".to_string(),
            }));
        }

        let res_dir = output_root.join(resolution.dir_name());
        tokio::fs::create_dir_all(&res_dir)
            .await
            .map_err(|source| EncodeError::Io {
                dir: res_dir.display().to_string(),
                source,
            })?;

        info!(
            source = %source.display(),
            resolution = %resolution,
            duration_secs = ?info.duration_secs,
            "Starting HLS encode"
        );

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(ffmpeg_args(source, resolution, &res_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| EncodeError::Launch {
            command: self.ffmpeg_path.clone(),
            source,
        })?;

        // Drain stderr concurrently so a chatty encoder can't fill the pipe
        // and deadlock against wait().
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).trim().to_string()
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|source| EncodeError::Launch {
                command: self.ffmpeg_path.clone(),
                source,
            })?,
            _ = cancel.cancelled() => {
                warn!(resolution = %resolution, "Encode cancelled, killing ffmpeg");
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(EncodeError::Cancelled);
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(EncodeError::Failed {
                resolution,
                exit_code: status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                stderr: if stderr.is_empty() {
                    "no error output".to_string()
                } else {
                    stderr
                },
            });
        }

        let rendition = collect_rendition(resolution, &res_dir).await?;
        info!(
            resolution = %resolution,
            playlist = %rendition.playlist.display(),
            segments = rendition.segments.len(),
            "Rendition complete"
        );
        Ok(rendition)
    }
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed ffmpeg argument template for one rendition.
///
/// Constant quality (crf 23 / veryfast), AAC audio, 6-second VOD segments.
/// `-y` makes reruns overwrite the same subdirectory deterministically.
fn ffmpeg_args(source: &Path, resolution: Resolution, res_dir: &Path) -> Vec<String> {
    let playlist = res_dir.join(RENDITION_PLAYLIST);
    let segment_pattern = res_dir.join("%03d.ts");

    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        source.display().to_string(),
        "-vf".into(),
        resolution.scale_filter(),
        "-c:v".into(),
        "libx264".into(),
        "-crf".into(),
        "23".into(),
        "-preset".into(),
        "veryfast".into(),
        "-c:a".into(),
        "aac".into(),
        "-strict".into(),
        "-2".into(),
        "-hls_time".into(),
        "6".into(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
        segment_pattern.display().to_string(),
        playlist.display().to_string(),
    ]
}

/// Verify the encoder actually produced a playlist and segments.
async fn collect_rendition(
    resolution: Resolution,
    res_dir: &Path,
) -> Result<Rendition, EncodeError> {
    let playlist = res_dir.join(RENDITION_PLAYLIST);
    if !playlist.exists() {
        return Err(EncodeError::MissingOutput {
            dir: res_dir.display().to_string(),
            missing: "playlist",
        });
    }

    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(res_dir)
        .await
        .map_err(|source| EncodeError::Io {
            dir: res_dir.display().to_string(),
            source,
        })?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| EncodeError::Io {
            dir: res_dir.display().to_string(),
            source,
        })?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("ts") {
            segments.push(path);
        }
    }
    // %03d naming makes lexical order playback order
    segments.sort();

    if segments.is_empty() {
        return Err(EncodeError::MissingOutput {
            dir: res_dir.display().to_string(),
            missing: "segments",
        });
    }

    debug!(resolution = %resolution, segments = segments.len(), "Collected rendition output");
    Ok(Rendition {
        resolution,
        playlist,
        segments,
    })
}
