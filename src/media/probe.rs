//! ffprobe-based source inspection
//!
//! Runs ffprobe (command-line) against an uploaded source before encoding.
//! The JSON output format is stable and well-documented, which makes this
//! more reliable than linking FFmpeg directly.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Probe failure. Launch problems are transient (the binary may be
/// temporarily unavailable); everything else means the source itself is bad.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe rejected '{path}' (exit code {exit_code}): {stderr}")]
    Rejected {
        path: String,
        exit_code: String,
        stderr: String,
    },

    #[error("failed to parse ffprobe output for '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProbeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::Launch { .. })
    }
}

/// What the pipeline needs to know about a source file.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub container: Option<String>,
    pub duration_secs: Option<f64>,
    /// Dimensions of the first video stream, if any.
    pub video_dimensions: Option<(u32, u32)>,
}

impl SourceInfo {
    pub fn has_video(&self) -> bool {
        self.video_dimensions.is_some()
    }
}

/// ffprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub duration: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
    }
}

/// ffprobe wrapper
#[derive(Debug, Clone)]
pub struct Prober {
    ffprobe_path: String,
}

impl Prober {
    pub fn new() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
        }
    }

    pub fn with_ffprobe_path(ffprobe_path: String) -> Self {
        Self { ffprobe_path }
    }

    /// Check if ffprobe is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Inspect a source file.
    pub async fn probe(&self, path: &Path) -> Result<SourceInfo, ProbeError> {
        debug!(path = %path.display(), "Probing source file");

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|source| ProbeError::Launch {
                command: self.ffprobe_path.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Rejected {
                path: path.display().to_string(),
                exit_code: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                stderr: if stderr.trim().is_empty() {
                    "no error output".to_string()
                } else {
                    stderr.trim().to_string()
                },
            });
        }

        let probe: ffprobe::FfprobeOutput =
            serde_json::from_slice(&output.stdout).map_err(|source| ProbeError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self::convert(probe))
    }

    fn convert(probe: ffprobe::FfprobeOutput) -> SourceInfo {
        let format = probe.format;
        let video_dimensions = probe.streams.iter().flatten().find_map(|s| {
            if s.codec_type.as_deref() == Some("video") {
                Some((s.width?, s.height?))
            } else {
                None
            }
        });

        SourceInfo {
            container: format.as_ref().and_then(|f| f.format_name.clone()),
            duration_secs: format
                .as_ref()
                .and_then(|f| f.duration.as_ref())
                .and_then(|d| d.parse().ok()),
            video_dimensions,
        }
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}
