//! Job execution contract
//!
//! The scheduler is generic over how a job's work body runs; the media
//! executor wires the real transcoder, playlist builder, and cleanup
//! operations. Tests substitute scripted executors.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::graph::JobKind;
use crate::media::cleanup::{CleanupError, cleanup_asset, cleanup_source};
use crate::media::playlist::{PlaylistError, build_master};
use crate::media::transcoder::{EncodeError, Transcoder};

/// Result payload of a finished job.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    /// Primary artifact, when the job produces one (rendition playlist,
    /// master playlist).
    pub output: Option<PathBuf>,
    /// One-line human-readable summary.
    pub detail: Option<String>,
}

impl JobOutcome {
    pub fn at(output: PathBuf) -> Self {
        Self {
            output: Some(output),
            detail: None,
        }
    }

    pub fn message(detail: impl Into<String>) -> Self {
        Self {
            output: None,
            detail: Some(detail.into()),
        }
    }
}

/// Why a job's work body failed.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Whether the scheduler may retry this failure with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::Encode(e) => e.is_transient(),
            // A missing rendition means an upstream invariant broke;
            // retrying would just re-observe it.
            JobError::Playlist(_) => false,
            // Removal failures are surfaced, not retried: the target
            // either exists with bad permissions or the FS is sick.
            JobError::Cleanup(_) => false,
            JobError::Panicked(_) => false,
        }
    }
}

/// Executes one job's work body.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        kind: &JobKind,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError>;
}

/// The production executor: ffmpeg renditions, manifest assembly, and
/// filesystem cleanup.
pub struct MediaExecutor {
    transcoder: Transcoder,
}

impl MediaExecutor {
    pub fn new(transcoder: Transcoder) -> Self {
        Self { transcoder }
    }
}

#[async_trait]
impl JobExecutor for MediaExecutor {
    async fn execute(
        &self,
        kind: &JobKind,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        match kind {
            JobKind::Transcode {
                source,
                resolution,
                output_root,
            } => {
                let rendition = self
                    .transcoder
                    .transcode(source, *resolution, output_root, cancel)
                    .await?;
                Ok(JobOutcome {
                    output: Some(rendition.playlist),
                    detail: Some(format!(
                        "{} segments at {}",
                        rendition.segments.len(),
                        resolution
                    )),
                })
            }
            JobKind::BuildPlaylist {
                output_root,
                renditions,
            } => {
                let master = build_master(output_root, renditions).await?;
                Ok(JobOutcome::at(master))
            }
            JobKind::CleanupSource { path } => {
                let outcome = cleanup_source(path).await?;
                Ok(JobOutcome::message(outcome.to_string()))
            }
            JobKind::CleanupAsset {
                video_dir,
                thumbnail,
            } => {
                let summary = cleanup_asset(video_dir.as_deref(), thumbnail.as_deref()).await?;
                Ok(JobOutcome::message(summary.to_string()))
            }
        }
    }
}
