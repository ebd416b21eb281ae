//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Media storage root; uploads live under `<media_root>/videos/<id>/`
    pub media_root: PathBuf,

    /// Path to the ffmpeg executable
    pub ffmpeg_path: String,

    /// Path to the ffprobe executable
    pub ffprobe_path: String,

    /// Maximum concurrently executing pipeline jobs
    pub max_workers: usize,

    /// Maximum attempts for a job whose failures classify as transient
    pub max_attempts: u32,

    /// Initial backoff between retry attempts
    pub retry_initial_interval: Duration,

    /// Cron expression for the stale-output sweep
    pub gc_schedule: String,

    /// Minimum age before partial transcode output is swept
    pub gc_retention: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            media_root: env::var("MEDIA_ROOT")
                .unwrap_or_else(|_| "./data/media".to_string())
                .into(),

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            max_workers: env::var("PIPELINE_MAX_WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("Invalid PIPELINE_MAX_WORKERS")?,

            max_attempts: env::var("PIPELINE_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid PIPELINE_MAX_ATTEMPTS")?,

            retry_initial_interval: Duration::from_millis(
                env::var("PIPELINE_RETRY_INITIAL_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .context("Invalid PIPELINE_RETRY_INITIAL_MS")?,
            ),

            gc_schedule: env::var("TRANSCODE_GC_SCHEDULE")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string()),

            gc_retention: Duration::from_secs(
                env::var("TRANSCODE_GC_RETENTION_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse::<u64>()
                    .context("Invalid TRANSCODE_GC_RETENTION_HOURS")?
                    * 3600,
            ),
        })
    }
}
