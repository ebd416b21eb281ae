//! Projectionist - HLS transcoding pipeline daemon
//!
//! Runs the job-graph scheduler and the periodic stale-output sweep.
//! With `--transcode <file>` it instead stages one file like an upload,
//! processes it end-to-end, and exits.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use projectionist::asset::{Asset, AssetId, AssetStatus};
use projectionist::config::Config;
use projectionist::events::EventBridge;
use projectionist::jobs;
use projectionist::media::playlist::MASTER_PLAYLIST;
use projectionist::media::probe::Prober;
use projectionist::media::transcoder::{Resolution, Transcoder};
use projectionist::pipeline::{
    JobStore, MediaExecutor, RetryConfig, Scheduler, SchedulerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "projectionist=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Projectionist pipeline");
    let options = cli::CliOptions::from_args();

    let prober = Prober::with_ffprobe_path(config.ffprobe_path.clone());
    let transcoder = Transcoder::with_paths(config.ffmpeg_path.clone(), prober);
    if !transcoder.is_available().await {
        tracing::warn!(
            path = %config.ffmpeg_path,
            "ffmpeg not found; transcode jobs will fail until it is installed"
        );
    }

    let store = Arc::new(JobStore::new());
    let scheduler = Scheduler::start(
        store,
        Arc::new(MediaExecutor::new(transcoder)),
        SchedulerConfig {
            max_workers: config.max_workers,
            retry: RetryConfig {
                max_attempts: config.max_attempts,
                initial_interval: config.retry_initial_interval,
                ..RetryConfig::default()
            },
        },
    );
    let bridge = EventBridge::new(scheduler);

    if let Some(source) = options.transcode {
        return transcode_one(&config, &bridge, &source).await;
    }

    let mut cron = jobs::start_scheduler(config.clone()).await?;

    tracing::info!(
        media_root = %config.media_root.display(),
        workers = config.max_workers,
        "Pipeline ready; press Ctrl+C to stop"
    );
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    cron.shutdown().await?;
    Ok(())
}

/// Stage `source` like an upload under the media root, run the full
/// processing graph, and report the outcome.
async fn transcode_one(
    config: &Config,
    bridge: &EventBridge,
    source: &std::path::Path,
) -> anyhow::Result<()> {
    let file_name = source
        .file_name()
        .context("source path has no file name")?
        .to_string_lossy()
        .to_string();

    let id = AssetId::new();
    let staged = Asset::upload_location(&config.media_root, id, &file_name);
    let output_root = staged
        .parent()
        .context("upload location has no parent directory")?
        .to_path_buf();

    tokio::fs::create_dir_all(&output_root)
        .await
        .with_context(|| format!("creating {}", output_root.display()))?;
    tokio::fs::copy(source, &staged)
        .await
        .with_context(|| format!("staging {}", source.display()))?;

    let asset = Asset {
        id,
        source_path: staged,
        output_root: output_root.clone(),
        resolutions: Resolution::all().to_vec(),
    };

    let graph_id = bridge.on_asset_created(&asset)?;
    bridge.wait(graph_id).await;

    match bridge.status(asset.id) {
        Some(AssetStatus::Ready) => {
            println!("{}", output_root.join(MASTER_PLAYLIST).display());
            Ok(())
        }
        Some(AssetStatus::Failed { reason }) => anyhow::bail!("processing failed: {reason}"),
        other => anyhow::bail!("unexpected terminal status: {other:?}"),
    }
}
