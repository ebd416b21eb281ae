//! Background job scheduling and workers

pub mod transcode_gc;

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::config::Config;

/// Initialize and start the job scheduler
pub async fn start_scheduler(config: Arc<Config>) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Stale transcode output sweep - daily at 3 AM by default
    let media_root = config.media_root.clone();
    let retention = config.gc_retention;
    let gc_job = Job::new_async(config.gc_schedule.as_str(), move |_uuid, _l| {
        let root = media_root.clone();
        Box::pin(async move {
            info!("Running stale transcode output sweep");
            if let Err(e) = transcode_gc::sweep(&root, retention).await {
                tracing::error!("Transcode GC error: {}", e);
            }
        })
    })?;
    scheduler.add(gc_job).await?;

    scheduler.start().await?;

    info!("Job scheduler started");
    Ok(scheduler)
}
