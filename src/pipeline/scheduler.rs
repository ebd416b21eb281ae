//! Job-graph scheduler with a bounded worker pool
//!
//! An event-driven dispatch loop reacts to submissions and job completions:
//! it asks the store which jobs became ready and hands each to a spawned
//! worker. Workers gate on a semaphore, claim their job with a CAS (so a
//! job never runs twice), execute the work body with retry/backoff, and
//! report back through the event channel. A blocked encoder only ever
//! occupies its own pool slot.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use backoff::backoff::Backoff;
use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::executor::{JobError, JobExecutor};
use super::graph::{GraphError, GraphId, JobGraph, JobId, JobKind, JobStatus};
use super::retry::RetryConfig;
use super::store::JobStore;
use crate::asset::{AssetId, AssetStatus};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size; encoding is CPU-heavy, keep this modest.
    pub max_workers: usize,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            retry: RetryConfig::default(),
        }
    }
}

enum SchedulerEvent {
    GraphSubmitted(GraphId),
    JobFinished(GraphId),
    GraphCancelled(GraphId),
}

impl SchedulerEvent {
    fn graph_id(&self) -> GraphId {
        match self {
            SchedulerEvent::GraphSubmitted(id)
            | SchedulerEvent::JobFinished(id)
            | SchedulerEvent::GraphCancelled(id) => *id,
        }
    }
}

/// Handle for submitting graphs and querying status.
///
/// Dropping the last handle (and letting in-flight workers drain) shuts the
/// dispatch loop down.
pub struct Scheduler {
    store: Arc<JobStore>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

struct DispatchCtx {
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    semaphore: Arc<Semaphore>,
    retry: RetryConfig,
    /// Weak so the loop's own context never keeps the channel open.
    events: mpsc::WeakUnboundedSender<SchedulerEvent>,
}

impl Scheduler {
    /// Spawn the dispatch loop and return the submission handle.
    pub fn start(
        store: Arc<JobStore>,
        executor: Arc<dyn JobExecutor>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = DispatchCtx {
            store: store.clone(),
            executor,
            semaphore: Arc::new(Semaphore::new(config.max_workers.max(1))),
            retry: config.retry,
            events: tx.downgrade(),
        };
        tokio::spawn(dispatch_loop(ctx, rx));

        Arc::new(Self { store, events: tx })
    }

    /// Validate and register a graph, then return immediately; execution
    /// proceeds in the background.
    pub fn submit(&self, graph: JobGraph) -> Result<GraphId, GraphError> {
        graph.validate()?;
        let graph_id = graph.id;
        self.store.insert_graph(&graph);
        info!(
            graph_id = %graph_id,
            label = %graph.label,
            jobs = graph.jobs.len(),
            "Job graph submitted"
        );
        let _ = self.events.send(SchedulerEvent::GraphSubmitted(graph_id));
        Ok(graph_id)
    }

    /// Cancel a graph: non-terminal jobs become `Skipped` and in-flight
    /// external processes are signalled. Succeeded work is not undone.
    pub fn cancel(&self, graph_id: GraphId) -> bool {
        let found = self.store.cancel_graph(graph_id);
        if found {
            info!(graph_id = %graph_id, "Job graph cancelled");
            let _ = self.events.send(SchedulerEvent::GraphCancelled(graph_id));
        }
        found
    }

    pub fn asset_status(&self, asset_id: AssetId) -> Option<AssetStatus> {
        self.store.asset_status(asset_id)
    }

    /// Wait until every job of the graph is terminal. Returns false for an
    /// unknown graph.
    pub async fn wait(&self, graph_id: GraphId) -> bool {
        let Some(mut rx) = self.store.completion(graph_id) else {
            return false;
        };
        loop {
            if *rx.borrow() {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }
}

async fn dispatch_loop(ctx: DispatchCtx, mut rx: mpsc::UnboundedReceiver<SchedulerEvent>) {
    info!(
        workers = ctx.semaphore.available_permits(),
        "Pipeline scheduler started"
    );

    while let Some(event) = rx.recv().await {
        let graph_id = event.graph_id();

        if ctx.store.is_terminal(graph_id) {
            if ctx.store.notify_terminal(graph_id) {
                summarize(&ctx.store, graph_id);
            }
            continue;
        }

        for (job_id, kind) in ctx.store.ready_jobs(graph_id) {
            spawn_worker(&ctx, graph_id, job_id, kind);
        }
    }

    info!("Pipeline scheduler stopped");
}

fn spawn_worker(ctx: &DispatchCtx, graph_id: GraphId, job_id: JobId, kind: JobKind) {
    let store = ctx.store.clone();
    let executor = ctx.executor.clone();
    let semaphore = ctx.semaphore.clone();
    let retry = ctx.retry.clone();
    let events = ctx.events.clone();

    tokio::spawn(async move {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return;
        };
        // The same ready job may have been offered to several workers;
        // exactly one wins the claim.
        if !store.claim(job_id) {
            return;
        }

        let cancel = store.cancel_token(graph_id).unwrap_or_default();
        run_job(&store, executor.as_ref(), &retry, job_id, &kind, &cancel).await;

        if let Some(tx) = events.upgrade() {
            let _ = tx.send(SchedulerEvent::JobFinished(graph_id));
        }
    });
}

/// Execute one claimed job to a terminal state, retrying transient
/// failures with backoff. Panics in the work body are caught here and
/// recorded as failures; a job must never take down the pool.
async fn run_job(
    store: &JobStore,
    executor: &dyn JobExecutor,
    retry: &RetryConfig,
    job_id: JobId,
    kind: &JobKind,
    cancel: &CancellationToken,
) {
    let label = kind.describe();
    let mut backoff = retry.to_backoff();

    loop {
        let attempt = store.mark_attempt(job_id);
        debug!(job_id = %job_id, job = %label, attempt, "Executing job");

        let result = match AssertUnwindSafe(executor.execute(kind, cancel))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(JobError::Panicked(panic_message(panic))),
        };

        match result {
            Ok(outcome) => {
                info!(job_id = %job_id, job = %label, attempt, "Job succeeded");
                if let Err(e) = store.record_success(job_id, outcome.output, outcome.detail) {
                    debug!(job_id = %job_id, error = %e, "Discarding result of overtaken job");
                }
                return;
            }
            Err(err)
                if err.is_transient() && attempt < retry.max_attempts && !cancel.is_cancelled() =>
            {
                let delay = backoff.next_backoff().unwrap_or(retry.max_interval);
                warn!(
                    job_id = %job_id,
                    job = %label,
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Transient job failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                warn!(job_id = %job_id, job = %label, attempt, error = %err, "Job failed");
                match store.record_failure(job_id, err.to_string()) {
                    Ok(skipped) if !skipped.is_empty() => {
                        info!(
                            job_id = %job_id,
                            skipped = skipped.len(),
                            "Dependent jobs skipped behind failure"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(job_id = %job_id, error = %e, "Discarding failure of overtaken job");
                    }
                }
                return;
            }
        }
    }
}

fn summarize(store: &JobStore, graph_id: GraphId) {
    let jobs = store.graph_jobs(graph_id);
    let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
    info!(
        graph_id = %graph_id,
        label = %store.graph_label(graph_id).unwrap_or_default(),
        succeeded = count(JobStatus::Succeeded),
        failed = count(JobStatus::Failed),
        skipped = count(JobStatus::Skipped),
        "Job graph finished"
    );
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
