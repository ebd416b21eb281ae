//! Shared job-state store
//!
//! The one structure mutated by concurrent workers. Every transition is a
//! check-and-set against the expected prior status, so a job can never be
//! dispatched twice and a late worker cannot clobber a cancellation. All
//! transitions are recorded with a UTC timestamp.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::graph::{GraphId, Job, JobGraph, JobId, JobKind, JobStatus};
use crate::asset::{AssetId, AssetStatus};

/// One recorded status transition.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Read-only view of a job's current state.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub graph_id: GraphId,
    pub kind: JobKind,
    pub depends_on: Vec<JobId>,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub output: Option<PathBuf>,
    pub history: Vec<StatusChange>,
}

/// Rejected transition: the job was not in the expected prior state.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("job {job} not found")]
    NotFound { job: JobId },

    #[error("job {job} is {actual}, expected {expected}")]
    WrongState {
        job: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },
}

struct JobRecord {
    job: Job,
    graph_id: GraphId,
    status: JobStatus,
    attempts: u32,
    error: Option<String>,
    output: Option<PathBuf>,
    history: Vec<StatusChange>,
}

impl JobRecord {
    fn push_status(&mut self, status: JobStatus, detail: Option<String>) {
        self.status = status;
        self.history.push(StatusChange {
            status,
            at: Utc::now(),
            detail,
        });
    }
}

struct GraphRecord {
    label: String,
    job_ids: Vec<JobId>,
    /// Reverse edges, built at insertion, used for skip propagation.
    dependents: HashMap<JobId, Vec<JobId>>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    graphs: HashMap<GraphId, GraphRecord>,
    assets: HashMap<AssetId, GraphId>,
}

/// In-process store of every submitted graph and job.
#[derive(Default)]
pub struct JobStore {
    inner: Mutex<Inner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated graph; all jobs start `Pending`.
    pub fn insert_graph(&self, graph: &JobGraph) {
        let mut inner = self.inner.lock();

        let mut dependents: HashMap<JobId, Vec<JobId>> = HashMap::new();
        for job in &graph.jobs {
            for dep in &job.depends_on {
                dependents.entry(*dep).or_default().push(job.id);
            }
        }

        let (done_tx, _done_rx) = watch::channel(false);
        inner.graphs.insert(
            graph.id,
            GraphRecord {
                label: graph.label.clone(),
                job_ids: graph.jobs.iter().map(|j| j.id).collect(),
                dependents,
                cancel: CancellationToken::new(),
                done_tx,
            },
        );
        if let Some(asset_id) = graph.asset_id {
            inner.assets.insert(asset_id, graph.id);
        }

        let now = Utc::now();
        for job in &graph.jobs {
            inner.jobs.insert(
                job.id,
                JobRecord {
                    job: job.clone(),
                    graph_id: graph.id,
                    status: JobStatus::Pending,
                    attempts: 0,
                    error: None,
                    output: None,
                    history: vec![StatusChange {
                        status: JobStatus::Pending,
                        at: now,
                        detail: None,
                    }],
                },
            );
        }
    }

    /// Jobs in `graph_id` whose predecessors have all succeeded and which
    /// are still pending. Callers must `claim` before executing; the same
    /// job may show up in consecutive calls until someone does.
    pub fn ready_jobs(&self, graph_id: GraphId) -> Vec<(JobId, JobKind)> {
        let inner = self.inner.lock();
        let Some(graph) = inner.graphs.get(&graph_id) else {
            return Vec::new();
        };

        graph
            .job_ids
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|record| record.status == JobStatus::Pending)
            .filter(|record| {
                record.job.depends_on.iter().all(|dep| {
                    inner
                        .jobs
                        .get(dep)
                        .map(|d| d.status == JobStatus::Succeeded)
                        .unwrap_or(false)
                })
            })
            .map(|record| (record.job.id, record.job.kind.clone()))
            .collect()
    }

    /// CAS `Pending -> Running`. Returns false if the job was already
    /// claimed, skipped, or otherwise moved on; the caller must not run it.
    pub fn claim(&self, job_id: JobId) -> bool {
        let mut inner = self.inner.lock();
        let Some(record) = inner.jobs.get_mut(&job_id) else {
            return false;
        };
        if record.status != JobStatus::Pending {
            return false;
        }
        record.push_status(JobStatus::Running, None);
        true
    }

    /// Bump and return the attempt counter for a claimed job.
    pub fn mark_attempt(&self, job_id: JobId) -> u32 {
        let mut inner = self.inner.lock();
        match inner.jobs.get_mut(&job_id) {
            Some(record) => {
                record.attempts += 1;
                record.attempts
            }
            None => 0,
        }
    }

    /// CAS `Running -> Succeeded`, recording the produced output.
    pub fn record_success(
        &self,
        job_id: JobId,
        output: Option<PathBuf>,
        detail: Option<String>,
    ) -> Result<(), TransitionError> {
        let mut inner = self.inner.lock();
        let record = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(TransitionError::NotFound { job: job_id })?;
        if record.status != JobStatus::Running {
            return Err(TransitionError::WrongState {
                job: job_id,
                expected: JobStatus::Running,
                actual: record.status,
            });
        }
        record.output = output;
        record.push_status(JobStatus::Succeeded, detail);
        Ok(())
    }

    /// CAS `Running -> Failed` and mark every transitive dependent
    /// `Skipped`. Returns the ids that were skipped.
    ///
    /// Dependents of a failed job can only be `Pending` (they were never
    /// ready), so the propagation never races a running worker.
    pub fn record_failure(
        &self,
        job_id: JobId,
        error: String,
    ) -> Result<Vec<JobId>, TransitionError> {
        let mut inner = self.inner.lock();

        let (graph_id, blocked_reason) = {
            let record = inner
                .jobs
                .get_mut(&job_id)
                .ok_or(TransitionError::NotFound { job: job_id })?;
            if record.status != JobStatus::Running {
                return Err(TransitionError::WrongState {
                    job: job_id,
                    expected: JobStatus::Running,
                    actual: record.status,
                });
            }
            record.error = Some(error.clone());
            record.push_status(JobStatus::Failed, Some(error.clone()));
            let reason = format!("blocked: {} failed: {}", record.job.kind.describe(), error);
            (record.graph_id, reason)
        };

        let mut skipped = Vec::new();
        let dependents = inner
            .graphs
            .get(&graph_id)
            .map(|g| g.dependents.clone())
            .unwrap_or_default();

        let mut queue: VecDeque<JobId> =
            dependents.get(&job_id).cloned().unwrap_or_default().into();
        while let Some(id) = queue.pop_front() {
            if let Some(record) = inner.jobs.get_mut(&id) {
                if record.status == JobStatus::Pending {
                    record.error = Some(blocked_reason.clone());
                    record.push_status(JobStatus::Skipped, Some(blocked_reason.clone()));
                    skipped.push(id);
                    if let Some(next) = dependents.get(&id) {
                        queue.extend(next.iter().copied());
                    }
                }
            }
        }

        debug!(job_id = %job_id, skipped = skipped.len(), "Recorded failure");
        Ok(skipped)
    }

    /// Transition every non-terminal job of the graph to `Skipped` and
    /// trip the graph's cancellation token. Succeeded work is left alone.
    pub fn cancel_graph(&self, graph_id: GraphId) -> bool {
        let mut inner = self.inner.lock();
        let Some(graph) = inner.graphs.get(&graph_id) else {
            return false;
        };
        let token = graph.cancel.clone();
        let job_ids = graph.job_ids.clone();

        for id in job_ids {
            if let Some(record) = inner.jobs.get_mut(&id) {
                if !record.status.is_terminal() {
                    record.error = Some("graph cancelled".to_string());
                    record.push_status(JobStatus::Skipped, Some("graph cancelled".to_string()));
                }
            }
        }
        token.cancel();
        true
    }

    /// Cancellation token shared by the graph's in-flight work.
    pub fn cancel_token(&self, graph_id: GraphId) -> Option<CancellationToken> {
        self.inner
            .lock()
            .graphs
            .get(&graph_id)
            .map(|g| g.cancel.clone())
    }

    /// True once every job in the graph is terminal.
    pub fn is_terminal(&self, graph_id: GraphId) -> bool {
        let inner = self.inner.lock();
        let Some(graph) = inner.graphs.get(&graph_id) else {
            return false;
        };
        graph
            .job_ids
            .iter()
            .all(|id| inner.jobs.get(id).is_some_and(|r| r.status.is_terminal()))
    }

    /// Mark the graph's completion channel. Returns true only for the call
    /// that actually flipped it, so completion work runs once.
    pub fn notify_terminal(&self, graph_id: GraphId) -> bool {
        let inner = self.inner.lock();
        match inner.graphs.get(&graph_id) {
            Some(graph) => !graph.done_tx.send_replace(true),
            None => false,
        }
    }

    /// Receiver that flips to `true` when the graph reaches terminal state.
    pub fn completion(&self, graph_id: GraphId) -> Option<watch::Receiver<bool>> {
        self.inner
            .lock()
            .graphs
            .get(&graph_id)
            .map(|g| g.done_tx.subscribe())
    }

    pub fn graph_label(&self, graph_id: GraphId) -> Option<String> {
        self.inner
            .lock()
            .graphs
            .get(&graph_id)
            .map(|g| g.label.clone())
    }

    pub fn asset_graph(&self, asset_id: AssetId) -> Option<GraphId> {
        self.inner.lock().assets.get(&asset_id).copied()
    }

    /// Derive the caller-visible asset status from its graph's job states.
    pub fn asset_status(&self, asset_id: AssetId) -> Option<AssetStatus> {
        let inner = self.inner.lock();
        let graph_id = inner.assets.get(&asset_id)?;
        let graph = inner.graphs.get(graph_id)?;

        let records: Vec<&JobRecord> = graph
            .job_ids
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .collect();

        if let Some(failed) = records.iter().find(|r| r.status == JobStatus::Failed) {
            let reason = format!(
                "{}: {}",
                failed.job.kind.describe(),
                failed.error.as_deref().unwrap_or("unknown error")
            );
            return Some(AssetStatus::Failed { reason });
        }
        if let Some(skipped) = records.iter().find(|r| r.status == JobStatus::Skipped) {
            let reason = skipped
                .error
                .clone()
                .unwrap_or_else(|| "graph cancelled".to_string());
            return Some(AssetStatus::Failed { reason });
        }
        if records.iter().all(|r| r.status == JobStatus::Succeeded) {
            return Some(AssetStatus::Ready);
        }
        if records.iter().all(|r| r.status == JobStatus::Pending) {
            return Some(AssetStatus::Pending);
        }
        Some(AssetStatus::InProgress)
    }

    pub fn snapshot(&self, job_id: JobId) -> Option<JobSnapshot> {
        let inner = self.inner.lock();
        inner.jobs.get(&job_id).map(|record| JobSnapshot {
            id: record.job.id,
            graph_id: record.graph_id,
            kind: record.job.kind.clone(),
            depends_on: record.job.depends_on.clone(),
            status: record.status,
            attempts: record.attempts,
            error: record.error.clone(),
            output: record.output.clone(),
            history: record.history.clone(),
        })
    }

    /// Snapshots of every job in the graph, in submission order.
    pub fn graph_jobs(&self, graph_id: GraphId) -> Vec<JobSnapshot> {
        let job_ids = {
            let inner = self.inner.lock();
            inner
                .graphs
                .get(&graph_id)
                .map(|g| g.job_ids.clone())
                .unwrap_or_default()
        };
        job_ids
            .into_iter()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::transcoder::Resolution;
    use crate::pipeline::graph::GraphBuilder;

    fn transcode_kind(resolution: Resolution) -> JobKind {
        JobKind::Transcode {
            source: "/tmp/in.mp4".into(),
            resolution,
            output_root: "/tmp/out".into(),
        }
    }

    /// 3 transcodes -> playlist -> cleanup, like a creation submission.
    fn sample_graph() -> (JobGraph, Vec<JobId>, JobId, JobId) {
        let mut builder = GraphBuilder::new("sample");
        let transcodes: Vec<JobId> = Resolution::all()
            .into_iter()
            .map(|r| builder.add_job(transcode_kind(r)))
            .collect();
        let playlist = builder.add_job_after(
            JobKind::BuildPlaylist {
                output_root: "/tmp/out".into(),
                renditions: Resolution::all().to_vec(),
            },
            &transcodes,
        );
        let cleanup = builder.add_job_after(
            JobKind::CleanupSource {
                path: "/tmp/in.mp4".into(),
            },
            &[playlist],
        );
        (builder.build().unwrap(), transcodes, playlist, cleanup)
    }

    #[test]
    fn initially_only_independent_jobs_are_ready() {
        let (graph, transcodes, _, _) = sample_graph();
        let store = JobStore::new();
        store.insert_graph(&graph);

        let ready: Vec<JobId> = store
            .ready_jobs(graph.id)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ready.len(), 3);
        for id in &transcodes {
            assert!(ready.contains(id));
        }
    }

    #[test]
    fn claim_is_at_most_once() {
        let (graph, transcodes, _, _) = sample_graph();
        let store = JobStore::new();
        store.insert_graph(&graph);

        assert!(store.claim(transcodes[0]));
        assert!(!store.claim(transcodes[0]));
    }

    #[test]
    fn dependent_becomes_ready_only_after_all_predecessors_succeed() {
        let (graph, transcodes, playlist, _) = sample_graph();
        let store = JobStore::new();
        store.insert_graph(&graph);

        for (i, id) in transcodes.iter().enumerate() {
            assert!(
                !store
                    .ready_jobs(graph.id)
                    .iter()
                    .any(|(ready, _)| ready == &playlist),
                "playlist must not be ready with {i} predecessors done"
            );
            assert!(store.claim(*id));
            store.record_success(*id, None, None).unwrap();
        }

        assert!(
            store
                .ready_jobs(graph.id)
                .iter()
                .any(|(ready, _)| ready == &playlist)
        );
    }

    #[test]
    fn failure_skips_transitive_dependents() {
        let (graph, transcodes, playlist, cleanup) = sample_graph();
        let store = JobStore::new();
        store.insert_graph(&graph);

        assert!(store.claim(transcodes[1]));
        let skipped = store
            .record_failure(transcodes[1], "ffmpeg exited with code 1".to_string())
            .unwrap();

        assert_eq!(skipped.len(), 2);
        assert!(skipped.contains(&playlist));
        assert!(skipped.contains(&cleanup));
        assert_eq!(store.snapshot(playlist).unwrap().status, JobStatus::Skipped);
        assert_eq!(store.snapshot(cleanup).unwrap().status, JobStatus::Skipped);
        // Siblings are untouched
        assert_eq!(
            store.snapshot(transcodes[0]).unwrap().status,
            JobStatus::Pending
        );
    }

    #[test]
    fn success_requires_running_state() {
        let (graph, transcodes, _, _) = sample_graph();
        let store = JobStore::new();
        store.insert_graph(&graph);

        let err = store.record_success(transcodes[0], None, None).unwrap_err();
        assert!(matches!(err, TransitionError::WrongState { .. }));
    }

    #[test]
    fn cancel_skips_non_terminal_jobs_and_trips_token() {
        let (graph, transcodes, playlist, cleanup) = sample_graph();
        let store = JobStore::new();
        store.insert_graph(&graph);

        assert!(store.claim(transcodes[0]));
        store.record_success(transcodes[0], None, None).unwrap();
        assert!(store.claim(transcodes[1]));

        assert!(store.cancel_graph(graph.id));
        assert!(store.cancel_token(graph.id).unwrap().is_cancelled());

        // Succeeded work not undone
        assert_eq!(
            store.snapshot(transcodes[0]).unwrap().status,
            JobStatus::Succeeded
        );
        // Running and pending work skipped
        assert_eq!(
            store.snapshot(transcodes[1]).unwrap().status,
            JobStatus::Skipped
        );
        assert_eq!(store.snapshot(playlist).unwrap().status, JobStatus::Skipped);
        assert_eq!(store.snapshot(cleanup).unwrap().status, JobStatus::Skipped);
        assert!(store.is_terminal(graph.id));
    }

    #[test]
    fn asset_status_lifecycle() {
        let mut builder = GraphBuilder::for_asset("asset", AssetId::new());
        let a = builder.add_job(transcode_kind(Resolution::P480));
        let graph = builder.build().unwrap();
        let asset_id = graph.asset_id.unwrap();

        let store = JobStore::new();
        store.insert_graph(&graph);
        assert_eq!(store.asset_status(asset_id), Some(AssetStatus::Pending));

        assert!(store.claim(a));
        assert_eq!(store.asset_status(asset_id), Some(AssetStatus::InProgress));

        store.record_success(a, None, None).unwrap();
        assert_eq!(store.asset_status(asset_id), Some(AssetStatus::Ready));
    }

    #[test]
    fn asset_status_failure_names_the_culprit() {
        let mut builder = GraphBuilder::for_asset("asset", AssetId::new());
        let t = builder.add_job(transcode_kind(Resolution::P720));
        builder.add_job_after(
            JobKind::BuildPlaylist {
                output_root: "/tmp/out".into(),
                renditions: vec![Resolution::P720],
            },
            &[t],
        );
        let graph = builder.build().unwrap();
        let asset_id = graph.asset_id.unwrap();

        let store = JobStore::new();
        store.insert_graph(&graph);
        assert!(store.claim(t));
        store
            .record_failure(t, "ffmpeg exited with code 1: bad input".to_string())
            .unwrap();

        match store.asset_status(asset_id).unwrap() {
            AssetStatus::Failed { reason } => {
                assert!(reason.contains("720p"), "reason was: {reason}");
            }
            other => panic!("expected failed, got {other:?}"),
        }
    }

    #[test]
    fn transition_history_has_timestamps_in_order() {
        let (graph, transcodes, _, _) = sample_graph();
        let store = JobStore::new();
        store.insert_graph(&graph);

        assert!(store.claim(transcodes[0]));
        store
            .record_success(transcodes[0], Some("/tmp/out/480p/index.m3u8".into()), None)
            .unwrap();

        let snapshot = store.snapshot(transcodes[0]).unwrap();
        let statuses: Vec<JobStatus> = snapshot.history.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Pending, JobStatus::Running, JobStatus::Succeeded]
        );
        for pair in snapshot.history.windows(2) {
            assert!(pair[0].at <= pair[1].at);
        }
        assert_eq!(
            snapshot.output.as_deref(),
            Some(std::path::Path::new("/tmp/out/480p/index.m3u8"))
        );
    }

    #[test]
    fn unknown_asset_has_no_status() {
        let store = JobStore::new();
        assert_eq!(store.asset_status(AssetId::new()), None);
    }
}
