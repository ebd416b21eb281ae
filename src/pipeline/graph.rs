//! Job and job-graph model
//!
//! A graph is a set of jobs with explicit success-dependency edges,
//! submitted together for one asset. Topology is validated when the
//! builder finishes and is immutable afterwards.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::asset::AssetId;
use crate::media::transcoder::Resolution;

/// Identifier of one job within the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a submitted job graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(Uuid);

impl GraphId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work together with its input parameters.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Encode one HLS rendition of a source file.
    Transcode {
        source: PathBuf,
        resolution: Resolution,
        output_root: PathBuf,
    },
    /// Assemble the master playlist over completed renditions.
    BuildPlaylist {
        output_root: PathBuf,
        renditions: Vec<Resolution>,
    },
    /// Delete the original upload after conversion.
    CleanupSource { path: PathBuf },
    /// Delete an asset's remains after record deletion.
    CleanupAsset {
        video_dir: Option<PathBuf>,
        thumbnail: Option<PathBuf>,
    },
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Transcode { .. } => "transcode",
            JobKind::BuildPlaylist { .. } => "build_playlist",
            JobKind::CleanupSource { .. } => "cleanup_source",
            JobKind::CleanupAsset { .. } => "cleanup_asset",
        }
    }

    /// Human-readable label used in logs and failure reasons.
    pub fn describe(&self) -> String {
        match self {
            JobKind::Transcode { resolution, .. } => format!("transcode {resolution}"),
            other => other.name().to_string(),
        }
    }
}

/// Execution state of one job.
///
/// `Running` is only reachable once every predecessor is `Succeeded`.
/// `Failed` and `Skipped` are terminal; dependents of a failed job are
/// skipped, never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A job as submitted: kind plus predecessor edges.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Jobs that must reach `Succeeded` before this one may run.
    pub depends_on: Vec<JobId>,
}

/// Invalid graph topology, rejected at build time.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph contains no jobs")]
    Empty,

    #[error("job {job} depends on {missing}, which is not part of the submission")]
    DanglingEdge { job: JobId, missing: JobId },

    #[error("dependency cycle detected involving job {job}")]
    Cycle { job: JobId },
}

/// An immutable, validated collection of jobs sharing one asset.
#[derive(Debug, Clone)]
pub struct JobGraph {
    pub id: GraphId,
    /// Present for asset-creation graphs; deletion graphs outlive their
    /// record and carry no id.
    pub asset_id: Option<AssetId>,
    pub label: String,
    pub jobs: Vec<Job>,
}

impl JobGraph {
    /// Check that every edge points inside the submission and that the
    /// edges form no cycle (Kahn's algorithm).
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.jobs.is_empty() {
            return Err(GraphError::Empty);
        }

        let ids: HashSet<JobId> = self.jobs.iter().map(|j| j.id).collect();
        for job in &self.jobs {
            for dep in &job.depends_on {
                if !ids.contains(dep) {
                    return Err(GraphError::DanglingEdge {
                        job: job.id,
                        missing: *dep,
                    });
                }
            }
        }

        let mut in_degree: HashMap<JobId, usize> = self
            .jobs
            .iter()
            .map(|j| (j.id, j.depends_on.len()))
            .collect();
        let mut dependents: HashMap<JobId, Vec<JobId>> = HashMap::new();
        for job in &self.jobs {
            for dep in &job.depends_on {
                dependents.entry(*dep).or_default().push(job.id);
            }
        }

        let mut queue: VecDeque<JobId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in dependents.get(&id).into_iter().flatten() {
                let degree = in_degree
                    .get_mut(dependent)
                    .expect("dependent is part of the graph");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }

        if visited != self.jobs.len() {
            let stuck = in_degree
                .iter()
                .find(|(_, d)| **d > 0)
                .map(|(id, _)| *id)
                .expect("unvisited job must have remaining in-degree");
            return Err(GraphError::Cycle { job: stuck });
        }

        Ok(())
    }
}

/// Incremental graph construction.
///
/// `add_job`/`add_job_after` return handles usable as predecessors of later
/// jobs; `build` runs full validation so a bad graph never reaches the
/// scheduler.
#[derive(Debug)]
pub struct GraphBuilder {
    asset_id: Option<AssetId>,
    label: String,
    jobs: Vec<Job>,
}

impl GraphBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            asset_id: None,
            label: label.into(),
            jobs: Vec::new(),
        }
    }

    pub fn for_asset(label: impl Into<String>, asset_id: AssetId) -> Self {
        Self {
            asset_id: Some(asset_id),
            label: label.into(),
            jobs: Vec::new(),
        }
    }

    /// Add a job with no predecessors.
    pub fn add_job(&mut self, kind: JobKind) -> JobId {
        self.add_job_after(kind, &[])
    }

    /// Add a job that runs only after every id in `depends_on` succeeds.
    pub fn add_job_after(&mut self, kind: JobKind, depends_on: &[JobId]) -> JobId {
        let id = JobId::new();
        self.jobs.push(Job {
            id,
            kind,
            depends_on: depends_on.to_vec(),
        });
        id
    }

    pub fn build(self) -> Result<JobGraph, GraphError> {
        let graph = JobGraph {
            id: GraphId::new(),
            asset_id: self.asset_id,
            label: self.label,
            jobs: self.jobs,
        };
        graph.validate()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn transcode_kind() -> JobKind {
        JobKind::Transcode {
            source: "/tmp/in.mp4".into(),
            resolution: Resolution::P480,
            output_root: "/tmp/out".into(),
        }
    }

    #[test]
    fn builder_produces_valid_graph() {
        let mut builder = GraphBuilder::new("test");
        let a = builder.add_job(transcode_kind());
        let b = builder.add_job_after(
            JobKind::BuildPlaylist {
                output_root: "/tmp/out".into(),
                renditions: vec![Resolution::P480],
            },
            &[a],
        );
        builder.add_job_after(
            JobKind::CleanupSource {
                path: "/tmp/in.mp4".into(),
            },
            &[b],
        );

        let graph = builder.build().unwrap();
        assert_eq!(graph.jobs.len(), 3);
        assert_eq!(graph.jobs[1].depends_on, vec![a]);
    }

    #[test]
    fn empty_graph_rejected() {
        let builder = GraphBuilder::new("empty");
        assert_matches!(builder.build(), Err(GraphError::Empty));
    }

    #[test]
    fn dangling_edge_rejected() {
        let mut builder = GraphBuilder::new("dangling");
        let foreign = JobId::new();
        builder.add_job_after(transcode_kind(), &[foreign]);
        assert_matches!(
            builder.build(),
            Err(GraphError::DanglingEdge { missing, .. }) if missing == foreign
        );
    }

    #[test]
    fn cycle_rejected() {
        // The builder API cannot express a cycle (edges only point at
        // already-created jobs), so construct one directly.
        let a = JobId::new();
        let b = JobId::new();
        let graph = JobGraph {
            id: GraphId::new(),
            asset_id: None,
            label: "cycle".to_string(),
            jobs: vec![
                Job {
                    id: a,
                    kind: transcode_kind(),
                    depends_on: vec![b],
                },
                Job {
                    id: b,
                    kind: transcode_kind(),
                    depends_on: vec![a],
                },
            ],
        };
        assert_matches!(graph.validate(), Err(GraphError::Cycle { .. }));
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let a = JobId::new();
        let graph = JobGraph {
            id: GraphId::new(),
            asset_id: None,
            label: "self".to_string(),
            jobs: vec![Job {
                id: a,
                kind: transcode_kind(),
                depends_on: vec![a],
            }],
        };
        assert_matches!(graph.validate(), Err(GraphError::Cycle { job }) if job == a);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(transcode_kind().describe(), "transcode 480p");
        assert_eq!(
            JobKind::CleanupAsset {
                video_dir: None,
                thumbnail: None,
            }
            .name(),
            "cleanup_asset"
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
    }
}
