//! Dependency-ordered job scheduling
//!
//! Graphs of jobs with explicit success edges, a CAS-backed state store,
//! and a bounded worker pool that dispatches jobs the moment they become
//! ready.

pub mod executor;
pub mod graph;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use executor::{JobError, JobExecutor, JobOutcome, MediaExecutor};
pub use graph::{GraphBuilder, GraphError, GraphId, Job, JobGraph, JobId, JobKind, JobStatus};
pub use retry::RetryConfig;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{JobSnapshot, JobStore, StatusChange, TransitionError};
