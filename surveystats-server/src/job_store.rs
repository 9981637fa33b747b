//! In-memory job status registry
//!
//! Append-only map of job id to status. A job enters as `Running` and takes
//! exactly one terminal transition, to `Done` with the artifact location or
//! to `Failed` with a reason. Later transition attempts are ignored so a
//! worker result and a shutdown sweep cannot fight over the same job.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Status of a single job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted and queued or executing
    Running,
    /// Finished; the serialized result lives at `artifact`
    Done { artifact: PathBuf },
    /// Terminally failed with a client-visible reason
    Failed { reason: String },
}

impl JobStatus {
    /// Wire name used by the jobs listing and result endpoints
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Done { .. } => "done",
            JobStatus::Failed { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Shared registry of every job this run has accepted
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<u64, JobStatus>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted job as running
    pub fn insert_running(&self, job_id: u64) {
        let previous = self.jobs.write().insert(job_id, JobStatus::Running);
        if previous.is_some() {
            warn!("Job {} was registered twice", job_id);
        }
    }

    /// Transition a running job to done. Returns whether the transition
    /// was applied.
    pub fn complete(&self, job_id: u64, artifact: PathBuf) -> bool {
        self.transition(job_id, JobStatus::Done { artifact })
    }

    /// Transition a running job to failed. Returns whether the transition
    /// was applied.
    pub fn fail(&self, job_id: u64, reason: impl Into<String>) -> bool {
        self.transition(
            job_id,
            JobStatus::Failed {
                reason: reason.into(),
            },
        )
    }

    fn transition(&self, job_id: u64, next: JobStatus) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get(&job_id) {
            Some(JobStatus::Running) => {
                jobs.insert(job_id, next);
                true
            }
            Some(terminal) => {
                warn!(
                    "Ignoring {} transition for job {} already {}",
                    next.as_str(),
                    job_id,
                    terminal.as_str()
                );
                false
            }
            None => {
                warn!("Ignoring {} transition for unknown job {}", next.as_str(), job_id);
                false
            }
        }
    }

    pub fn status(&self, job_id: u64) -> Option<JobStatus> {
        self.jobs.read().get(&job_id).cloned()
    }

    /// Ids of all jobs currently running
    pub fn running_ids(&self) -> Vec<u64> {
        self.jobs
            .read()
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|status| !status.is_terminal())
            .count()
    }

    /// Every job with its status, ascending by id
    pub fn statuses_sorted(&self) -> Vec<(u64, JobStatus)> {
        let mut entries: Vec<(u64, JobStatus)> = self
            .jobs
            .read()
            .iter()
            .map(|(id, status)| (*id, status.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}
