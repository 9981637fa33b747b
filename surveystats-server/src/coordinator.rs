//! Worker pool coordinator
//!
//! Owns every piece of shared state for the job pipeline: the dataset
//! index, the job registry, the result store, the work queue, and the
//! worker handles. Submissions are validated here, assigned an id, and
//! enqueued; shutdown drains the queue once and settles every job in a
//! terminal state before signalling completion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use surveystats_core::{
    DatasetIndex, StatsError, StatsResult, TaskKind, TaskRequest, TaskSubmission, SHUTDOWN_MESSAGE,
};

use crate::config::ServerConfig;
use crate::job_store::{JobStatus, JobStore};
use crate::metrics::{PoolMetrics, PoolStats, PoolStatsSnapshot};
use crate::results::ResultStore;
use crate::worker::{spawn_worker, JobTicket, QueueItem, WorkerContext};

/// Extra wait after cancelling workers that missed the drain deadline,
/// before their tasks are aborted outright
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Outcome of a result lookup, resolved against the job registry and the
/// result store in one step
#[derive(Debug)]
pub enum JobLookup {
    /// The id was never assigned (or is negative)
    InvalidId,
    /// The job exists and has not reached a terminal state yet
    Running,
    /// The job finished; `payload` is the serialized result exactly as
    /// the worker wrote it
    Done { payload: String },
    /// The job failed with a client-visible reason
    Failed { reason: String },
}

/// Coordinator for the aggregation worker pool
pub struct PoolCoordinator {
    index: Arc<DatasetIndex>,
    store: Arc<JobStore>,
    results: Arc<ResultStore>,
    metrics: Arc<PoolMetrics>,
    stats: Arc<PoolStats>,

    work_tx: Sender<QueueItem>,
    // Kept so undelivered items can be drained at shutdown; also keeps
    // the channel open for late sends.
    work_rx: Receiver<QueueItem>,

    next_job_id: AtomicU64,
    accepting: AtomicBool,
    shutdown_started: AtomicBool,

    worker_token: CancellationToken,
    // Cancelled exactly once, after the drain has settled every job.
    drained: CancellationToken,

    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    shutdown_timeout: Duration,
}

impl PoolCoordinator {
    /// Build the pool and spawn its workers. Must run inside a Tokio
    /// runtime.
    pub fn new(config: &ServerConfig, index: Arc<DatasetIndex>) -> anyhow::Result<Self> {
        let results = Arc::new(
            ResultStore::new(&config.results.directory)
                .context("Failed to prepare results directory")?,
        );
        let metrics =
            Arc::new(PoolMetrics::new().context("Failed to register worker pool metrics")?);
        let stats = Arc::new(PoolStats::default());
        let store = Arc::new(JobStore::new());

        let (work_tx, work_rx) = flume::unbounded();
        let worker_token = CancellationToken::new();
        let worker_count = config.resolved_worker_count();

        let ctx = WorkerContext {
            index: Arc::clone(&index),
            store: Arc::clone(&store),
            results: Arc::clone(&results),
            metrics: Arc::clone(&metrics),
            stats: Arc::clone(&stats),
        };

        let worker_handles = (0..worker_count)
            .map(|worker_id| {
                spawn_worker(
                    worker_id,
                    work_rx.clone(),
                    ctx.clone(),
                    worker_token.clone(),
                )
            })
            .collect();

        info!(
            "Worker pool started with {} workers, results in {}",
            worker_count,
            results.directory().display()
        );

        Ok(Self {
            index,
            store,
            results,
            metrics,
            stats,
            work_tx,
            work_rx,
            next_job_id: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            shutdown_started: AtomicBool::new(false),
            worker_token,
            drained: CancellationToken::new(),
            worker_handles: Mutex::new(worker_handles),
            worker_count,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Validate a submission, register it as a running job, and enqueue
    /// it. Returns the assigned job id.
    pub fn submit(&self, kind: TaskKind, submission: TaskSubmission) -> StatsResult<u64> {
        if !self.accepting.load(Ordering::SeqCst) {
            self.reject();
            return Err(StatsError::ShuttingDown);
        }

        let request = match TaskRequest::from_submission(kind, submission, &self.index) {
            Ok(request) => request,
            Err(err) => {
                self.reject();
                return Err(err);
            }
        };

        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        self.store.insert_running(job_id);
        self.metrics.jobs_submitted.inc();
        self.stats.jobs_submitted.fetch_add(1, Ordering::Relaxed);

        if self
            .work_tx
            .send(QueueItem::Task(JobTicket { job_id, request }))
            .is_err()
        {
            // The channel outlives the coordinator's own receiver, so a
            // failed send means the pool is gone; settle the job here.
            if self.store.fail(job_id, SHUTDOWN_MESSAGE) {
                self.metrics.jobs_failed.inc();
                self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(job_id);
        }
        self.metrics.queue_depth.inc();

        if self.drained.is_cancelled() {
            // The final drain already swept the queue; nothing will pull
            // this item, so settle the job here.
            if self.store.fail(job_id, SHUTDOWN_MESSAGE) {
                self.metrics.jobs_failed.inc();
                self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
            }
            self.metrics.queue_depth.dec();
        }

        Ok(job_id)
    }

    fn reject(&self) {
        self.metrics.jobs_rejected.inc();
        self.stats.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop accepting submissions, drain the queue, and wait until every
    /// job has reached a terminal state.
    ///
    /// The first caller starts the drain on a detached task so that it
    /// finishes even if this future is dropped; every caller waits for
    /// the same completion signal.
    pub async fn shutdown(self: Arc<Self>) {
        if !self.shutdown_started.swap(true, Ordering::SeqCst) {
            self.accepting.store(false, Ordering::SeqCst);
            info!(
                "Graceful shutdown requested, {} items queued, {} jobs running",
                self.work_tx.len(),
                self.store.running_count()
            );
            let coordinator = Arc::clone(&self);
            tokio::spawn(async move { coordinator.drain().await });
        }
        self.drained.cancelled().await;
    }

    async fn drain(&self) {
        // One sentinel per worker: each worker finishes the queued jobs
        // ahead of its sentinel, then exits.
        for _ in 0..self.worker_count {
            let _ = self.work_tx.send(QueueItem::Shutdown);
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        let handles = std::mem::take(&mut *self.worker_handles.lock());
        let mut stragglers = Vec::new();
        for (worker_id, mut handle) in handles.into_iter().enumerate() {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Worker {} exited abnormally: {}", worker_id, err),
                Err(_) => {
                    warn!("Worker {} still busy at the shutdown deadline", worker_id);
                    stragglers.push(handle);
                }
            }
        }

        if !stragglers.is_empty() {
            self.worker_token.cancel();
            let grace = Instant::now() + ABORT_GRACE;
            for mut handle in stragglers {
                if timeout_at(grace, &mut handle).await.is_err() {
                    handle.abort();
                }
            }
        }

        self.fail_undelivered_jobs();

        // Workers are gone; anything still marked running was interrupted
        // mid-flight and will never report back.
        let mut interrupted = 0usize;
        for job_id in self.store.running_ids() {
            if self.store.fail(job_id, SHUTDOWN_MESSAGE) {
                self.metrics.jobs_failed.inc();
                self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
                interrupted += 1;
            }
        }
        if interrupted > 0 {
            warn!("Marked {} interrupted jobs as failed", interrupted);
        }

        self.drained.cancel();
        // A submission that passed the accepting check concurrently with
        // this drain re-checks `drained` after enqueueing; draining once
        // more closes the window from the other side.
        self.fail_undelivered_jobs();
        self.metrics.queue_depth.set(0.0);

        let snapshot = self.stats.snapshot();
        info!(
            "Worker pool drained: {} jobs completed, {} failed, {} rejected",
            snapshot.jobs_completed, snapshot.jobs_failed, snapshot.jobs_rejected
        );
    }

    /// Fail every job whose queue item was never delivered to a worker
    fn fail_undelivered_jobs(&self) {
        while let Ok(item) = self.work_rx.try_recv() {
            if let QueueItem::Task(ticket) = item {
                self.metrics.queue_depth.dec();
                if self.store.fail(ticket.job_id, SHUTDOWN_MESSAGE) {
                    self.metrics.jobs_failed.inc();
                    self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Resolve a client-supplied job id to its current outcome
    pub fn find_job(&self, job_id: i64) -> JobLookup {
        if job_id < 0 || job_id as u64 >= self.next_job_id.load(Ordering::SeqCst) {
            return JobLookup::InvalidId;
        }

        match self.store.status(job_id as u64) {
            // Id assigned but not registered yet: the submission is still
            // in flight.
            None | Some(JobStatus::Running) => JobLookup::Running,
            Some(JobStatus::Done { artifact }) => match self.results.read(&artifact) {
                Ok(payload) => JobLookup::Done { payload },
                Err(err) => {
                    warn!("Result artifact for job {} unreadable: {}", job_id, err);
                    JobLookup::Failed {
                        reason: "Result artifact unavailable".to_string(),
                    }
                }
            },
            Some(JobStatus::Failed { reason }) => JobLookup::Failed { reason },
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn running_count(&self) -> usize {
        self.store.running_count()
    }

    /// Every job with its status, ascending by id
    pub fn job_statuses(&self) -> Vec<(u64, JobStatus)> {
        self.store.statuses_sorted()
    }

    pub fn stats_snapshot(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn dataset(&self) -> &DatasetIndex {
        &self.index
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surveystats_core::{QuestionName, Record};
    use tempfile::TempDir;

    fn test_index() -> Arc<DatasetIndex> {
        let mut index = DatasetIndex::new();
        let question = QuestionName::from("Average commute time");
        for (state, value) in [("Alpha", 10.0), ("Alpha", 20.0), ("Beta", 30.0)] {
            index.insert(
                question.clone(),
                Record {
                    year_start: "2022".to_string(),
                    year_end: "2022".to_string(),
                    data_value: value,
                    location_abbr: state[..2].to_uppercase(),
                    location_desc: state.to_string(),
                    stratification_category: String::new(),
                    stratification_value: String::new(),
                },
            );
        }
        Arc::new(index)
    }

    fn test_config(results_dir: &TempDir) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.pool.worker_count = 2;
        config.pool.shutdown_timeout_secs = 5;
        config.results.directory = results_dir.path().to_string_lossy().to_string();
        config
    }

    fn submission(question: &str) -> TaskSubmission {
        TaskSubmission {
            question: Some(question.to_string()),
            state: None,
        }
    }

    #[tokio::test]
    async fn test_job_ids_are_monotonic_from_zero() {
        let dir = TempDir::new().unwrap();
        let coordinator =
            PoolCoordinator::new(&test_config(&dir), test_index()).unwrap();

        let first = coordinator
            .submit(TaskKind::StatesMean, submission("Average commute time"))
            .unwrap();
        let second = coordinator
            .submit(TaskKind::GlobalMean, submission("Average commute time"))
            .unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn test_rejected_submission_burns_no_id() {
        let dir = TempDir::new().unwrap();
        let coordinator =
            PoolCoordinator::new(&test_config(&dir), test_index()).unwrap();

        let err = coordinator
            .submit(TaskKind::StatesMean, submission("No such question"))
            .unwrap_err();
        assert_eq!(err.public_reason(), "Invalid question");
        assert_eq!(coordinator.stats_snapshot().jobs_rejected, 1);

        let job_id = coordinator
            .submit(TaskKind::StatesMean, submission("Average commute time"))
            .unwrap();
        assert_eq!(job_id, 0);
    }

    #[tokio::test]
    async fn test_find_job_bounds() {
        let dir = TempDir::new().unwrap();
        let coordinator =
            PoolCoordinator::new(&test_config(&dir), test_index()).unwrap();

        assert!(matches!(coordinator.find_job(-3), JobLookup::InvalidId));
        assert!(matches!(coordinator.find_job(0), JobLookup::InvalidId));
        assert!(matches!(coordinator.find_job(1), JobLookup::InvalidId));

        coordinator
            .submit(TaskKind::StatesMean, submission("Average commute time"))
            .unwrap();
        assert!(!matches!(coordinator.find_job(0), JobLookup::InvalidId));
        assert!(matches!(coordinator.find_job(1), JobLookup::InvalidId));
    }
}
