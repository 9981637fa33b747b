//! Worker tasks consuming the job queue
//!
//! Each worker pulls items off the shared MPMC channel and executes them
//! sequentially. A drain sentinel makes the receiving worker exit after all
//! previously queued jobs are handled; the cancellation token is the abrupt
//! path used when the bounded shutdown wait expires.

use flume::Receiver;
use std::path::PathBuf;
use std::sync::{atomic::Ordering, Arc};
use std::time::Instant;
use surveystats_core::{aggregation, DatasetIndex, StatsError, StatsResult, TaskOutput, TaskRequest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job_store::JobStore;
use crate::metrics::{PoolMetrics, PoolStats};
use crate::results::ResultStore;

/// Work item sent to worker tasks via the MPMC channel
#[derive(Debug)]
pub enum QueueItem {
    /// A job to execute
    Task(JobTicket),
    /// Drain sentinel; the worker that receives it exits
    Shutdown,
}

/// One accepted job travelling from the coordinator to a worker
#[derive(Debug)]
pub struct JobTicket {
    pub job_id: u64,
    pub request: TaskRequest,
}

/// Shared handles each worker needs
#[derive(Clone)]
pub struct WorkerContext {
    pub index: Arc<DatasetIndex>,
    pub store: Arc<JobStore>,
    pub results: Arc<ResultStore>,
    pub metrics: Arc<PoolMetrics>,
    pub stats: Arc<PoolStats>,
}

/// Spawn a worker task that processes jobs sequentially
pub fn spawn_worker(
    worker_id: usize,
    work_rx: Receiver<QueueItem>,
    ctx: WorkerContext,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Worker {} started", worker_id);

        loop {
            let item = tokio::select! {
                result = work_rx.recv_async() => {
                    match result {
                        Ok(item) => item,
                        Err(_) => {
                            // Channel closed, worker should exit
                            break;
                        }
                    }
                }
                _ = shutdown_token.cancelled() => {
                    debug!("Worker {} received shutdown signal", worker_id);
                    break;
                }
            };

            let ticket = match item {
                QueueItem::Task(ticket) => ticket,
                QueueItem::Shutdown => {
                    debug!("Worker {} drained its share of the queue", worker_id);
                    break;
                }
            };

            ctx.metrics.queue_depth.dec();
            ctx.metrics.busy_workers.inc();
            let job_start = Instant::now();

            run_job(&ctx, &ticket).await;

            ctx.metrics
                .job_duration_seconds
                .observe(job_start.elapsed().as_secs_f64());
            ctx.metrics.busy_workers.dec();
        }

        info!("Worker {} shutting down", worker_id);
    })
}

/// Execute one job and record its terminal state.
///
/// Every failure mode lands in `Failed` for this job alone; the worker
/// keeps serving the queue.
async fn run_job(ctx: &WorkerContext, ticket: &JobTicket) {
    let outcome = match aggregation::execute(&ctx.index, &ticket.request) {
        Ok(output) => write_artifact(ctx, ticket.job_id, &output)
            .await
            .map(|artifact| (artifact, output.entry_count())),
        Err(err) => Err(err),
    };

    match outcome {
        Ok((artifact, entries)) => {
            debug!(
                "Job {} ({}) finished with {} entries",
                ticket.job_id, ticket.request.kind, entries
            );
            if ctx.store.complete(ticket.job_id, artifact) {
                ctx.metrics.jobs_completed.inc();
                ctx.stats.jobs_completed.fetch_add(1, Ordering::Relaxed);
            }
        }
        Err(err) => {
            warn!(
                "Job {} ({}) failed: {}",
                ticket.job_id, ticket.request.kind, err
            );
            if ctx.store.fail(ticket.job_id, err.public_reason()) {
                ctx.metrics.jobs_failed.inc();
                ctx.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Serialize the output and persist it on the blocking pool, keeping file
/// IO off the runtime threads.
async fn write_artifact(
    ctx: &WorkerContext,
    job_id: u64,
    output: &TaskOutput,
) -> StatsResult<PathBuf> {
    let payload = serde_json::to_string(output)?;
    let results = Arc::clone(&ctx.results);
    tokio::task::spawn_blocking(move || results.write(job_id, &payload))
        .await
        .map_err(|err| StatsError::internal(format!("Result writer task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::JobStatus;
    use surveystats_core::{QuestionName, Record, StateName, TaskKind};

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

    fn test_context(results_dir: &std::path::Path) -> WorkerContext {
        WorkerContext {
            index: test_index(),
            store: Arc::new(JobStore::new()),
            results: Arc::new(ResultStore::new(results_dir).unwrap()),
            metrics: Arc::new(PoolMetrics::new_with_prefix("worker_test").unwrap()),
            stats: Arc::new(PoolStats::default()),
        }
    }

    fn ticket(job_id: u64, kind: TaskKind, state: Option<&str>) -> JobTicket {
        JobTicket {
            job_id,
            request: TaskRequest {
                kind,
                question: QuestionName::from("Average commute time"),
                state: state.map(StateName::from),
            },
        }
    }

    #[tokio::test]
    async fn test_worker_runs_job_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let (tx, rx) = flume::unbounded();
        let handle = spawn_worker(0, rx, ctx.clone(), CancellationToken::new());

        ctx.store.insert_running(1);
        tx.send(QueueItem::Task(ticket(1, TaskKind::StatesMean, None)))
            .unwrap();
        tx.send(QueueItem::Shutdown).unwrap();
        handle.await.unwrap();

        let Some(JobStatus::Done { artifact }) = ctx.store.status(1) else {
            panic!("job should be done, got {:?}", ctx.store.status(1));
        };
        assert_eq!(
            ctx.results.read(&artifact).unwrap(),
            "{\"Alpha\":15.0,\"Beta\":30.0}"
        );
    }

    #[tokio::test]
    async fn test_job_failure_does_not_stop_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let (tx, rx) = flume::unbounded();
        let handle = spawn_worker(0, rx, ctx.clone(), CancellationToken::new());

        ctx.store.insert_running(1);
        ctx.store.insert_running(2);
        // Missing state fails at dispatch; the next job must still run
        tx.send(QueueItem::Task(ticket(1, TaskKind::StateMean, None)))
            .unwrap();
        tx.send(QueueItem::Task(ticket(2, TaskKind::GlobalMean, None)))
            .unwrap();
        tx.send(QueueItem::Shutdown).unwrap();
        handle.await.unwrap();

        assert_eq!(
            ctx.store.status(1),
            Some(JobStatus::Failed {
                reason: "State not provided".to_string()
            })
        );
        assert!(matches!(ctx.store.status(2), Some(JobStatus::Done { .. })));
        assert_eq!(ctx.stats.snapshot().jobs_failed, 1);
        assert_eq!(ctx.stats.snapshot().jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        // Remove the results directory so the artifact write cannot land
        std::fs::remove_dir_all(dir.path()).unwrap();
        let (tx, rx) = flume::unbounded();
        let handle = spawn_worker(0, rx, ctx.clone(), CancellationToken::new());

        ctx.store.insert_running(1);
        tx.send(QueueItem::Task(ticket(1, TaskKind::GlobalMean, None)))
            .unwrap();
        tx.send(QueueItem::Shutdown).unwrap();
        handle.await.unwrap();

        assert!(matches!(
            ctx.store.status(1),
            Some(JobStatus::Failed { .. })
        ));
        assert_eq!(ctx.stats.snapshot().jobs_failed, 1);
        assert_eq!(ctx.stats.snapshot().jobs_completed, 0);
    }

    #[tokio::test]
    async fn test_sentinel_processes_prior_jobs_first() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let (tx, rx) = flume::unbounded();

        for job_id in 1..=4 {
            ctx.store.insert_running(job_id);
            tx.send(QueueItem::Task(ticket(job_id, TaskKind::GlobalMean, None)))
                .unwrap();
        }
        tx.send(QueueItem::Shutdown).unwrap();

        // Worker spawned after the queue is full still drains it in order
        let handle = spawn_worker(3, rx, ctx.clone(), CancellationToken::new());
        handle.await.unwrap();

        for job_id in 1..=4 {
            assert!(
                matches!(ctx.store.status(job_id), Some(JobStatus::Done { .. })),
                "job {job_id} should be done"
            );
        }
    }
}
