//! Worker pool and HTTP metrics
//!
//! Prometheus metrics cover the job pipeline end to end; a separate set of
//! atomic counters feeds the health payload without touching the registry.

use prometheus::{
    register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Prometheus metrics for the job pipeline
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    // Job lifecycle counters
    pub jobs_submitted: Counter,
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub jobs_rejected: Counter,

    // Pool state gauges
    pub queue_depth: Gauge,
    pub busy_workers: Gauge,

    // Execution timing
    pub job_duration_seconds: Histogram,

    // Request counters by endpoint group
    pub submit_requests: Counter,
    pub result_requests: Counter,
    pub control_requests: Counter,
}

impl PoolMetrics {
    pub fn new() -> anyhow::Result<Self> {
        Self::new_with_prefix("")
    }

    /// Create metrics with a name prefix (useful for testing)
    pub fn new_with_prefix(prefix: &str) -> anyhow::Result<Self> {
        let suffix = if prefix.is_empty() {
            String::new()
        } else {
            format!("_{}", prefix)
        };

        let jobs_submitted = register_counter!(
            format!("surveystats_jobs_submitted_total{}", suffix),
            "Total jobs accepted into the queue"
        )
        .unwrap_or_else(|_| {
            // If registration fails (e.g., in tests), use a default counter
            Counter::new("test_counter", "test").unwrap()
        });

        let jobs_completed = register_counter!(
            format!("surveystats_jobs_completed_total{}", suffix),
            "Total jobs finished successfully"
        )
        .unwrap_or_else(|_| Counter::new("test_counter2", "test").unwrap());

        let jobs_failed = register_counter!(
            format!("surveystats_jobs_failed_total{}", suffix),
            "Total jobs that ended in a failure"
        )
        .unwrap_or_else(|_| Counter::new("test_counter3", "test").unwrap());

        let jobs_rejected = register_counter!(
            format!("surveystats_jobs_rejected_total{}", suffix),
            "Total submissions rejected before queueing"
        )
        .unwrap_or_else(|_| Counter::new("test_counter4", "test").unwrap());

        let queue_depth = register_gauge!(
            format!("surveystats_queue_depth{}", suffix),
            "Jobs currently waiting in the work queue"
        )
        .unwrap_or_else(|_| Gauge::new("test_gauge", "test").unwrap());

        let busy_workers = register_gauge!(
            format!("surveystats_busy_workers{}", suffix),
            "Workers currently executing a job"
        )
        .unwrap_or_else(|_| Gauge::new("test_gauge2", "test").unwrap());

        let job_duration_seconds = register_histogram!(
            format!("surveystats_job_duration_seconds{}", suffix),
            "Job execution duration from dequeue to terminal state"
        )
        .unwrap_or_else(|_| {
            prometheus::Histogram::with_opts(prometheus::HistogramOpts::new(
                "test_histogram",
                "test",
            ))
            .unwrap()
        });

        let submit_requests = register_counter!(
            format!("surveystats_http_submit_requests_total{}", suffix),
            "Total task submission requests"
        )
        .unwrap_or_else(|_| Counter::new("test_counter5", "test").unwrap());

        let result_requests = register_counter!(
            format!("surveystats_http_result_requests_total{}", suffix),
            "Total result and listing requests"
        )
        .unwrap_or_else(|_| Counter::new("test_counter6", "test").unwrap());

        let control_requests = register_counter!(
            format!("surveystats_http_control_requests_total{}", suffix),
            "Total shutdown and control requests"
        )
        .unwrap_or_else(|_| Counter::new("test_counter7", "test").unwrap());

        Ok(Self {
            jobs_submitted,
            jobs_completed,
            jobs_failed,
            jobs_rejected,
            queue_depth,
            busy_workers,
            job_duration_seconds,
            submit_requests,
            result_requests,
            control_requests,
        })
    }
}

/// Fast-path counters mirrored into the health payload
#[derive(Debug, Default)]
pub struct PoolStats {
    pub jobs_submitted: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_rejected: AtomicU64,
}

/// Point-in-time copy of the pool counters
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_rejected: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation_tolerates_double_registration() {
        let first = PoolMetrics::new_with_prefix("dup_check");
        let second = PoolMetrics::new_with_prefix("dup_check");
        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[test]
    fn test_stats_snapshot_reflects_counters() {
        let stats = PoolStats::default();
        stats.jobs_submitted.fetch_add(3, Ordering::Relaxed);
        stats.jobs_completed.fetch_add(2, Ordering::Relaxed);
        stats.jobs_failed.fetch_add(1, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.jobs_submitted, 3);
        assert_eq!(snapshot.jobs_completed, 2);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_rejected, 0);
    }
}
