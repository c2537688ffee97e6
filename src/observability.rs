use crate::errors::MutationError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Process-wide counters for the mutation pipeline
#[derive(Debug, Default)]
pub struct MutationMetrics {
    pub mutations_committed: AtomicU64,
    pub lock_conflicts: AtomicU64,
    pub stale_writes: AtomicU64,
    pub workflow_violations: AtomicU64,
    pub other_failures: AtomicU64,
    pub retries: AtomicU64,
    pub events_published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub subscriber_failures: AtomicU64,
}

impl MutationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_commit(&self) {
        self.mutations_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &MutationError) {
        let counter = match error {
            MutationError::ConcurrentEditConflict { .. } => &self.lock_conflicts,
            MutationError::StaleWriteConflict { .. } => &self.stale_writes,
            MutationError::WorkflowViolation { .. } => &self.workflow_violations,
            _ => &self.other_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_failure(&self) {
        self.subscriber_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> MutationStats {
        MutationStats {
            mutations_committed: self.mutations_committed.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            workflow_violations: self.workflow_violations.load(Ordering::Relaxed),
            other_failures: self.other_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            mutations_committed = stats.mutations_committed,
            lock_conflicts = stats.lock_conflicts,
            stale_writes = stats.stale_writes,
            workflow_violations = stats.workflow_violations,
            other_failures = stats.other_failures,
            retries = stats.retries,
            events_published = stats.events_published,
            publish_failures = stats.publish_failures,
            subscriber_failures = stats.subscriber_failures,
            "Mutation pipeline metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationStats {
    pub mutations_committed: u64,
    pub lock_conflicts: u64,
    pub stale_writes: u64,
    pub workflow_violations: u64,
    pub other_failures: u64,
    pub retries: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub subscriber_failures: u64,
}

static MUTATION_METRICS: std::sync::LazyLock<MutationMetrics> =
    std::sync::LazyLock::new(MutationMetrics::new);

pub fn mutation_metrics() -> &'static MutationMetrics {
    &MUTATION_METRICS
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self, outcome: &str) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            outcome = outcome,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
