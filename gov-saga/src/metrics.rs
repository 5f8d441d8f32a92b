//! Orchestrator Metrics
//!
//! Cumulative counters for saga runs, reconciliation dispatch and the link
//! retry queue, with a point-in-time snapshot for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use gov_core::types::common::Timestamp;

/// Metrics collector
pub struct SagaMetrics {
    sagas_started: AtomicU64,
    sagas_completed: AtomicU64,
    sagas_partial: AtomicU64,
    sagas_failed: AtomicU64,
    compensations: AtomicU64,
    events_dispatched: AtomicU64,
    events_deduplicated: AtomicU64,
    watcher_errors: AtomicU64,
    link_retries_scheduled: AtomicU64,
    link_retries_succeeded: AtomicU64,
    link_retries_exhausted: AtomicU64,
    resolver_hits: AtomicU64,
    resolver_misses: AtomicU64,
    start_time: Timestamp,
}

/// Point-in-time counter values
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Saga runs started
    pub sagas_started: u64,
    /// Saga runs that finished with every step done
    pub sagas_completed: u64,
    /// Saga runs that finished with warnings after ledger commit
    pub sagas_partial: u64,
    /// Saga runs that failed before ledger commit
    pub sagas_failed: u64,
    /// Compensation deletes executed
    pub compensations: u64,
    /// Ledger events applied by watchers
    pub events_dispatched: u64,
    /// Duplicate deliveries dropped at the dispatch boundary
    pub events_deduplicated: u64,
    /// Per-event watcher errors (isolated, watcher kept running)
    pub watcher_errors: u64,
    /// Write-backs handed to the retry queue
    pub link_retries_scheduled: u64,
    /// Queued write-backs that landed
    pub link_retries_succeeded: u64,
    /// Queued write-backs whose budget was spent
    pub link_retries_exhausted: u64,
    /// Resolver lookups that found the entity
    pub resolver_hits: u64,
    /// Resolver lookups that exhausted their budget
    pub resolver_misses: u64,
    /// Collector uptime in milliseconds
    pub uptime_ms: u64,
}

impl SagaMetrics {
    /// Create a collector
    pub fn new() -> Self {
        Self {
            sagas_started: AtomicU64::new(0),
            sagas_completed: AtomicU64::new(0),
            sagas_partial: AtomicU64::new(0),
            sagas_failed: AtomicU64::new(0),
            compensations: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            events_deduplicated: AtomicU64::new(0),
            watcher_errors: AtomicU64::new(0),
            link_retries_scheduled: AtomicU64::new(0),
            link_retries_succeeded: AtomicU64::new(0),
            link_retries_exhausted: AtomicU64::new(0),
            resolver_hits: AtomicU64::new(0),
            resolver_misses: AtomicU64::new(0),
            start_time: Timestamp::now(),
        }
    }

    pub fn saga_started(&self) {
        self.sagas_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn saga_completed(&self) {
        self.sagas_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn saga_partial(&self) {
        self.sagas_partial.fetch_add(1, Ordering::Relaxed);
    }

    pub fn saga_failed(&self) {
        self.sagas_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compensation_run(&self) {
        self.compensations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_deduplicated(&self) {
        self.events_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watcher_error(&self) {
        self.watcher_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_retry_scheduled(&self) {
        self.link_retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_retry_succeeded(&self) {
        self.link_retries_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_retry_exhausted(&self) {
        self.link_retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolver_hit(&self) {
        self.resolver_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolver_miss(&self) {
        self.resolver_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sagas_started: self.sagas_started.load(Ordering::Relaxed),
            sagas_completed: self.sagas_completed.load(Ordering::Relaxed),
            sagas_partial: self.sagas_partial.load(Ordering::Relaxed),
            sagas_failed: self.sagas_failed.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_deduplicated: self.events_deduplicated.load(Ordering::Relaxed),
            watcher_errors: self.watcher_errors.load(Ordering::Relaxed),
            link_retries_scheduled: self.link_retries_scheduled.load(Ordering::Relaxed),
            link_retries_succeeded: self.link_retries_succeeded.load(Ordering::Relaxed),
            link_retries_exhausted: self.link_retries_exhausted.load(Ordering::Relaxed),
            resolver_hits: self.resolver_hits.load(Ordering::Relaxed),
            resolver_misses: self.resolver_misses.load(Ordering::Relaxed),
            uptime_ms: Timestamp::now()
                .as_millis()
                .saturating_sub(self.start_time.as_millis()),
        }
    }
}

impl Default for SagaMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = SagaMetrics::new();
        metrics.saga_started();
        metrics.saga_started();
        metrics.saga_completed();
        metrics.saga_failed();
        metrics.compensation_run();
        metrics.event_dispatched();
        metrics.event_deduplicated();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sagas_started, 2);
        assert_eq!(snapshot.sagas_completed, 1);
        assert_eq!(snapshot.sagas_failed, 1);
        assert_eq!(snapshot.compensations, 1);
        assert_eq!(snapshot.events_dispatched, 1);
        assert_eq!(snapshot.events_deduplicated, 1);
    }
}
