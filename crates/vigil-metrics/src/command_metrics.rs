// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-command metrics aggregate: rolling counters, latency reservoirs,
//! concurrent-execution tracking, and a CAS-gated health snapshot.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use vigil_config::{Clock, Property, PropertyTable};

use crate::health::HealthCounts;
use crate::rolling_number::{RollingEvent, RollingNumber};
use crate::rolling_percentile::RollingPercentile;

/// The subset of a [`PropertyTable`]'s metrics fields needed to construct
/// a [`CommandMetrics`], captured once at registration time. Rolling
/// window shape (bucket count, window length) is fixed for the lifetime
/// of a command's metrics the way bucket shape is fixed for a
/// [`RollingNumber`]; only the values gated behind [`Property`] reads
/// (percentile sampling, snapshot interval) stay dynamic.
#[derive(Debug, Clone, Copy)]
pub struct CommandMetricsConfig {
    /// `metricsRollingStatisticalWindow`, in milliseconds.
    pub rolling_window_ms: u64,
    /// `metricsRollingStatisticalWindowBuckets`.
    pub rolling_window_buckets: usize,
    /// `metricsRollingPercentileWindow`, in milliseconds.
    pub percentile_window_ms: u64,
    /// `metricsRollingPercentileWindowBuckets`.
    pub percentile_window_buckets: usize,
    /// `metricsRollingPercentileBucketSize`.
    pub percentile_bucket_size: usize,
    /// `metricsHealthSnapshotInterval`, in milliseconds.
    pub health_snapshot_interval_ms: u64,
}

impl CommandMetricsConfig {
    /// Reads the relevant fields off a resolved [`PropertyTable`].
    #[must_use]
    pub fn from_table(table: &PropertyTable) -> Self {
        Self {
            rolling_window_ms: table.metrics_rolling_statistical_window_ms(),
            rolling_window_buckets: table.metrics_rolling_statistical_window_buckets(),
            percentile_window_ms: table.metrics_rolling_percentile_window_ms(),
            percentile_window_buckets: table.metrics_rolling_percentile_window_buckets(),
            percentile_bucket_size: table.metrics_rolling_percentile_bucket_size(),
            health_snapshot_interval_ms: table.metrics_health_snapshot_interval_ms(),
        }
    }
}

/// One command's full metrics surface: a [`RollingNumber`] of outcome
/// counters, two [`RollingPercentile`] latency reservoirs (execution-only
/// and total end-to-end), a live concurrent-execution counter, and a
/// health snapshot cache refreshed at most once per
/// `healthSnapshotInterval`.
#[derive(Debug)]
pub struct CommandMetrics {
    rolling: RollingNumber,
    execution_latency: RollingPercentile,
    total_latency: RollingPercentile,
    concurrent_executions: AtomicI64,
    health_snapshot_interval_ms: u64,
    last_snapshot_at: AtomicU64,
    has_snapshotted: AtomicBool,
    cached_snapshot: Mutex<HealthCounts>,
    clock: Arc<dyn Clock>,
}

impl CommandMetrics {
    /// Builds a metrics aggregate from a resolved configuration. The
    /// percentile-enabled flag is read dynamically on every sample via
    /// `percentile_enabled`, matching [`RollingPercentile::new`]'s
    /// contract.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, config: CommandMetricsConfig, percentile_enabled: Property<bool>) -> Self {
        let rolling = RollingNumber::new(
            Arc::clone(&clock),
            config.rolling_window_ms,
            config.rolling_window_buckets,
        );
        let execution_latency = RollingPercentile::new(
            Arc::clone(&clock),
            config.percentile_window_ms,
            config.percentile_window_buckets,
            config.percentile_bucket_size,
            percentile_enabled.clone(),
        );
        let total_latency = RollingPercentile::new(
            Arc::clone(&clock),
            config.percentile_window_ms,
            config.percentile_window_buckets,
            config.percentile_bucket_size,
            percentile_enabled,
        );
        Self {
            rolling,
            execution_latency,
            total_latency,
            concurrent_executions: AtomicI64::new(0),
            health_snapshot_interval_ms: config.health_snapshot_interval_ms,
            last_snapshot_at: AtomicU64::new(0),
            has_snapshotted: AtomicBool::new(false),
            cached_snapshot: Mutex::new(HealthCounts::zero()),
            clock,
        }
    }

    /// Increments the live concurrent-execution count. Called on `START`.
    pub fn increment_concurrent_executions(&self) {
        let _ = self.concurrent_executions.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the live concurrent-execution count. Called once the
    /// invocation reaches a terminal state.
    pub fn decrement_concurrent_executions(&self) {
        let _ = self.concurrent_executions.fetch_sub(1, Ordering::SeqCst);
    }

    /// The current number of in-flight executions for this command.
    #[must_use]
    pub fn current_concurrent_execution_count(&self) -> i64 {
        self.concurrent_executions.load(Ordering::SeqCst)
    }

    /// `run()` returned successfully after `duration_ms`.
    pub fn mark_success(&self, duration_ms: i64) {
        self.rolling.increment(RollingEvent::Success);
        self.execution_latency.add_value(duration_ms);
        self.total_latency.add_value(duration_ms);
    }

    /// `run()` threw (not `BadRequest`) after `duration_ms`.
    pub fn mark_failure(&self, duration_ms: i64) {
        self.rolling.increment(RollingEvent::Failure);
        self.execution_latency.add_value(duration_ms);
        self.total_latency.add_value(duration_ms);
    }

    /// A thread-isolated `run()` exceeded its deadline.
    pub fn mark_timeout(&self, duration_ms: i64) {
        self.rolling.increment(RollingEvent::Timeout);
        self.execution_latency.add_value(duration_ms);
        self.total_latency.add_value(duration_ms);
    }

    /// The circuit breaker short-circuited this invocation.
    pub fn mark_short_circuited(&self) {
        self.rolling.increment(RollingEvent::ShortCircuited);
    }

    /// The worker pool's admission predicate rejected this invocation.
    pub fn mark_thread_pool_rejection(&self) {
        self.rolling.increment(RollingEvent::ThreadPoolRejected);
    }

    /// The execution semaphore's `tryAcquire` failed.
    pub fn mark_semaphore_rejection(&self) {
        self.rolling.increment(RollingEvent::SemaphoreRejected);
    }

    /// The fallback ran and returned successfully.
    pub fn mark_fallback_success(&self) {
        self.rolling.increment(RollingEvent::FallbackSuccess);
    }

    /// The fallback ran and itself threw.
    pub fn mark_fallback_failure(&self) {
        self.rolling.increment(RollingEvent::FallbackFailure);
    }

    /// The fallback semaphore's `tryAcquire` failed.
    pub fn mark_fallback_rejection(&self) {
        self.rolling.increment(RollingEvent::FallbackRejection);
    }

    /// Library code threw internally while servicing the command.
    pub fn mark_exception_thrown(&self) {
        self.rolling.increment(RollingEvent::ExceptionThrown);
    }

    /// A unit of work was dequeued and began executing on a pool thread.
    pub fn mark_thread_execution(&self) {
        self.rolling.increment(RollingEvent::ThreadExecution);
    }

    /// Records `active_count` as the latest sample of a pool's concurrent
    /// active-thread count, updating the window's peak if it is higher.
    pub fn mark_thread_max_active(&self, active_count: i64) {
        self.rolling.update_rolling_max(RollingEvent::ThreadMaxActive, active_count);
    }

    /// `n` requests were absorbed into a batched/collapsed execution.
    pub fn mark_collapsed(&self, n: i64) {
        self.rolling.add(RollingEvent::Collapsed, n);
    }

    /// A cache hit returned a previously-published result.
    pub fn mark_response_from_cache(&self) {
        self.rolling.increment(RollingEvent::ResponseFromCache);
    }

    /// The underlying [`RollingNumber`], for direct rolling/cumulative-sum reads.
    #[must_use]
    pub fn rolling(&self) -> &RollingNumber {
        &self.rolling
    }

    /// The execution-only latency reservoir (excludes fallback time).
    #[must_use]
    pub fn execution_latency(&self) -> &RollingPercentile {
        &self.execution_latency
    }

    /// The total end-to-end latency reservoir, from `START` to terminal.
    #[must_use]
    pub fn total_latency(&self) -> &RollingPercentile {
        &self.total_latency
    }

    /// Returns a cached [`HealthCounts`] snapshot, recomputing it only if
    /// `healthSnapshotInterval` has elapsed since the last recomputation.
    /// The very first call is always due, regardless of what the clock
    /// reads: `has_snapshotted` only flips once, so a fresh metrics
    /// aggregate never serves the zero-initialized placeholder snapshot.
    /// Concurrent callers racing to recompute all converge on exactly one
    /// winner via a CAS on `last_snapshot_at`; losers read the snapshot
    /// the winner just published (or the previous one, if the winner
    /// hasn't published yet).
    #[must_use]
    pub fn get_health_counts(&self) -> HealthCounts {
        let now = self.clock.now_millis();
        let last = self.last_snapshot_at.load(Ordering::SeqCst);
        let due = !self.has_snapshotted.load(Ordering::SeqCst) || now.saturating_sub(last) >= self.health_snapshot_interval_ms;

        if due
            && self
                .last_snapshot_at
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.has_snapshotted.store(true, Ordering::SeqCst);
            let fresh = HealthCounts::capture(&self.rolling);
            *self.cached_snapshot.lock() = fresh;
            return fresh;
        }

        *self.cached_snapshot.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_config::testing::ManualClock;

    fn config() -> CommandMetricsConfig {
        CommandMetricsConfig {
            rolling_window_ms: 10_000,
            rolling_window_buckets: 10,
            percentile_window_ms: 60_000,
            percentile_window_buckets: 6,
            percentile_bucket_size: 100,
            health_snapshot_interval_ms: 500,
        }
    }

    #[test]
    fn mark_success_feeds_rolling_and_latency() {
        let clock = Arc::new(ManualClock::new());
        let metrics = CommandMetrics::new(Arc::clone(&clock) as Arc<dyn Clock>, config(), Property::constant(true));
        metrics.mark_success(42);
        clock.advance(1);
        assert_eq!(metrics.rolling().rolling_sum(RollingEvent::Success), 1);
        assert_eq!(metrics.execution_latency().percentile(100.0), 42.0);
        assert_eq!(metrics.total_latency().percentile(100.0), 42.0);
    }

    #[test]
    fn concurrent_execution_count_tracks_in_flight() {
        let clock = Arc::new(ManualClock::new());
        let metrics = CommandMetrics::new(Arc::clone(&clock) as Arc<dyn Clock>, config(), Property::constant(true));
        assert_eq!(metrics.current_concurrent_execution_count(), 0);
        metrics.increment_concurrent_executions();
        metrics.increment_concurrent_executions();
        assert_eq!(metrics.current_concurrent_execution_count(), 2);
        metrics.decrement_concurrent_executions();
        assert_eq!(metrics.current_concurrent_execution_count(), 1);
    }

    #[test]
    fn health_snapshot_is_gated_by_interval() {
        let clock = Arc::new(ManualClock::new());
        let metrics = CommandMetrics::new(Arc::clone(&clock) as Arc<dyn Clock>, config(), Property::constant(true));

        metrics.mark_success(1);
        let first = metrics.get_health_counts();
        assert_eq!(first.total_requests(), 1);

        // A second failure lands in the rolling window, but the cached
        // snapshot should not move until the interval elapses.
        metrics.mark_failure(1);
        let still_cached = metrics.get_health_counts();
        assert_eq!(still_cached.total_requests(), 1);

        clock.advance(500);
        let refreshed = metrics.get_health_counts();
        assert_eq!(refreshed.total_requests(), 2);
        assert_eq!(refreshed.error_count(), 1);
    }

    #[test]
    fn first_snapshot_is_never_served_stale_even_at_clock_zero() {
        let clock = Arc::new(ManualClock::new());
        let metrics = CommandMetrics::new(Arc::clone(&clock) as Arc<dyn Clock>, config(), Property::constant(true));
        metrics.mark_failure(1);
        let snapshot = metrics.get_health_counts();
        assert_eq!(snapshot.total_requests(), 1);
        assert_eq!(snapshot.error_count(), 1);
    }

    #[test]
    fn short_circuited_and_rejections_count_toward_health() {
        let clock = Arc::new(ManualClock::new());
        let metrics = CommandMetrics::new(Arc::clone(&clock) as Arc<dyn Clock>, config(), Property::constant(true));
        metrics.mark_short_circuited();
        metrics.mark_thread_pool_rejection();
        metrics.mark_semaphore_rejection();
        let health = metrics.get_health_counts();
        assert_eq!(health.total_requests(), 3);
        assert_eq!(health.error_count(), 3);
    }
}
