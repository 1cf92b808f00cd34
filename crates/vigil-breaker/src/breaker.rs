// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The circuit breaker state machine: `{open, opened_at}` driven by a
//! command's rolling health snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use vigil_config::{Clock, PropertyTable};
use vigil_metrics::CommandMetrics;

/// Consumes a [`CommandMetrics`]'s [`vigil_metrics::HealthCounts`] and
/// decides whether a request should be let through, short-circuited, or
/// treated as the single half-open probe.
///
/// Grounded on the same "flag flips a hard reject for everyone until
/// explicitly cleared" shape this workspace uses for per-processor
/// admission breakers, generalized here from a single-threaded `Cell`
/// to atomics shared across every thread dispatching this command.
pub struct CircuitBreaker {
    clock: Arc<dyn Clock>,
    metrics: Arc<CommandMetrics>,
    table: Arc<PropertyTable>,
    open: AtomicBool,
    opened_at: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("opened_at", &self.opened_at.load(Ordering::SeqCst))
            .finish()
    }
}

impl CircuitBreaker {
    /// Builds a breaker for one command, reading thresholds from `table`
    /// and health from `metrics` on every decision.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, metrics: Arc<CommandMetrics>, table: Arc<PropertyTable>) -> Self {
        Self {
            clock,
            metrics,
            table,
            open: AtomicBool::new(false),
            opened_at: AtomicU64::new(0),
        }
    }

    /// The top-level admission decision consulted by the command runtime's
    /// `CIRCUIT_CHECK` state.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        if !self.table.circuit_breaker_enabled() {
            return true;
        }
        if self.table.circuit_breaker_force_open() {
            return false;
        }
        if self.table.circuit_breaker_force_closed() {
            // Still evaluate health so the open-state stays visible for
            // diagnostics even though force-closed overrides the result.
            let _ = self.is_open();
            return true;
        }
        !self.is_open() || self.allow_single_test()
    }

    /// `true` if the breaker is tripped. Evaluating this when not yet
    /// tripped can itself trip it: a high enough error rate over a large
    /// enough sample flips `open` via CAS and records `opened_at`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        if self.open.load(Ordering::SeqCst) {
            return true;
        }

        let health = self.metrics.get_health_counts();
        if health.total_requests() < self.table.circuit_breaker_request_volume_threshold() {
            return false;
        }
        if health.error_percentage() < f64::from(self.table.circuit_breaker_error_threshold_percentage()) {
            return false;
        }

        let now = self.clock.now_millis();
        if self
            .open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.opened_at.store(now, Ordering::SeqCst);
            tracing::warn!(
                total_requests = health.total_requests(),
                error_percentage = health.error_percentage(),
                "circuit breaker tripped open"
            );
        }
        true
    }

    /// Returns `true` exactly once per cool-down window: the first caller
    /// to observe the sleep window elapsed wins a CAS that advances
    /// `opened_at` to `now`, becoming the sole half-open probe. Every
    /// other concurrent caller loses the CAS and is still short-circuited.
    #[must_use]
    pub fn allow_single_test(&self) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        let now = self.clock.now_millis();
        let opened_at = self.opened_at.load(Ordering::SeqCst);
        if now <= opened_at + self.table.circuit_breaker_sleep_window_ms() {
            return false;
        }
        self.opened_at
            .compare_exchange(opened_at, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Closes the breaker and, as a documented quirk of this contract,
    /// also resets the rolling counter — clearing short-circuited and
    /// rejection counts along with error counts, not just the error
    /// signal that caused the trip. Preserved deliberately; see the
    /// design notes for why this was not "fixed".
    pub fn mark_success(&self) {
        self.metrics.rolling().reset();
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_config::testing::ManualClock;
    use vigil_config::{CommandKey, GroupKey, Property, PropertyTableBuilder};
    use vigil_metrics::CommandMetricsConfig;

    fn harness(
        clock: Arc<ManualClock>,
    ) -> (Arc<CommandMetrics>, Arc<PropertyTable>, CircuitBreaker) {
        let table = Arc::new(PropertyTableBuilder::new().build(
            GroupKey::new("G"),
            CommandKey::new("C"),
            None,
        ));
        let metrics = Arc::new(CommandMetrics::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            CommandMetricsConfig::from_table(&table),
            Property::constant(true),
        ));
        let breaker = CircuitBreaker::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&metrics),
            Arc::clone(&table),
        );
        (metrics, table, breaker)
    }

    #[test]
    fn stays_closed_below_request_volume_threshold() {
        let clock = Arc::new(ManualClock::new());
        let (metrics, table, breaker) = harness(Arc::clone(&clock));
        table.set_circuit_breaker_request_volume_threshold(20);
        for _ in 0..10 {
            metrics.mark_failure(1);
        }
        assert!(breaker.allow_request());
        assert!(!breaker.is_open());
    }

    #[test]
    fn trips_open_once_error_rate_and_volume_thresholds_are_crossed() {
        let clock = Arc::new(ManualClock::new());
        let (metrics, table, breaker) = harness(Arc::clone(&clock));
        table.set_circuit_breaker_request_volume_threshold(10);
        table.set_circuit_breaker_error_threshold_percentage(50);
        for _ in 0..4 {
            metrics.mark_success(1);
        }
        for _ in 0..6 {
            metrics.mark_failure(1);
        }
        assert!(breaker.is_open());
        assert!(!breaker.allow_request());
    }

    #[test]
    fn allow_single_test_grants_exactly_one_probe_per_cooldown() {
        let clock = Arc::new(ManualClock::new());
        let (metrics, table, breaker) = harness(Arc::clone(&clock));
        table.set_circuit_breaker_request_volume_threshold(1);
        table.set_circuit_breaker_error_threshold_percentage(1);
        table.set_circuit_breaker_sleep_window_ms(5_000);
        metrics.mark_failure(1);
        assert!(breaker.is_open());

        assert!(!breaker.allow_single_test());
        clock.advance(5_001);
        assert!(breaker.allow_single_test());
        assert!(!breaker.allow_single_test());
    }

    #[test]
    fn mark_success_closes_breaker_and_clears_rolling_counters() {
        let clock = Arc::new(ManualClock::new());
        let (metrics, table, breaker) = harness(Arc::clone(&clock));
        table.set_circuit_breaker_request_volume_threshold(1);
        table.set_circuit_breaker_error_threshold_percentage(1);
        metrics.mark_failure(1);
        assert!(breaker.is_open());

        breaker.mark_success();
        assert!(!breaker.is_open());
        assert_eq!(
            metrics.rolling().rolling_sum(vigil_metrics::RollingEvent::Failure),
            0
        );
    }

    #[test]
    fn force_open_always_rejects_regardless_of_health() {
        let clock = Arc::new(ManualClock::new());
        let (_metrics, table, breaker) = harness(clock);
        table.set_circuit_breaker_force_open(true);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn force_closed_always_admits_even_when_tripped() {
        let clock = Arc::new(ManualClock::new());
        let (metrics, table, breaker) = harness(clock);
        table.set_circuit_breaker_request_volume_threshold(1);
        table.set_circuit_breaker_error_threshold_percentage(1);
        table.set_circuit_breaker_force_closed(true);
        metrics.mark_failure(1);
        assert!(breaker.allow_request());
    }

    #[test]
    fn disabled_breaker_always_admits() {
        let clock = Arc::new(ManualClock::new());
        let (metrics, table, breaker) = harness(clock);
        table.set_circuit_breaker_enabled(false);
        table.set_circuit_breaker_request_volume_threshold(1);
        table.set_circuit_breaker_error_threshold_percentage(1);
        metrics.mark_failure(1);
        assert!(breaker.allow_request());
    }
}
