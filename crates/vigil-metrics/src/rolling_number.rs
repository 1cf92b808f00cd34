// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Bucketed rolling event counters with an immutable ring-state swap.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use vigil_config::Clock;

const NUM_EVENTS: usize = 14;

/// The closed set of events a [`RollingNumber`] tracks.
///
/// Every variant but [`RollingEvent::ThreadMaxActive`] is a monotonic
/// counter within its bucket; `ThreadMaxActive` is a max-updater (the
/// bucket register only ever moves up to the largest value observed
/// during the bucket's lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollingEvent {
    /// A command's `run()` returned successfully.
    Success,
    /// A command's `run()` threw, counted as a fallback-triggering failure.
    Failure,
    /// A thread-isolated `run()` exceeded its deadline.
    Timeout,
    /// The circuit breaker was open when the command was invoked.
    ShortCircuited,
    /// The worker pool's admission predicate denied the request.
    ThreadPoolRejected,
    /// The execution semaphore's `tryAcquire` failed.
    SemaphoreRejected,
    /// The fallback ran and returned successfully.
    FallbackSuccess,
    /// The fallback ran and itself threw.
    FallbackFailure,
    /// The fallback semaphore's `tryAcquire` failed.
    FallbackRejection,
    /// Library code threw internally while servicing the command.
    ExceptionThrown,
    /// A unit of work was dequeued and began executing on a pool thread.
    ThreadExecution,
    /// Max-updater: the highest concurrent active-thread count observed.
    ThreadMaxActive,
    /// A request was absorbed into a batched/collapsed execution.
    Collapsed,
    /// A cache hit returned a previously-published result.
    ResponseFromCache,
}

impl RollingEvent {
    /// Every event variant, in a stable order matching bucket storage.
    pub const ALL: [RollingEvent; NUM_EVENTS] = [
        RollingEvent::Success,
        RollingEvent::Failure,
        RollingEvent::Timeout,
        RollingEvent::ShortCircuited,
        RollingEvent::ThreadPoolRejected,
        RollingEvent::SemaphoreRejected,
        RollingEvent::FallbackSuccess,
        RollingEvent::FallbackFailure,
        RollingEvent::FallbackRejection,
        RollingEvent::ExceptionThrown,
        RollingEvent::ThreadExecution,
        RollingEvent::ThreadMaxActive,
        RollingEvent::Collapsed,
        RollingEvent::ResponseFromCache,
    ];

    /// True for the sole max-updater variant, [`RollingEvent::ThreadMaxActive`].
    #[must_use]
    pub fn is_max_updater(self) -> bool {
        matches!(self, RollingEvent::ThreadMaxActive)
    }

    fn index(self) -> usize {
        self as usize
    }
}

struct Bucket {
    window_start: u64,
    counters: [AtomicI64; NUM_EVENTS],
}

impl Bucket {
    fn new(window_start: u64) -> Self {
        Self {
            window_start,
            counters: std::array::from_fn(|_| AtomicI64::new(0)),
        }
    }

    fn record(&self, event: RollingEvent, delta: i64) {
        let slot = &self.counters[event.index()];
        if event.is_max_updater() {
            let _ = slot.fetch_max(delta, Ordering::SeqCst);
        } else {
            let _ = slot.fetch_add(delta, Ordering::SeqCst);
        }
    }

    fn value(&self, event: RollingEvent) -> i64 {
        self.counters[event.index()].load(Ordering::SeqCst)
    }
}

/// The ring's structure (which buckets exist, in what order) is an
/// immutable snapshot swapped atomically on every rotation. Bucket
/// contents keep mutating in place through shared `Arc`s, which is what
/// keeps the read path lock-free: a reader holding an old `Ring` still
/// sees live, consistent per-bucket counters.
struct Ring {
    buckets: Vec<Arc<Bucket>>,
}

impl Ring {
    fn empty() -> Self {
        Self { buckets: Vec::new() }
    }

    fn tail(&self) -> Option<&Arc<Bucket>> {
        self.buckets.last()
    }
}

/// A bucketed, lock-light rolling counter over a `window_ms`-long sliding
/// window split into `bucket_count` equal buckets.
pub struct RollingNumber {
    clock: Arc<dyn Clock>,
    window_ms: u64,
    bucket_count: usize,
    bucket_size_ms: u64,
    ring: ArcSwap<Ring>,
    writer_lock: Mutex<()>,
    cumulative: [AtomicI64; NUM_EVENTS],
}

impl std::fmt::Debug for RollingNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingNumber")
            .field("window_ms", &self.window_ms)
            .field("bucket_count", &self.bucket_count)
            .finish_non_exhaustive()
    }
}

impl RollingNumber {
    /// Creates a rolling number over `window_ms` split into `bucket_count`
    /// equal buckets. `window_ms` must be evenly divisible by
    /// `bucket_count`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, window_ms: u64, bucket_count: usize) -> Self {
        assert!(bucket_count > 0, "bucket_count must be positive");
        assert_eq!(
            window_ms % bucket_count as u64,
            0,
            "window_ms must be evenly divisible by bucket_count"
        );
        Self {
            clock,
            window_ms,
            bucket_count,
            bucket_size_ms: window_ms / bucket_count as u64,
            ring: ArcSwap::from_pointee(Ring::empty()),
            writer_lock: Mutex::new(()),
            cumulative: std::array::from_fn(|_| AtomicI64::new(0)),
        }
    }

    /// Increments `event`'s counter in the current bucket by one.
    pub fn increment(&self, event: RollingEvent) {
        self.add(event, 1);
    }

    /// Adds `amount` to `event`'s counter in the current bucket.
    pub fn add(&self, event: RollingEvent, amount: i64) {
        self.current_bucket().record(event, amount);
    }

    /// Updates `event`'s max-updater register in the current bucket.
    pub fn update_rolling_max(&self, event: RollingEvent, value: i64) {
        self.current_bucket().record(event, value);
    }

    /// Sum of `event` across every bucket currently in the window.
    #[must_use]
    pub fn rolling_sum(&self, event: RollingEvent) -> i64 {
        // Force a rotation check so a quiescent reader still observes an
        // up-to-date (possibly empty) window instead of stale buckets.
        let _ = self.current_bucket();
        self.ring
            .load()
            .buckets
            .iter()
            .map(|bucket| bucket.value(event))
            .sum()
    }

    /// The maximum value of `event`'s register across every bucket in the window.
    #[must_use]
    pub fn rolling_max_value(&self, event: RollingEvent) -> i64 {
        let _ = self.current_bucket();
        self.ring
            .load()
            .buckets
            .iter()
            .map(|bucket| bucket.value(event))
            .max()
            .unwrap_or(0)
    }

    /// `cumulative(event) + value_of_latest_bucket(event)`, per this
    /// engine's cumulative-sum contract.
    #[must_use]
    pub fn cumulative_sum(&self, event: RollingEvent) -> i64 {
        let _ = self.current_bucket();
        self.cumulative[event.index()].load(Ordering::SeqCst) + self.value_of_latest_bucket(event)
    }

    /// `event`'s value in the most recent bucket, or `0` if the window is empty.
    #[must_use]
    pub fn value_of_latest_bucket(&self, event: RollingEvent) -> i64 {
        let _ = self.current_bucket();
        self.ring
            .load()
            .tail()
            .map(|bucket| bucket.value(event))
            .unwrap_or(0)
    }

    /// `event`'s value across every live bucket, oldest to newest. The
    /// length equals the number of buckets currently populated (which
    /// grows to, and then stays at, `bucket_count`).
    #[must_use]
    pub fn values(&self, event: RollingEvent) -> Vec<i64> {
        let _ = self.current_bucket();
        self.ring
            .load()
            .buckets
            .iter()
            .map(|bucket| bucket.value(event))
            .collect()
    }

    /// Number of buckets currently populated in the window.
    #[must_use]
    pub fn bucket_len(&self) -> usize {
        self.ring.load().buckets.len()
    }

    /// Clears the rolling window. Does **not** clear the cumulative sums:
    /// history already folded into `cumulative_sum` survives a reset.
    pub fn reset(&self) {
        let _guard = self.writer_lock.lock();
        self.ring.store(Arc::new(Ring::empty()));
    }

    fn current_bucket(&self) -> Arc<Bucket> {
        let now = self.clock.now_millis();

        loop {
            if let Some(tail) = self.ring.load().tail() {
                if now < tail.window_start + self.bucket_size_ms {
                    return Arc::clone(tail);
                }
                // Slow path: try to become the writer. Losers never
                // block on a rotation that only makes an already-live
                // bucket stale — returning the pre-rotation tail is a
                // safe, if momentarily stale, view.
                let Some(_guard) = self.writer_lock.try_lock() else {
                    return Arc::clone(tail);
                };
                return self.roll_buckets_forward(now);
            }

            // Cold start: no bucket has ever been created. Unlike the
            // steady-state case above, there is nothing valid to hand a
            // losing thread, so the very first bucket is created under a
            // blocking acquire rather than risk a recorded event being
            // written into an orphaned bucket nobody ever publishes.
            let _guard = self.writer_lock.lock();
            if self.ring.load().tail().is_some() {
                continue;
            }
            return self.roll_buckets_forward(now);
        }
    }

    fn roll_buckets_forward(&self, now: u64) -> Arc<Bucket> {
        let mut ring = (*self.ring.load_full()).clone_structure();

        if let Some(tail) = ring.tail() {
            if now.saturating_sub(tail.window_start) >= self.window_ms {
                // The whole window has gone stale at once: fold every
                // live bucket into the cumulative sum in bulk, then
                // start fresh at `now` rather than iterating bucket by
                // bucket (which could take `window_ms / bucket_size_ms`
                // empty steps for no observable benefit).
                for bucket in &ring.buckets {
                    self.fold_into_cumulative(bucket);
                }
                ring.buckets.clear();
                ring.buckets.push(Arc::new(Bucket::new(now)));
                self.ring.store(Arc::new(ring));
                return self.ring.load().tail().cloned().expect("just inserted");
            }
        } else {
            ring.buckets.push(Arc::new(Bucket::new(now)));
            self.ring.store(Arc::new(ring));
            return self.ring.load().tail().cloned().expect("just inserted");
        }

        let mut iterations = 0usize;
        while iterations < self.bucket_count {
            let next_start = ring.tail().expect("non-empty").window_start + self.bucket_size_ms;
            if next_start > now {
                break;
            }
            if ring.buckets.len() >= self.bucket_count {
                let evicted = ring.buckets.remove(0);
                self.fold_into_cumulative(&evicted);
            }
            ring.buckets.push(Arc::new(Bucket::new(next_start)));
            iterations += 1;
        }

        self.ring.store(Arc::new(ring));
        self.ring.load().tail().cloned().expect("non-empty after rolling")
    }

    fn fold_into_cumulative(&self, bucket: &Bucket) {
        for event in RollingEvent::ALL {
            let value = bucket.value(event);
            if value != 0 {
                let _ = self.cumulative[event.index()].fetch_add(value, Ordering::SeqCst);
            }
        }
    }
}

trait CloneStructure {
    fn clone_structure(&self) -> Ring;
}

impl CloneStructure for Ring {
    fn clone_structure(&self) -> Ring {
        Ring {
            buckets: self.buckets.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_config::testing::ManualClock;

    fn rolling(clock: Arc<ManualClock>) -> RollingNumber {
        RollingNumber::new(clock, 200, 10)
    }

    #[test]
    fn bucket_rollover_scenario() {
        let clock = Arc::new(ManualClock::new());
        let rolling = rolling(Arc::clone(&clock) as Arc<dyn Clock>);

        rolling.increment(RollingEvent::Success);
        clock.set(60);
        rolling.increment(RollingEvent::Success);

        assert_eq!(rolling.bucket_len(), 4);
        assert_eq!(rolling.rolling_sum(RollingEvent::Success), 2);
        assert_eq!(rolling.values(RollingEvent::Success), vec![1, 0, 0, 1]);
    }

    #[test]
    fn window_drop_scenario() {
        let clock = Arc::new(ManualClock::new());
        let rolling = rolling(Arc::clone(&clock) as Arc<dyn Clock>);

        rolling.increment(RollingEvent::Success);
        clock.set(60);
        rolling.increment(RollingEvent::Success);

        clock.advance(200);
        rolling.increment(RollingEvent::Success);

        assert_eq!(rolling.rolling_sum(RollingEvent::Success), 1);
        assert_eq!(rolling.cumulative_sum(RollingEvent::Success), 3);
    }

    #[test]
    fn cumulative_never_decreases() {
        let clock = Arc::new(ManualClock::new());
        let rolling = rolling(Arc::clone(&clock) as Arc<dyn Clock>);

        let mut last = 0;
        for step in 0..50u64 {
            clock.set(step * 37);
            rolling.increment(RollingEvent::Failure);
            let current = rolling.cumulative_sum(RollingEvent::Failure);
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn rolling_sum_never_exceeds_cumulative_sum() {
        let clock = Arc::new(ManualClock::new());
        let rolling = rolling(Arc::clone(&clock) as Arc<dyn Clock>);
        for step in 0..80u64 {
            clock.set(step * 11);
            rolling.increment(RollingEvent::Timeout);
            assert!(rolling.rolling_sum(RollingEvent::Timeout) <= rolling.cumulative_sum(RollingEvent::Timeout));
        }
    }

    #[test]
    fn quiescence_past_the_window_drains_rolling_sum_to_zero() {
        let clock = Arc::new(ManualClock::new());
        let rolling = rolling(Arc::clone(&clock) as Arc<dyn Clock>);
        rolling.increment(RollingEvent::Success);
        clock.advance(200 + 20 + 1);
        assert_eq!(rolling.rolling_sum(RollingEvent::Success), 0);
    }

    #[test]
    fn reset_clears_buckets_but_not_cumulative() {
        let clock = Arc::new(ManualClock::new());
        let rolling = rolling(Arc::clone(&clock) as Arc<dyn Clock>);
        rolling.increment(RollingEvent::Success);
        clock.advance(200);
        rolling.increment(RollingEvent::Success);
        let cumulative_before = rolling.cumulative_sum(RollingEvent::Success);
        rolling.reset();
        assert_eq!(rolling.rolling_sum(RollingEvent::Success), 0);
        assert_eq!(rolling.cumulative_sum(RollingEvent::Success), cumulative_before - 1);
    }

    #[test]
    fn max_updater_tracks_peak_not_sum() {
        let clock = Arc::new(ManualClock::new());
        let rolling = rolling(Arc::clone(&clock) as Arc<dyn Clock>);
        rolling.update_rolling_max(RollingEvent::ThreadMaxActive, 3);
        rolling.update_rolling_max(RollingEvent::ThreadMaxActive, 7);
        rolling.update_rolling_max(RollingEvent::ThreadMaxActive, 2);
        assert_eq!(rolling.rolling_max_value(RollingEvent::ThreadMaxActive), 7);
    }

    #[test]
    fn concurrent_writers_never_observe_a_torn_ring() {
        use std::sync::Barrier;
        use std::thread;

        let clock = Arc::new(ManualClock::new());
        let rolling = Arc::new(rolling(Arc::clone(&clock) as Arc<dyn Clock>));
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let rolling = Arc::clone(&rolling);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..200 {
                    rolling.increment(RollingEvent::Success);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("writer thread panicked");
        }
        assert_eq!(rolling.rolling_sum(RollingEvent::Success), 1600);
    }
}
