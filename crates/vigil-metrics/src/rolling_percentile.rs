// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Sampled latency reservoir with windowed percentile queries.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use vigil_config::{Clock, Property};

struct BucketData {
    samples: Vec<i64>,
    next_index: usize,
}

struct PercentileBucket {
    window_start: u64,
    cap: usize,
    data: Mutex<BucketData>,
}

impl PercentileBucket {
    fn new(window_start: u64, cap: usize) -> Self {
        Self {
            window_start,
            cap,
            data: Mutex::new(BucketData {
                samples: Vec::with_capacity(cap),
                next_index: 0,
            }),
        }
    }

    /// Records a sample. Once the bucket holds `cap` samples, new writes
    /// overwrite the oldest slot by recency (reservoir-by-recency, not a
    /// statistically uniform reservoir).
    fn add(&self, value: i64) {
        let mut data = self.data.lock();
        if data.samples.len() < self.cap {
            data.samples.push(value);
        } else {
            let idx = data.next_index % self.cap;
            data.samples[idx] = value;
        }
        data.next_index = data.next_index.wrapping_add(1);
    }

    fn samples(&self) -> Vec<i64> {
        self.data.lock().samples.clone()
    }
}

/// An immutable, published view of every sample in the window as of the
/// last bucket rotation: a sorted copy plus the arithmetic mean. Never
/// mutated after construction; reads never coordinate with writers.
#[derive(Debug, Clone)]
struct Snapshot {
    sorted: Vec<i64>,
    mean: f64,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            sorted: Vec::new(),
            mean: 0.0,
        }
    }

    fn build(buckets: &[Arc<PercentileBucket>]) -> Self {
        let mut sorted: Vec<i64> = buckets.iter().flat_map(|bucket| bucket.samples()).collect();
        sorted.sort_unstable();
        let mean = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<i64>() as f64 / sorted.len() as f64
        };
        Self { sorted, mean }
    }

    fn percentile(&self, p: f64) -> f64 {
        let len = self.sorted.len();
        if len == 0 {
            return 0.0;
        }
        if p <= 0.0 {
            return self.sorted[0] as f64;
        }
        if p >= 100.0 {
            return self.sorted[len - 1] as f64;
        }
        let rank = (p / 100.0) * len as f64;
        let lo = (rank.floor() as usize).min(len - 1);
        let hi = (rank.ceil() as usize).min(len - 1);
        let lo_val = self.sorted[lo] as f64;
        let hi_val = self.sorted[hi] as f64;
        lo_val + (rank - lo as f64) * (hi_val - lo_val)
    }
}

struct Ring {
    buckets: Vec<Arc<PercentileBucket>>,
}

impl Ring {
    fn empty() -> Self {
        Self { buckets: Vec::new() }
    }

    fn tail(&self) -> Option<&Arc<PercentileBucket>> {
        self.buckets.last()
    }
}

/// A bucketed latency reservoir over `window_ms` split into `bucket_count`
/// buckets, each capped at `bucket_cap` samples. Percentile queries read
/// an immutable [`Snapshot`] rebuilt on each bucket rotation; the
/// rotation and locking scheme mirrors [`crate::RollingNumber`].
pub struct RollingPercentile {
    clock: Arc<dyn Clock>,
    window_ms: u64,
    bucket_count: usize,
    bucket_size_ms: u64,
    bucket_cap: usize,
    enabled: Property<bool>,
    ring: ArcSwap<Ring>,
    snapshot: ArcSwap<Snapshot>,
    writer_lock: Mutex<()>,
}

impl std::fmt::Debug for RollingPercentile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingPercentile")
            .field("window_ms", &self.window_ms)
            .field("bucket_count", &self.bucket_count)
            .finish_non_exhaustive()
    }
}

impl RollingPercentile {
    /// Creates a rolling percentile reservoir. `enabled` is re-read on
    /// every [`RollingPercentile::add_value`] call so it can be toggled
    /// live via configuration.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        window_ms: u64,
        bucket_count: usize,
        bucket_cap: usize,
        enabled: Property<bool>,
    ) -> Self {
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
            bucket_cap,
            enabled,
            ring: ArcSwap::from_pointee(Ring::empty()),
            snapshot: ArcSwap::from_pointee(Snapshot::empty()),
            writer_lock: Mutex::new(()),
        }
    }

    /// Records a latency sample (in milliseconds, or any consistent
    /// unit). A no-op when disabled.
    pub fn add_value(&self, value_ms: i64) {
        if !self.enabled.get_or(true) {
            return;
        }
        self.current_bucket().add(value_ms);
    }

    /// The `p`-th percentile (`p` in `[0, 100]`) of the published
    /// snapshot, linearly interpolated between adjacent sorted ranks.
    /// Forces a rotation check first so a quiescent caller still sees a
    /// windowed (possibly empty) view.
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        let _ = self.current_bucket();
        self.snapshot.load().percentile(p)
    }

    /// The arithmetic mean of the published snapshot.
    #[must_use]
    pub fn mean(&self) -> f64 {
        let _ = self.current_bucket();
        self.snapshot.load().mean
    }

    /// Clears the reservoir and its published snapshot.
    pub fn reset(&self) {
        let _guard = self.writer_lock.lock();
        self.ring.store(Arc::new(Ring::empty()));
        self.snapshot.store(Arc::new(Snapshot::empty()));
    }

    fn current_bucket(&self) -> Arc<PercentileBucket> {
        let now = self.clock.now_millis();

        loop {
            if let Some(tail) = self.ring.load().tail() {
                if now < tail.window_start + self.bucket_size_ms {
                    return Arc::clone(tail);
                }
                let Some(_guard) = self.writer_lock.try_lock() else {
                    return Arc::clone(tail);
                };
                return self.roll_buckets_forward(now);
            }

            let _guard = self.writer_lock.lock();
            if self.ring.load().tail().is_some() {
                continue;
            }
            return self.roll_buckets_forward(now);
        }
    }

    fn roll_buckets_forward(&self, now: u64) -> Arc<PercentileBucket> {
        let mut buckets = self.ring.load().buckets.clone();

        if let Some(tail) = buckets.last() {
            if now.saturating_sub(tail.window_start) >= self.window_ms {
                self.snapshot.store(Arc::new(Snapshot::build(&buckets)));
                buckets.clear();
                buckets.push(Arc::new(PercentileBucket::new(now, self.bucket_cap)));
                self.ring.store(Arc::new(Ring { buckets }));
                return self.ring.load().tail().cloned().expect("just inserted");
            }
        } else {
            buckets.push(Arc::new(PercentileBucket::new(now, self.bucket_cap)));
            self.ring.store(Arc::new(Ring { buckets }));
            return self.ring.load().tail().cloned().expect("just inserted");
        }

        let mut iterations = 0usize;
        let mut rotated = false;
        while iterations < self.bucket_count {
            let next_start = buckets.last().expect("non-empty").window_start + self.bucket_size_ms;
            if next_start > now {
                break;
            }
            if buckets.len() >= self.bucket_count {
                let _ = buckets.remove(0);
            }
            buckets.push(Arc::new(PercentileBucket::new(next_start, self.bucket_cap)));
            iterations += 1;
            rotated = true;
        }

        if rotated {
            self.snapshot.store(Arc::new(Snapshot::build(&buckets)));
        }
        self.ring.store(Arc::new(Ring { buckets }));
        self.ring.load().tail().cloned().expect("non-empty after rolling")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_config::testing::ManualClock;

    fn reservoir(clock: Arc<ManualClock>) -> RollingPercentile {
        RollingPercentile::new(clock, 600, 6, 100, Property::constant(true))
    }

    #[test]
    fn disabled_reservoir_never_records() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = RollingPercentile::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            600,
            6,
            100,
            Property::constant(false),
        );
        reservoir.add_value(42);
        assert_eq!(reservoir.percentile(50.0), 0.0);
    }

    #[test]
    fn percentile_is_monotonic_in_p() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(Arc::clone(&clock) as Arc<dyn Clock>);
        for v in [10, 20, 30, 40, 50, 60, 70, 80, 90, 100] {
            reservoir.add_value(v);
        }
        clock.advance(100);
        let mut last = reservoir.percentile(0.0);
        for p in [10.0, 25.0, 50.0, 75.0, 90.0, 99.0, 100.0] {
            let current = reservoir.percentile(p);
            assert!(current >= last, "p50={current} should be >= previous {last}");
            last = current;
        }
    }

    #[test]
    fn extremes_clamp_to_min_and_max() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(Arc::clone(&clock) as Arc<dyn Clock>);
        for v in [5, 15, 25, 35] {
            reservoir.add_value(v);
        }
        clock.advance(100);
        assert_eq!(reservoir.percentile(0.0), 5.0);
        assert_eq!(reservoir.percentile(100.0), 35.0);
    }

    #[test]
    fn empty_reservoir_reports_zero() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(Arc::clone(&clock) as Arc<dyn Clock>);
        assert_eq!(reservoir.percentile(50.0), 0.0);
        assert_eq!(reservoir.mean(), 0.0);
    }

    #[test]
    fn bucket_cap_overwrites_oldest_by_recency() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = RollingPercentile::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            600,
            6,
            3,
            Property::constant(true),
        );
        for v in 0..10 {
            reservoir.add_value(v);
        }
        clock.advance(100);
        // Only the last 3 writes (7, 8, 9) should survive in the open bucket.
        assert_eq!(reservoir.percentile(100.0), 9.0);
        assert_eq!(reservoir.percentile(0.0), 7.0);
    }
}
