// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Monotonic clock abstraction.
//!
//! All windowed arithmetic in `vigil` is driven off an injected clock so
//! that rolling-window and circuit-breaker tests can advance time
//! deterministically instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A source of monotonic milliseconds.
///
/// Implementations must be monotonic (never go backwards) but need not be
/// wall-clock accurate; only relative deltas matter to the rolling-window
/// and circuit-breaker math.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since an arbitrary, implementation-defined epoch.
    fn now_millis(&self) -> u64;
}

/// The default [`Clock`], backed by [`std::time::Instant`].
#[derive(Debug, Default)]
pub struct SystemClock {
    start: OnceLock<Instant>,
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.start.get_or_init(Instant::now).elapsed().as_millis() as u64
    }
}

/// A hand-advanced clock for deterministic tests.
///
/// Mirrors the injected-mock-clock scenarios this library's rolling
/// window and circuit breaker invariants are specified against.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock starting at `0`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            millis: AtomicU64::new(0),
        }
    }

    /// Creates a clock starting at `start_millis`.
    #[must_use]
    pub fn starting_at(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Advances the clock by `delta_millis` and returns the new time.
    pub fn advance(&self, delta_millis: u64) -> u64 {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst) + delta_millis
    }

    /// Sets the clock to an absolute time. Must not move it backwards.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_monotonically() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_millis(), 0);
        assert_eq!(clock.advance(60), 60);
        assert_eq!(clock.now_millis(), 60);
    }

    #[test]
    fn system_clock_never_goes_backwards() {
        let clock = SystemClock::default();
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }
}
