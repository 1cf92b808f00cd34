// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! A point-in-time health summary derived from a rolling event window.

use crate::rolling_number::{RollingEvent, RollingNumber};

/// Total/error counts and error percentage over a command's rolling
/// window, as seen at the moment [`HealthCounts::capture`] was called.
///
/// Bad-request failures never reach a [`RollingNumber`] at all (they
/// bypass the breaker and metrics entirely), so they never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCounts {
    total_requests: u64,
    error_count: u64,
}

impl HealthCounts {
    /// Builds a snapshot from the given rolling number's current window.
    #[must_use]
    pub fn capture(rolling: &RollingNumber) -> Self {
        let success = rolling.rolling_sum(RollingEvent::Success) as u64;
        let failure = rolling.rolling_sum(RollingEvent::Failure) as u64;
        let timeout = rolling.rolling_sum(RollingEvent::Timeout) as u64;
        let thread_pool_rejected = rolling.rolling_sum(RollingEvent::ThreadPoolRejected) as u64;
        let semaphore_rejected = rolling.rolling_sum(RollingEvent::SemaphoreRejected) as u64;
        let short_circuited = rolling.rolling_sum(RollingEvent::ShortCircuited) as u64;

        let error_count = failure + timeout + thread_pool_rejected + semaphore_rejected + short_circuited;
        let total_requests = success + error_count;

        Self {
            total_requests,
            error_count,
        }
    }

    /// An all-zero snapshot, used before the first metrics capture runs.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            total_requests: 0,
            error_count: 0,
        }
    }

    /// Total requests in the window that count toward the error percentage.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Requests counted as errors (failure, timeout, both rejection kinds, short-circuit).
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// `100 * error_count / total_requests`, or `0.0` when there were no requests.
    #[must_use]
    pub fn error_percentage(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            100.0 * self.error_count as f64 / self.total_requests as f64
        }
    }
}
