// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! A non-blocking counting permit with dynamically-readable capacity.

use std::sync::atomic::{AtomicU32, Ordering};

use vigil_config::Property;

/// A non-blocking counting semaphore. `try_acquire` never blocks: it
/// speculatively increments the in-use counter, then rolls back if the
/// post-increment value exceeds capacity. Capacity is re-read from a
/// [`Property`] on every call, so lowering it at runtime takes effect
/// immediately without resizing anything.
///
/// Double-releasing (or releasing without a matching acquire) is a
/// programmer error; callers must pair every successful `try_acquire`
/// with exactly one `release` on every exit path, including panics.
#[derive(Debug)]
pub struct TryableSemaphore {
    capacity: Property<u32>,
    default_capacity: u32,
    in_use: AtomicU32,
}

impl TryableSemaphore {
    /// Creates a semaphore whose capacity is read from `capacity`,
    /// falling back to `default_capacity` if the property yields
    /// nothing.
    #[must_use]
    pub fn new(capacity: Property<u32>, default_capacity: u32) -> Self {
        Self {
            capacity,
            default_capacity,
            in_use: AtomicU32::new(0),
        }
    }

    /// Attempts to acquire one permit. Never blocks.
    pub fn try_acquire(&self) -> bool {
        let capacity = self.capacity.get_or(self.default_capacity);
        let post = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        if post > capacity {
            let _ = self.in_use.fetch_sub(1, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    /// Releases one permit previously obtained via a successful `try_acquire`.
    pub fn release(&self) {
        let _ = self.in_use.fetch_sub(1, Ordering::SeqCst);
    }

    /// The number of permits currently checked out.
    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.in_use.load(Ordering::SeqCst)
    }
}
