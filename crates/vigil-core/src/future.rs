// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The handle returned by [`crate::CommandRunner::queue`].
//!
//! Shaped after `vigil_isolation::IsolationFuture`'s slot-plus-condvar
//! future, but backed by a dedicated one-shot thread rather than a pool
//! worker: `queue()` is explicitly out of scope for reusing the
//! command's own isolation pool (a thread-isolated command dispatching
//! its own `execute()` onto its own pool from inside that pool's worker
//! would deadlock it), so a single ad hoc thread plays the same role a
//! pool worker plays for [`crate::CommandRunner::execute`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

enum Slot<T> {
    Pending,
    Ready(T),
    Taken,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// A non-blocking-to-create handle to a command dispatched via
/// [`crate::CommandRunner::queue`].
pub struct QueuedCommand<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> QueuedCommand<T> {
    pub(crate) fn spawn(thread_name: String, work: impl FnOnce() -> T + Send + 'static) -> Self {
        let inner = Arc::new(Inner {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        });
        let worker_inner = Arc::clone(&inner);
        let spawned = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let value = work();
                *worker_inner.slot.lock() = Slot::Ready(value);
                worker_inner.ready.notify_all();
            });
        if let Err(source) = spawned {
            tracing::warn!(thread_name, %source, "failed to spawn queued-command dispatch thread");
        }
        Self { inner }
    }

    /// `true` once the result is ready to be taken.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(*self.inner.slot.lock(), Slot::Pending)
    }

    /// Blocks until the result is ready (or `timeout` elapses), then
    /// takes it. Returns `None` on timeout or if already taken.
    ///
    /// Matches [`vigil_isolation::IsolationFuture::get`]'s single-read
    /// semantics: the value is moved out, not cloned, so a second call
    /// sees nothing left to take.
    pub fn get(&self, timeout: Option<Duration>) -> Option<T> {
        let mut slot = self.inner.slot.lock();
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if matches!(*slot, Slot::Ready(_)) {
                let Slot::Ready(value) = std::mem::replace(&mut *slot, Slot::Taken) else {
                    unreachable!("just matched Ready above")
                };
                return Some(value);
            }
            if matches!(*slot, Slot::Taken) {
                return None;
            }
            match deadline {
                None => self.inner.ready.wait(&mut slot),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let _ = self.inner.ready.wait_for(&mut slot, deadline - now);
                }
            }
        }
    }
}
