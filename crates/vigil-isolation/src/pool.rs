// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! A fixed-size worker pool with a bounded queue and an admission predicate.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use vigil_config::{PoolKey, Property};

use crate::error::IsolationError;

type Task = Box<dyn FnOnce() + Send>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
    queue_depth: AtomicUsize,
    active_count: AtomicUsize,
    shutdown: AtomicBool,
    core_size: usize,
    max_queue_size: i64,
    queue_size_rejection_threshold: Property<usize>,
    keep_alive: Property<u64>,
}

/// A fixed-size pool of named OS threads dispatching boxed work items
/// off a shared, bounded-by-policy queue.
///
/// The physical queue has no hard cap when `max_queue_size < 0`
/// (treated as unbounded, i.e. a synchronous-handoff style queue is not
/// modeled); [`IsolationPool::is_queue_space_available`] is the actual
/// admission gate callers are expected to consult before
/// [`IsolationPool::submit`], and it can be tightened at runtime via
/// `queue_size_rejection_threshold` independent of the physical cap.
pub struct IsolationPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    pool_key: PoolKey,
}

impl std::fmt::Debug for IsolationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationPool")
            .field("pool_key", &self.pool_key)
            .field("core_size", &self.shared.core_size)
            .field("active_count", &self.current_active_count())
            .field("queue_size", &self.current_queue_size())
            .finish()
    }
}

impl IsolationPool {
    /// Spawns `core_size` named worker threads (`"<pool-key>-worker-<n>"`)
    /// that block on the shared queue until work arrives or the pool is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError::ThreadSpawn`] if the OS refuses to spawn
    /// one of the worker threads; already-spawned workers are shut down
    /// before the error is returned.
    pub fn new(
        pool_key: PoolKey,
        core_size: usize,
        max_queue_size: i64,
        queue_size_rejection_threshold: Property<usize>,
        keep_alive: Property<u64>,
    ) -> Result<Self, IsolationError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            queue_depth: AtomicUsize::new(0),
            active_count: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            core_size,
            max_queue_size,
            queue_size_rejection_threshold,
            keep_alive,
        });

        let mut workers = Vec::with_capacity(core_size);
        for index in 0..core_size {
            let thread_name = format!("{}-worker-{index}", pool_key.as_str());
            let worker_shared = Arc::clone(&shared);
            let worker_thread_name = thread_name.clone();
            let spawned = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(worker_shared, worker_thread_name));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    tracing::warn!(pool = pool_key.as_str(), %thread_name, %source, "failed to spawn worker thread");
                    shared.shutdown.store(true, Ordering::SeqCst);
                    shared.not_empty.notify_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(IsolationError::ThreadSpawn { thread_name, source });
                }
            }
        }

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            pool_key,
        })
    }

    /// The pool's key.
    #[must_use]
    pub fn pool_key(&self) -> &PoolKey {
        &self.pool_key
    }

    /// `true` iff a unit of work may be queued right now: either the
    /// physical queue is unbounded (`max_queue_size < 0`) or the current
    /// depth is below the dynamic rejection threshold.
    #[must_use]
    pub fn is_queue_space_available(&self) -> bool {
        self.shared.max_queue_size < 0
            || (self.shared.queue_depth.load(Ordering::SeqCst) as i64)
                < self.shared.queue_size_rejection_threshold.get_or(5) as i64
    }

    /// Enqueues `task`, returning a future handle. Callers are expected
    /// to have already checked [`IsolationPool::is_queue_space_available`];
    /// `submit` itself never rejects.
    pub fn submit<F, T>(&self, task: F) -> IsolationFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::new(FutureInner {
            slot: Mutex::new(FutureSlot::Pending),
            ready: Condvar::new(),
            cancelled: AtomicBool::new(false),
        });
        let future_inner = Arc::clone(&inner);

        let boxed: Task = Box::new(move || {
            if future_inner.cancelled.load(Ordering::SeqCst) {
                *future_inner.slot.lock() = FutureSlot::Cancelled;
                future_inner.ready.notify_all();
                return;
            }
            let outcome = catch_unwind(AssertUnwindSafe(task));
            let mut slot = future_inner.slot.lock();
            *slot = match outcome {
                Ok(value) => FutureSlot::Ready(value),
                Err(_) => {
                    tracing::warn!("submitted task panicked inside isolation pool worker");
                    FutureSlot::Panicked
                }
            };
            future_inner.ready.notify_all();
        });

        let _ = self.shared.queue_depth.fetch_add(1, Ordering::SeqCst);
        self.shared.queue.lock().push_back(boxed);
        self.shared.not_empty.notify_one();

        IsolationFuture { inner }
    }

    /// Number of units of work currently executing.
    #[must_use]
    pub fn current_active_count(&self) -> usize {
        self.shared.active_count.load(Ordering::SeqCst)
    }

    /// The fixed number of worker threads this pool was created with.
    #[must_use]
    pub fn current_pool_size(&self) -> usize {
        self.shared.core_size
    }

    /// Number of units of work currently queued, not yet dispatched.
    #[must_use]
    pub fn current_queue_size(&self) -> usize {
        self.shared.queue_depth.load(Ordering::SeqCst)
    }
}

impl Drop for IsolationPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.not_empty.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, thread_name: String) {
    loop {
        let mut queue = shared.queue.lock();
        while queue.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
            let keep_alive = Duration::from_millis(shared.keep_alive.get_or(60_000));
            let timed_out = shared.not_empty.wait_for(&mut queue, keep_alive).timed_out();
            if timed_out && queue.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
                tracing::trace!(worker = %thread_name, idle_ms = keep_alive.as_millis() as u64, "worker idle past keepAlive, core pool does not shrink");
            }
        }
        let Some(task) = queue.pop_front() else {
            // Queue is empty and shutdown was requested.
            return;
        };
        drop(queue);
        let _ = shared.queue_depth.fetch_sub(1, Ordering::SeqCst);

        let _ = shared.active_count.fetch_add(1, Ordering::SeqCst);
        task();
        let _ = shared.active_count.fetch_sub(1, Ordering::SeqCst);
    }
}

enum FutureSlot<T> {
    Pending,
    Ready(T),
    Panicked,
    Cancelled,
}

struct FutureInner<T> {
    slot: Mutex<FutureSlot<T>>,
    ready: Condvar,
    cancelled: AtomicBool,
}

/// A handle to a unit of work submitted to an [`IsolationPool`].
pub struct IsolationFuture<T> {
    inner: Arc<FutureInner<T>>,
}

impl<T> IsolationFuture<T> {
    /// Cooperatively cancels the task. If it has not yet started
    /// running, the worker will skip it entirely; if it is already
    /// running, this has no effect unless the task itself observes
    /// [`IsolationFuture::is_cancelled`] — cancellation here is a flag,
    /// not a forced interrupt.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the task has reached a terminal state (ready, panicked, or cancelled).
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(*self.inner.slot.lock(), FutureSlot::Pending)
    }

    /// Blocks for the result, up to `timeout` if given.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError::Cancelled`] if the task was cancelled
    /// before running, [`IsolationError::WorkerPanicked`] if it
    /// panicked, or [`IsolationError::TimedOut`] if `timeout` elapsed
    /// first.
    pub fn get(&self, timeout: Option<Duration>) -> Result<T, IsolationError> {
        let mut slot = self.inner.slot.lock();
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            match &*slot {
                FutureSlot::Ready(_) => {
                    let FutureSlot::Ready(value) = std::mem::replace(&mut *slot, FutureSlot::Cancelled) else {
                        unreachable!()
                    };
                    return Ok(value);
                }
                FutureSlot::Panicked => return Err(IsolationError::WorkerPanicked),
                FutureSlot::Cancelled => return Err(IsolationError::Cancelled),
                FutureSlot::Pending => {}
            }
            match deadline {
                None => self.inner.ready.wait(&mut slot),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(IsolationError::TimedOut);
                    }
                    let timed_out = self.inner.ready.wait_for(&mut slot, deadline - now).timed_out();
                    if timed_out && matches!(*slot, FutureSlot::Pending) {
                        return Err(IsolationError::TimedOut);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn pool(core_size: usize, max_queue_size: i64, threshold: usize) -> IsolationPool {
        IsolationPool::new(
            PoolKey::new("test-pool"),
            core_size,
            max_queue_size,
            Property::constant(threshold),
            Property::constant(60_000),
        )
        .expect("spawn worker pool")
    }

    #[test]
    fn submitted_task_runs_and_returns_its_value() {
        let pool = pool(2, -1, 5);
        let future = pool.submit(|| 40 + 2);
        assert_eq!(future.get(Some(Duration::from_secs(1))).unwrap(), 42);
    }

    #[test]
    fn queue_space_available_respects_dynamic_threshold() {
        let pool = pool(0, 100, 2);
        assert!(pool.is_queue_space_available());
        let _f1 = pool.submit(|| ());
        let _f2 = pool.submit(|| ());
        assert!(!pool.is_queue_space_available());
    }

    #[test]
    fn negative_max_queue_size_always_admits() {
        let pool = pool(0, -1, 0);
        assert!(pool.is_queue_space_available());
    }

    #[test]
    fn a_worker_idle_past_keep_alive_keeps_serving_work() {
        let pool = IsolationPool::new(
            PoolKey::new("keepalive-pool"),
            1,
            -1,
            Property::constant(5),
            Property::constant(10),
        )
        .expect("spawn worker pool");

        std::thread::sleep(Duration::from_millis(40));
        let future = pool.submit(|| 1 + 1);
        assert_eq!(future.get(Some(Duration::from_secs(1))).unwrap(), 2);
    }

    #[test]
    fn active_count_tracks_in_flight_work() {
        use std::sync::{Arc, Barrier};
        let pool = pool(1, -1, 5);
        let barrier = Arc::new(Barrier::new(2));
        let worker_barrier = Arc::clone(&barrier);
        let future = pool.submit(move || {
            worker_barrier.wait();
            std::thread::sleep(Duration::from_millis(20));
        });
        barrier.wait();
        assert_eq!(pool.current_active_count(), 1);
        future.get(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(pool.current_active_count(), 0);
    }

    #[test]
    fn cancelling_before_dispatch_short_circuits_the_task() {
        use std::sync::Barrier;

        let ran = Arc::new(AtomicU32::new(0));
        let pool = pool(1, -1, 5);

        // Occupy the single worker so the next submission is guaranteed
        // to still be queued (not yet dequeued) when we cancel it.
        let barrier = Arc::new(Barrier::new(2));
        let holder_barrier = Arc::clone(&barrier);
        let holder = pool.submit(move || {
            holder_barrier.wait();
        });

        let ran_for_task = Arc::clone(&ran);
        let cancel_me = pool.submit(move || {
            let _ = ran_for_task.fetch_add(1, Ordering::SeqCst);
        });
        cancel_me.cancel();

        barrier.wait();
        holder.get(Some(Duration::from_secs(1))).unwrap();

        assert!(matches!(
            cancel_me.get(Some(Duration::from_secs(1))),
            Err(IsolationError::Cancelled)
        ));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn get_times_out_when_nothing_consumes_the_queue() {
        let pool = pool(0, -1, 5);
        let future = pool.submit(|| 1);
        let result = future.get(Some(Duration::from_millis(30)));
        assert!(matches!(result, Err(IsolationError::TimedOut)));
    }

    #[test]
    fn pool_size_reports_configured_core_size() {
        let pool = pool(3, -1, 5);
        assert_eq!(pool.current_pool_size(), 3);
    }
}
