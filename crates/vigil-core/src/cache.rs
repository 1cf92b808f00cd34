// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Request-scoped result memoization.
//!
//! A command's `requestCacheEnabled` property and non-empty
//! [`crate::Command::cache_key`] together decide whether a call is
//! memoized; the scope of that memoization — how long results live, and
//! which calls share a cache — is this [`RequestContext`], which the
//! caller constructs and drops around whatever "one request" means to
//! them. Nothing here is thread-local: the context is an explicit value
//! passed to [`crate::CommandRunner::execute`], so a task handed off to a
//! worker pool carries it along rather than needing to restore an
//! ambient per-thread slot.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};

enum Slot<R> {
    Pending,
    Ready(R),
}

/// A single cache line: the first caller to reserve a key computes the
/// result and publishes it here; every concurrent caller for the same
/// key blocks on the same slot instead of recomputing.
pub(crate) struct CacheSlot<R> {
    state: Mutex<Slot<R>>,
    ready: Condvar,
}

impl<R: Clone> CacheSlot<R> {
    fn pending() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        })
    }

    pub(crate) fn publish(&self, result: R) {
        *self.state.lock() = Slot::Ready(result);
        self.ready.notify_all();
    }

    pub(crate) fn wait(&self) -> R {
        let mut state = self.state.lock();
        loop {
            match &*state {
                Slot::Ready(result) => return result.clone(),
                Slot::Pending => self.ready.wait(&mut state),
            }
        }
    }
}

/// A keyed map of in-flight and completed command results, scoped to
/// whatever the caller considers "one request".
#[derive(Default)]
pub struct RequestContext {
    entries: Mutex<AHashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext").finish_non_exhaustive()
    }
}

impl RequestContext {
    /// An empty request scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `key`, creating it if absent.
    ///
    /// The `bool` is `true` when this call created the slot — the
    /// caller that sees `true` owns computing the result and must
    /// eventually call [`CacheSlot::publish`]; every other caller sees
    /// `false` and should block on [`CacheSlot::wait`] instead.
    pub(crate) fn slot_for<R>(&self, key: &str) -> (Arc<CacheSlot<R>>, bool)
    where
        R: Clone + Send + Sync + 'static,
    {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            if let Ok(slot) = Arc::clone(existing).downcast::<CacheSlot<R>>() {
                return (slot, false);
            }
        }
        let slot = CacheSlot::<R>::pending();
        let _ = entries.insert(key.to_owned(), Arc::clone(&slot) as Arc<dyn Any + Send + Sync>);
        (slot, true)
    }
}
