// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Bulkhead isolation primitives: a non-blocking counting semaphore and a
//! fixed-size worker pool with a bounded, runtime-adjustable admission
//! threshold.
//!
//! Neither primitive ever blocks a caller on contention: a semaphore
//! acquire either succeeds immediately or fails immediately, and a pool
//! submission either has queue space right now or it doesn't. Backoff
//! and retry are the caller's responsibility (in this workspace, the
//! command runtime's fallback path).

#![deny(unsafe_code)]

mod error;
mod pool;
mod semaphore;

pub use error::IsolationError;
pub use pool::{IsolationFuture, IsolationPool};
pub use semaphore::TryableSemaphore;
