// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the isolation primitives.

/// Failures surfaced by [`crate::IsolationFuture::get`].
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    /// The worker pool failed to spawn a named OS thread.
    #[error("failed to spawn worker thread {thread_name:?}")]
    ThreadSpawn {
        /// The name the thread would have had.
        thread_name: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },
    /// The submitted task's thread panicked instead of returning.
    #[error("worker thread panicked while running a submitted task")]
    WorkerPanicked,
    /// The future was cancelled before (or while) it ran.
    #[error("task was cancelled")]
    Cancelled,
    /// `get(Some(timeout))` elapsed before the task completed.
    #[error("task did not complete within the requested timeout")]
    TimedOut,
}
