// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Observation points threaded through every state of a dispatch,
//! mirroring the command-lifecycle listener shape this workspace uses
//! for pipeline processor events, specialized to the states a command
//! invocation actually passes through.

use vigil_config::CommandKey;

use crate::error::CommandError;

/// Observes one command invocation as it moves through the state
/// machine. Every method defaults to a no-op, so implementers only
/// override the events they care about.
pub trait CommandHooks<T>: Send + Sync {
    /// The invocation was accepted (before cache lookup).
    fn on_start(&self, _command: &CommandKey) {}
    /// A thread-isolated run was dispatched to a worker.
    fn on_thread_start(&self, _command: &CommandKey) {}
    /// `run()` is about to be called.
    fn on_run_start(&self, _command: &CommandKey) {}
    /// `run()` returned successfully.
    fn on_run_success(&self, _command: &CommandKey, _value: &T) {}
    /// A thread-isolated run's worker task is about to return.
    fn on_thread_complete(&self, _command: &CommandKey) {}
    /// `fallback()` is about to be called.
    fn on_fallback_start(&self, _command: &CommandKey) {}
    /// `fallback()` returned successfully.
    fn on_fallback_success(&self, _command: &CommandKey, _value: &T) {}
    /// `fallback()` itself raised an error.
    fn on_fallback_error(&self, _command: &CommandKey, _error: &CommandError) {}
    /// The invocation reached a terminal state.
    fn on_complete(&self, _command: &CommandKey) {}
}

/// The default, silent [`CommandHooks`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl<T> CommandHooks<T> for NoopHooks {}
