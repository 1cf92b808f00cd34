// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for exercising the command runtime deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use vigil_config::CommandKey;

pub use vigil_config::testing::ManualClock;

use crate::command::Command;
use crate::error::{CommandError, RuntimeFailure};
use crate::hooks::CommandHooks;

/// Records every hook invocation, in order, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingHooks {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The events recorded so far, in call order.
    #[must_use]
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().push(event);
    }
}

impl<T> CommandHooks<T> for RecordingHooks {
    fn on_start(&self, _command: &CommandKey) {
        self.record("start");
    }
    fn on_thread_start(&self, _command: &CommandKey) {
        self.record("thread_start");
    }
    fn on_run_start(&self, _command: &CommandKey) {
        self.record("run_start");
    }
    fn on_run_success(&self, _command: &CommandKey, _value: &T) {
        self.record("run_success");
    }
    fn on_thread_complete(&self, _command: &CommandKey) {
        self.record("thread_complete");
    }
    fn on_fallback_start(&self, _command: &CommandKey) {
        self.record("fallback_start");
    }
    fn on_fallback_success(&self, _command: &CommandKey, _value: &T) {
        self.record("fallback_success");
    }
    fn on_fallback_error(&self, _command: &CommandKey, _error: &CommandError) {
        self.record("fallback_error");
    }
    fn on_complete(&self, _command: &CommandKey) {
        self.record("complete");
    }
}

/// What [`CountingCommand::run`] does when invoked.
pub enum CountingOutcome {
    /// `run()` returns this value.
    Success(u64),
    /// `run()` raises an ordinary (fallback-eligible) failure.
    Failure,
    /// `run()` raises a bad request.
    BadRequest,
}

/// The error [`CountingCommand`] raises for [`CountingOutcome::Failure`]
/// and [`CountingOutcome::BadRequest`].
#[derive(Debug, thiserror::Error)]
#[error("counting command failed")]
pub struct CountingError;

/// A toy [`Command`] whose behavior is scripted by the test: optionally
/// sleeps before returning, counts its own invocations, and can be made
/// to fail in any of the ways the runtime distinguishes.
pub struct CountingCommand {
    run_calls: AtomicUsize,
    fallback_calls: AtomicUsize,
    sleep_before_returning: Option<Duration>,
    outcome: CountingOutcome,
}

impl CountingCommand {
    /// A command that always produces `outcome`.
    #[must_use]
    pub fn new(outcome: CountingOutcome) -> Self {
        Self {
            run_calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
            sleep_before_returning: None,
            outcome,
        }
    }

    /// Sleeps for `delay` at the start of every `run()` call, for
    /// exercising timeout behavior.
    #[must_use]
    pub fn sleeping(mut self, delay: Duration) -> Self {
        self.sleep_before_returning = Some(delay);
        self
    }

    /// How many times `run()` has been called.
    #[must_use]
    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    /// How many times `fallback()` has been called.
    #[must_use]
    pub fn fallback_calls(&self) -> usize {
        self.fallback_calls.load(Ordering::SeqCst)
    }
}

impl Command for CountingCommand {
    type Output = u64;

    fn run(&self) -> Result<u64, CommandError> {
        let _ = self.run_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.sleep_before_returning {
            std::thread::sleep(delay);
        }
        match &self.outcome {
            CountingOutcome::Success(value) => Ok(*value),
            CountingOutcome::Failure => Err(CommandError::failed(CountingError)),
            CountingOutcome::BadRequest => Err(CommandError::bad_request(CountingError)),
        }
    }

    fn fallback(&self, _failure: &RuntimeFailure) -> Result<u64, CommandError> {
        let _ = self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}
