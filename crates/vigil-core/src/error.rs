// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types raised by a command dispatch: the bad-request bypass, the
//! general runtime-failure envelope, and the two ways a fallback attempt
//! itself can come up empty.

use std::fmt;
use std::sync::Arc;

use vigil_config::{CommandKey, GroupKey};

/// A type-erased, cheaply-clonable source error.
///
/// `Arc` rather than `Box` so that [`CommandError`] — and everything
/// that wraps it, up through [`ExecutionError`] — stays [`Clone`],
/// which request-scoped caching and [`crate::QueuedCommand`] both rely
/// on to hand the same outcome to more than one waiter.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// The only error type [`crate::Command::run`] and
/// [`crate::Command::fallback`] return.
///
/// [`CommandError::bad_request`] is the single case the runtime never
/// retries, never falls back on, and never counts against a command's
/// error rate; everything else is an infrastructure failure that
/// triggers [`crate::Command::fallback`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    /// Input the caller should not retry — propagates as a
    /// [`BadRequestFailure`] with no fallback attempt.
    #[error("bad request: {0}")]
    BadRequest(BoxError),
    /// Any other failure of the wrapped dependency.
    #[error("command failed: {0}")]
    Failed(BoxError),
    /// Raised by the default [`crate::Command::fallback`] implementation.
    #[error("no fallback implemented for this command")]
    NoFallback,
}

impl CommandError {
    /// Wraps `error` as a bad request: never falls back, never affects
    /// the circuit breaker or rolling error counts.
    pub fn bad_request<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BadRequest(Arc::new(error))
    }

    /// Wraps `error` as an ordinary command failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }

    /// The error a command with no fallback raises from it.
    #[must_use]
    pub fn no_fallback() -> Self {
        Self::NoFallback
    }

    /// `true` for the bad-request bypass.
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }
}

/// Why a [`RuntimeFailure`] was raised, independent of whether a
/// fallback then recovered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFailureKind {
    /// `run()` returned an error other than a bad request.
    CommandException,
    /// The run did not complete within the configured timeout.
    Timeout,
    /// The circuit breaker refused admission.
    ShortCircuit,
    /// The thread pool's queue had no space for this call.
    RejectedThreadExecution,
    /// The execution semaphore had no permit available.
    RejectedSemaphoreExecution,
    /// The fallback semaphore had no permit available.
    ///
    /// Distinct from [`FallbackOutcome::RejectedSemaphoreFallback`]: this
    /// variant names *why the run itself failed* when the run failure and
    /// the fallback rejection are the same event (a command with no
    /// execution path at all, e.g. a rejected fallback with nothing to
    /// fall further back on); the latter records what the *fallback
    /// attempt* ran into. They are never folded into one type.
    RejectedSemaphoreFallback,
}

impl fmt::Display for RuntimeFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CommandException => "command exception",
            Self::Timeout => "timeout",
            Self::ShortCircuit => "short circuit",
            Self::RejectedThreadExecution => "rejected thread execution",
            Self::RejectedSemaphoreExecution => "rejected semaphore execution",
            Self::RejectedSemaphoreFallback => "rejected semaphore fallback",
        };
        f.write_str(label)
    }
}

/// What happened when the runtime tried to recover a [`RuntimeFailure`]
/// with [`crate::Command::fallback`].
#[derive(Debug, Clone)]
pub enum FallbackOutcome {
    /// `fallbackEnabled` is `false` for this command.
    Disabled,
    /// The fallback semaphore had no permit available.
    RejectedSemaphoreFallback,
    /// The fallback itself raised an error.
    Failed(CommandError),
}

/// The error surfaced by a failed, non-bad-request command dispatch.
///
/// Carries both the original cause (if the state machine reached `RUN`
/// at all) and, when a fallback was attempted, what became of it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} in command {command} (group {group})")]
pub struct RuntimeFailure {
    /// The command's group.
    pub group: GroupKey,
    /// The command's key.
    pub command: CommandKey,
    /// The failure mode that triggered fallback.
    pub kind: RuntimeFailureKind,
    /// The error `run()` raised, if the state machine got that far.
    pub cause: Option<CommandError>,
    /// What the fallback attempt produced, if one was attempted.
    pub fallback: Option<FallbackOutcome>,
}

/// The error surfaced when [`crate::Command::run`] raises
/// [`CommandError::bad_request`].
///
/// Bypasses fallback entirely and never touches the circuit breaker or
/// rolling error counts — the sole exception class the state machine
/// treats this way.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bad request in command {command} (group {group}): {cause}")]
pub struct BadRequestFailure {
    /// The command's group.
    pub group: GroupKey,
    /// The command's key.
    pub command: CommandKey,
    /// The bad-request error `run()` raised.
    pub cause: CommandError,
}

/// Everything [`crate::CommandRunner::execute`] can return on failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    /// An infrastructure failure, possibly recovered by fallback.
    #[error(transparent)]
    Runtime(#[from] RuntimeFailure),
    /// `run()` raised [`CommandError::bad_request`].
    #[error(transparent)]
    BadRequest(#[from] BadRequestFailure),
}
