// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The command authoring contract.

use crate::error::{CommandError, RuntimeFailure};

/// A single unit of work wrapping a fallible dependency call.
///
/// The only required method is [`Command::run`]. A minimal command is
/// one method; [`Command::fallback`] and [`Command::cache_key`] default
/// to "no fallback" and "never cache".
pub trait Command: Send + Sync + 'static {
    /// The value `run`/`fallback` produce. Cloned on a cache hit, so a
    /// command that enables caching should keep this cheap to clone
    /// (wrap a heavy payload in an `Arc` rather than cloning it outright).
    type Output: Clone + Send + 'static;

    /// Calls the wrapped dependency.
    ///
    /// Runs on a worker thread under thread isolation, or on the
    /// dispatching thread under semaphore isolation.
    ///
    /// # Errors
    ///
    /// Return [`CommandError::bad_request`] for input the caller should
    /// not retry or fall back on. Any other error is treated as an
    /// infrastructure failure and triggers [`Command::fallback`].
    fn run(&self) -> Result<Self::Output, CommandError>;

    /// Recovers from any [`Command::run`] failure other than a bad
    /// request. `failure` describes what triggered the call: a run
    /// failure, a timeout, a short circuit, or a rejection.
    ///
    /// The default raises [`CommandError::no_fallback`].
    ///
    /// # Errors
    ///
    /// Propagates whatever error the recovery attempt itself produces.
    fn fallback(&self, _failure: &RuntimeFailure) -> Result<Self::Output, CommandError> {
        Err(CommandError::no_fallback())
    }

    /// A key identifying this call's result for request-scoped caching.
    /// `None` (the default) disables caching for this invocation; the
    /// request cache is also off entirely unless the command's
    /// `requestCacheEnabled` property is set.
    fn cache_key(&self) -> Option<String> {
        None
    }
}
