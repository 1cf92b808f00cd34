// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Public entry point: re-exports the command execution surface and adds
//! a small ergonomic builder over [`vigil_core::CommandRunner`] for
//! callers who don't need direct access to the per-crate APIs.

#![deny(unsafe_code)]

use std::sync::Arc;

pub use vigil_breaker::CircuitBreaker;
pub use vigil_config::{Clock, CommandKey, GroupKey, IsolationStrategy, PoolKey, PropertyDocument, PropertyOverrides, PropertyTable, SystemClock};
pub use vigil_core::{
    BadRequestFailure, BoxError, Command, CommandEntry, CommandError, CommandHooks, CommandRunner, ExecutionError, FallbackOutcome, NoopHooks,
    QueuedCommand, RequestContext, RuntimeFailure, RuntimeFailureKind, VigilContext,
};
pub use vigil_isolation::{IsolationError, IsolationFuture, IsolationPool, TryableSemaphore};
pub use vigil_metrics::{CommandMetrics, HealthCounts};

/// Builds a [`CommandRunner`] bound to a shared [`VigilContext`].
///
/// Most callers only ever need one context per process: build it once at
/// startup (optionally with [`VigilContext::with_document`] for loaded
/// configuration) and hand out a [`Registry`] wherever commands are
/// registered and dispatched from.
#[derive(Clone)]
pub struct Registry {
    ctx: Arc<VigilContext>,
}

impl Registry {
    /// Wraps an already-built context.
    #[must_use]
    pub fn new(ctx: Arc<VigilContext>) -> Self {
        Self { ctx }
    }

    /// A registry over a fresh context reading the system clock, with no
    /// loaded configuration document.
    #[must_use]
    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(VigilContext::with_system_clock()))
    }

    /// The underlying context, for callers that need direct access to
    /// [`VigilContext::command_entry`] or [`VigilContext::pool_for`].
    #[must_use]
    pub fn context(&self) -> &Arc<VigilContext> {
        &self.ctx
    }

    /// Starts a runner for `command` in `group`, sharing this registry's
    /// context.
    #[must_use]
    pub fn runner(&self, group: impl Into<GroupKey>, command: impl Into<CommandKey>) -> CommandRunner {
        CommandRunner::new(Arc::clone(&self.ctx), group.into(), command.into())
    }
}
