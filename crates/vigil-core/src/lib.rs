// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The command execution state machine: cache lookup, circuit check,
//! bulkhead dispatch, timed run, and fallback, wired against
//! `vigil-config`'s resolved properties, `vigil-metrics`'s rolling
//! counters, `vigil-breaker`'s circuit breaker, and
//! `vigil-isolation`'s worker pools and semaphores.

#![deny(unsafe_code)]

mod cache;
mod command;
mod context;
mod error;
mod future;
mod hooks;
mod runtime;

pub use cache::RequestContext;
pub use command::Command;
pub use context::{CommandEntry, VigilContext};
pub use error::{BadRequestFailure, BoxError, CommandError, ExecutionError, FallbackOutcome, RuntimeFailure, RuntimeFailureKind};
pub use future::QueuedCommand;
pub use hooks::{CommandHooks, NoopHooks};
pub use runtime::CommandRunner;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
