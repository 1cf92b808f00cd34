// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The circuit breaker: closed/open/half-open decisions driven entirely
//! by a command's rolling [`vigil_metrics::HealthCounts`].
//!
//! There is no separate breaker-state poller: every call to
//! [`CircuitBreaker::allow_request`] or [`CircuitBreaker::is_open`]
//! re-evaluates health on the spot, so the breaker's state is always as
//! fresh as the metrics snapshot it reads (itself gated by
//! `healthSnapshotInterval`).

#![deny(unsafe_code)]

mod breaker;

pub use breaker::CircuitBreaker;
