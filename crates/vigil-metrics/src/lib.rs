// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Rolling counters and percentile reservoirs backing command health.
//!
//! Two lock-light bucketed engines feed [`CommandMetrics`]: a
//! [`RollingNumber`] of event counters/max-updaters over a short window,
//! and two [`RollingPercentile`] latency reservoirs over a longer one. The
//! write path never blocks a reader: at most one writer advances a
//! bucket ring at a time, and a reader that loses the race to do so
//! simply returns the pre-rotation view.

#![deny(unsafe_code)]

mod command_metrics;
mod health;
mod rolling_number;
mod rolling_percentile;

pub use command_metrics::{CommandMetrics, CommandMetricsConfig};
pub use health::HealthCounts;
pub use rolling_number::{RollingEvent, RollingNumber};
pub use rolling_percentile::RollingPercentile;
