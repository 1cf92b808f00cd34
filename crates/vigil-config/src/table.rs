// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The resolved, per-command property table consulted on every dispatch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::keys::{CommandKey, GroupKey};
use crate::overrides::{PropertyDocument, PropertyOverrides, PropertyValue};

const ORDER: Ordering = Ordering::SeqCst;

/// Execution isolation strategy: thread-pool dispatch vs. a non-blocking
/// counting semaphore executed on the caller's own thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationStrategy {
    /// Dispatch `run()` onto a dedicated [`vigil_isolation`]-style worker pool.
    Thread,
    /// Run `run()` synchronously, gated by a non-blocking permit counter.
    Semaphore,
}

impl IsolationStrategy {
    fn as_u8(self) -> u8 {
        match self {
            IsolationStrategy::Thread => 0,
            IsolationStrategy::Semaphore => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => IsolationStrategy::Semaphore,
            _ => IsolationStrategy::Thread,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "thread" => Some(IsolationStrategy::Thread),
            "semaphore" => Some(IsolationStrategy::Semaphore),
            _ => None,
        }
    }
}

/// The resolved, dynamically-mutable property set for one `(GroupKey,
/// CommandKey)` pair. Every field is an atomic so that properties can be
/// read lock-free on the hot path and still be changed at runtime (e.g.
/// `circuitBreakerForceOpen`, or lowering `queueSizeRejectionThreshold`
/// below the queue's true capacity).
#[derive(Debug)]
pub struct PropertyTable {
    group: GroupKey,
    command: CommandKey,

    execution_isolation_strategy: AtomicU8,
    execution_isolation_thread_timeout_ms: AtomicU64,
    execution_isolation_thread_interrupt_on_timeout: AtomicBool,
    execution_isolation_semaphore_max_concurrent_requests: AtomicU32,
    fallback_isolation_semaphore_max_concurrent_requests: AtomicU32,
    fallback_enabled: AtomicBool,
    circuit_breaker_enabled: AtomicBool,
    circuit_breaker_request_volume_threshold: AtomicU64,
    circuit_breaker_error_threshold_percentage: AtomicU8,
    circuit_breaker_sleep_window_ms: AtomicU64,
    circuit_breaker_force_open: AtomicBool,
    circuit_breaker_force_closed: AtomicBool,
    metrics_rolling_statistical_window_ms: AtomicU64,
    metrics_rolling_statistical_window_buckets: AtomicUsize,
    metrics_rolling_percentile_window_ms: AtomicU64,
    metrics_rolling_percentile_window_buckets: AtomicUsize,
    metrics_rolling_percentile_bucket_size: AtomicUsize,
    metrics_rolling_percentile_enabled: AtomicBool,
    metrics_health_snapshot_interval_ms: AtomicU64,
    request_cache_enabled: AtomicBool,
    request_log_enabled: AtomicBool,
    pool_core_size: AtomicUsize,
    pool_max_queue_size: AtomicI64,
    pool_queue_size_rejection_threshold: AtomicUsize,
    pool_keep_alive_ms: AtomicU64,
}

macro_rules! accessor {
    ($get:ident, $set:ident, $field:ident, bool) => {
        /// Reads the current value.
        #[must_use]
        pub fn $get(&self) -> bool {
            self.$field.load(ORDER)
        }
        /// Overrides the value at runtime.
        pub fn $set(&self, value: bool) {
            self.$field.store(value, ORDER);
        }
    };
    ($get:ident, $set:ident, $field:ident, $repr:ty) => {
        /// Reads the current value.
        #[must_use]
        pub fn $get(&self) -> $repr {
            self.$field.load(ORDER)
        }
        /// Overrides the value at runtime.
        pub fn $set(&self, value: $repr) {
            self.$field.store(value, ORDER);
        }
    };
}

impl PropertyTable {
    /// The [`GroupKey`] this table was resolved for.
    #[must_use]
    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    /// The [`CommandKey`] this table was resolved for.
    #[must_use]
    pub fn command(&self) -> &CommandKey {
        &self.command
    }

    /// `executionIsolationStrategy`.
    #[must_use]
    pub fn execution_isolation_strategy(&self) -> IsolationStrategy {
        IsolationStrategy::from_u8(self.execution_isolation_strategy.load(ORDER))
    }

    /// Overrides `executionIsolationStrategy` at runtime.
    pub fn set_execution_isolation_strategy(&self, strategy: IsolationStrategy) {
        self.execution_isolation_strategy
            .store(strategy.as_u8(), ORDER);
    }

    accessor!(
        execution_isolation_thread_timeout_ms,
        set_execution_isolation_thread_timeout_ms,
        execution_isolation_thread_timeout_ms,
        u64
    );
    accessor!(
        execution_isolation_thread_interrupt_on_timeout,
        set_execution_isolation_thread_interrupt_on_timeout,
        execution_isolation_thread_interrupt_on_timeout,
        bool
    );
    accessor!(
        execution_isolation_semaphore_max_concurrent_requests,
        set_execution_isolation_semaphore_max_concurrent_requests,
        execution_isolation_semaphore_max_concurrent_requests,
        u32
    );
    accessor!(
        fallback_isolation_semaphore_max_concurrent_requests,
        set_fallback_isolation_semaphore_max_concurrent_requests,
        fallback_isolation_semaphore_max_concurrent_requests,
        u32
    );
    accessor!(fallback_enabled, set_fallback_enabled, fallback_enabled, bool);
    accessor!(
        circuit_breaker_enabled,
        set_circuit_breaker_enabled,
        circuit_breaker_enabled,
        bool
    );
    accessor!(
        circuit_breaker_request_volume_threshold,
        set_circuit_breaker_request_volume_threshold,
        circuit_breaker_request_volume_threshold,
        u64
    );
    accessor!(
        circuit_breaker_error_threshold_percentage,
        set_circuit_breaker_error_threshold_percentage,
        circuit_breaker_error_threshold_percentage,
        u8
    );
    accessor!(
        circuit_breaker_sleep_window_ms,
        set_circuit_breaker_sleep_window_ms,
        circuit_breaker_sleep_window_ms,
        u64
    );
    accessor!(
        circuit_breaker_force_open,
        set_circuit_breaker_force_open,
        circuit_breaker_force_open,
        bool
    );
    accessor!(
        circuit_breaker_force_closed,
        set_circuit_breaker_force_closed,
        circuit_breaker_force_closed,
        bool
    );
    accessor!(
        metrics_rolling_statistical_window_ms,
        set_metrics_rolling_statistical_window_ms,
        metrics_rolling_statistical_window_ms,
        u64
    );
    accessor!(
        metrics_rolling_statistical_window_buckets,
        set_metrics_rolling_statistical_window_buckets,
        metrics_rolling_statistical_window_buckets,
        usize
    );
    accessor!(
        metrics_rolling_percentile_window_ms,
        set_metrics_rolling_percentile_window_ms,
        metrics_rolling_percentile_window_ms,
        u64
    );
    accessor!(
        metrics_rolling_percentile_window_buckets,
        set_metrics_rolling_percentile_window_buckets,
        metrics_rolling_percentile_window_buckets,
        usize
    );
    accessor!(
        metrics_rolling_percentile_bucket_size,
        set_metrics_rolling_percentile_bucket_size,
        metrics_rolling_percentile_bucket_size,
        usize
    );
    accessor!(
        metrics_rolling_percentile_enabled,
        set_metrics_rolling_percentile_enabled,
        metrics_rolling_percentile_enabled,
        bool
    );
    accessor!(
        metrics_health_snapshot_interval_ms,
        set_metrics_health_snapshot_interval_ms,
        metrics_health_snapshot_interval_ms,
        u64
    );
    accessor!(
        request_cache_enabled,
        set_request_cache_enabled,
        request_cache_enabled,
        bool
    );
    accessor!(request_log_enabled, set_request_log_enabled, request_log_enabled, bool);
    accessor!(pool_core_size, set_pool_core_size, pool_core_size, usize);
    accessor!(pool_max_queue_size, set_pool_max_queue_size, pool_max_queue_size, i64);
    accessor!(
        pool_queue_size_rejection_threshold,
        set_pool_queue_size_rejection_threshold,
        pool_queue_size_rejection_threshold,
        usize
    );
    accessor!(pool_keep_alive_ms, set_pool_keep_alive_ms, pool_keep_alive_ms, u64);

    /// A point-in-time, dynamically-typed snapshot of every property, for
    /// diagnostics (the demo binary's health dump, or a debug endpoint).
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<&'static str, PropertyValue> {
        let mut map = BTreeMap::new();
        let _ = map.insert(
            "executionIsolationStrategy",
            PropertyValue::Text(match self.execution_isolation_strategy() {
                IsolationStrategy::Thread => "thread".to_owned(),
                IsolationStrategy::Semaphore => "semaphore".to_owned(),
            }),
        );
        let _ = map.insert(
            "executionIsolationThreadTimeout",
            PropertyValue::UInt(self.execution_isolation_thread_timeout_ms()),
        );
        let _ = map.insert(
            "circuitBreakerEnabled",
            PropertyValue::Bool(self.circuit_breaker_enabled()),
        );
        let _ = map.insert(
            "circuitBreakerRequestVolumeThreshold",
            PropertyValue::UInt(self.circuit_breaker_request_volume_threshold()),
        );
        let _ = map.insert(
            "circuitBreakerErrorThresholdPercentage",
            PropertyValue::UInt(u64::from(self.circuit_breaker_error_threshold_percentage())),
        );
        let _ = map.insert(
            "circuitBreakerSleepWindow",
            PropertyValue::UInt(self.circuit_breaker_sleep_window_ms()),
        );
        let _ = map.insert("poolCoreSize", PropertyValue::UInt(self.pool_core_size() as u64));
        let _ = map.insert("poolMaxQueueSize", PropertyValue::Int(self.pool_max_queue_size()));
        map
    }
}

/// Builds a [`PropertyTable`] for one `(GroupKey, CommandKey)` pair by
/// chaining, in order from most to least specific: an explicit per-call
/// override, a per-command document override, a per-group document
/// override, a document-wide default override, then this crate's hard
/// defaults. The first layer to set a given field wins.
#[derive(Debug, Clone, Default)]
pub struct PropertyTableBuilder {
    explicit: PropertyOverrides,
}

impl PropertyTableBuilder {
    /// Starts a builder with no explicit overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit, per-call override layer (the most specific layer).
    #[must_use]
    pub fn with_overrides(mut self, overrides: PropertyOverrides) -> Self {
        self.explicit = overrides;
        self
    }

    /// Resolves a [`PropertyTable`] for `(group, command)`, optionally
    /// consulting a loaded [`PropertyDocument`] for group/command/default
    /// layers.
    #[must_use]
    pub fn build(
        &self,
        group: GroupKey,
        command: CommandKey,
        document: Option<&PropertyDocument>,
    ) -> PropertyTable {
        let empty = PropertyOverrides::default();
        let command_layer = document
            .and_then(|doc| doc.command(command.as_str()))
            .unwrap_or(&empty);
        let group_layer = document
            .and_then(|doc| doc.group(group.as_str()))
            .unwrap_or(&empty);
        let default_layer = document.map(|doc| &doc.default).unwrap_or(&empty);

        macro_rules! resolve {
            ($field:ident) => {
                self.explicit
                    .$field
                    .clone()
                    .or_else(|| command_layer.$field.clone())
                    .or_else(|| group_layer.$field.clone())
                    .or_else(|| default_layer.$field.clone())
            };
        }

        let strategy = resolve!(execution_isolation_strategy)
            .and_then(|raw| IsolationStrategy::parse(&raw))
            .unwrap_or(IsolationStrategy::Thread);

        PropertyTable {
            group,
            command,
            execution_isolation_strategy: AtomicU8::new(strategy.as_u8()),
            execution_isolation_thread_timeout_ms: AtomicU64::new(
                resolve!(execution_isolation_thread_timeout_ms).unwrap_or(1_000),
            ),
            execution_isolation_thread_interrupt_on_timeout: AtomicBool::new(
                resolve!(execution_isolation_thread_interrupt_on_timeout).unwrap_or(true),
            ),
            execution_isolation_semaphore_max_concurrent_requests: AtomicU32::new(
                resolve!(execution_isolation_semaphore_max_concurrent_requests).unwrap_or(10),
            ),
            fallback_isolation_semaphore_max_concurrent_requests: AtomicU32::new(
                resolve!(fallback_isolation_semaphore_max_concurrent_requests).unwrap_or(10),
            ),
            fallback_enabled: AtomicBool::new(resolve!(fallback_enabled).unwrap_or(true)),
            circuit_breaker_enabled: AtomicBool::new(resolve!(circuit_breaker_enabled).unwrap_or(true)),
            circuit_breaker_request_volume_threshold: AtomicU64::new(
                resolve!(circuit_breaker_request_volume_threshold).unwrap_or(20),
            ),
            circuit_breaker_error_threshold_percentage: AtomicU8::new(
                resolve!(circuit_breaker_error_threshold_percentage).unwrap_or(50),
            ),
            circuit_breaker_sleep_window_ms: AtomicU64::new(
                resolve!(circuit_breaker_sleep_window_ms).unwrap_or(5_000),
            ),
            circuit_breaker_force_open: AtomicBool::new(
                resolve!(circuit_breaker_force_open).unwrap_or(false),
            ),
            circuit_breaker_force_closed: AtomicBool::new(
                resolve!(circuit_breaker_force_closed).unwrap_or(false),
            ),
            metrics_rolling_statistical_window_ms: AtomicU64::new(
                resolve!(metrics_rolling_statistical_window_ms).unwrap_or(10_000),
            ),
            metrics_rolling_statistical_window_buckets: AtomicUsize::new(
                resolve!(metrics_rolling_statistical_window_buckets).unwrap_or(10),
            ),
            metrics_rolling_percentile_window_ms: AtomicU64::new(
                resolve!(metrics_rolling_percentile_window_ms).unwrap_or(60_000),
            ),
            metrics_rolling_percentile_window_buckets: AtomicUsize::new(
                resolve!(metrics_rolling_percentile_window_buckets).unwrap_or(6),
            ),
            metrics_rolling_percentile_bucket_size: AtomicUsize::new(
                resolve!(metrics_rolling_percentile_bucket_size).unwrap_or(100),
            ),
            metrics_rolling_percentile_enabled: AtomicBool::new(
                resolve!(metrics_rolling_percentile_enabled).unwrap_or(true),
            ),
            metrics_health_snapshot_interval_ms: AtomicU64::new(
                resolve!(metrics_health_snapshot_interval_ms).unwrap_or(500),
            ),
            request_cache_enabled: AtomicBool::new(resolve!(request_cache_enabled).unwrap_or(true)),
            request_log_enabled: AtomicBool::new(resolve!(request_log_enabled).unwrap_or(true)),
            pool_core_size: AtomicUsize::new(resolve!(pool_core_size).unwrap_or(10)),
            pool_max_queue_size: AtomicI64::new(resolve!(pool_max_queue_size).unwrap_or(-1)),
            pool_queue_size_rejection_threshold: AtomicUsize::new(
                resolve!(pool_queue_size_rejection_threshold).unwrap_or(5),
            ),
            pool_keep_alive_ms: AtomicU64::new(resolve!(pool_keep_alive_ms).unwrap_or(60_000)),
        }
    }
}
