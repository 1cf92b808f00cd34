// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Serializable property overrides, loaded from an optional JSON/YAML document.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The dynamically-typed rendering of a single resolved property, used for
/// diagnostics (e.g. dumping a [`crate::PropertyTable`]'s current state)
/// and as the value type of the override maps loaded from a
/// [`PropertyDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A boolean flag.
    Bool(bool),
    /// An unsigned integer (durations, counts, thresholds).
    UInt(u64),
    /// A signed integer (only `pool.maxQueueSize`, which uses `-1` as a sentinel).
    Int(i64),
    /// A short enum-like string, e.g. an isolation strategy name.
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::UInt(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One partial, overridable slice of the recognized property set from the
/// command authoring contract. Every field is optional: `None` means "not
/// overridden at this layer", letting [`crate::PropertyTable`] chain
/// default < group < command < builder per spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PropertyOverrides {
    /// `executionIsolationStrategy`: `"thread"` or `"semaphore"`.
    pub execution_isolation_strategy: Option<String>,
    /// `executionIsolationThreadTimeout`, in milliseconds.
    pub execution_isolation_thread_timeout_ms: Option<u64>,
    /// `executionIsolationThreadInterruptOnTimeout`.
    pub execution_isolation_thread_interrupt_on_timeout: Option<bool>,
    /// `executionIsolationSemaphoreMaxConcurrentRequests`.
    pub execution_isolation_semaphore_max_concurrent_requests: Option<u32>,
    /// `fallbackIsolationSemaphoreMaxConcurrentRequests`.
    pub fallback_isolation_semaphore_max_concurrent_requests: Option<u32>,
    /// `fallbackEnabled`.
    pub fallback_enabled: Option<bool>,
    /// `circuitBreakerEnabled`.
    pub circuit_breaker_enabled: Option<bool>,
    /// `circuitBreakerRequestVolumeThreshold`.
    pub circuit_breaker_request_volume_threshold: Option<u64>,
    /// `circuitBreakerErrorThresholdPercentage`.
    pub circuit_breaker_error_threshold_percentage: Option<u8>,
    /// `circuitBreakerSleepWindow`, in milliseconds.
    pub circuit_breaker_sleep_window_ms: Option<u64>,
    /// `circuitBreakerForceOpen`.
    pub circuit_breaker_force_open: Option<bool>,
    /// `circuitBreakerForceClosed`.
    pub circuit_breaker_force_closed: Option<bool>,
    /// `metricsRollingStatisticalWindow`, in milliseconds.
    pub metrics_rolling_statistical_window_ms: Option<u64>,
    /// `metricsRollingStatisticalWindowBuckets`.
    pub metrics_rolling_statistical_window_buckets: Option<usize>,
    /// `metricsRollingPercentileWindow`, in milliseconds.
    pub metrics_rolling_percentile_window_ms: Option<u64>,
    /// `metricsRollingPercentileWindowBuckets`.
    pub metrics_rolling_percentile_window_buckets: Option<usize>,
    /// `metricsRollingPercentileBucketSize`.
    pub metrics_rolling_percentile_bucket_size: Option<usize>,
    /// `metricsRollingPercentileEnabled`.
    pub metrics_rolling_percentile_enabled: Option<bool>,
    /// `metricsHealthSnapshotInterval`, in milliseconds.
    pub metrics_health_snapshot_interval_ms: Option<u64>,
    /// `requestCacheEnabled`.
    pub request_cache_enabled: Option<bool>,
    /// `requestLogEnabled`. Accepted for parity with the property set;
    /// the execution log itself is out of this crate's scope.
    pub request_log_enabled: Option<bool>,
    /// `pool.coreSize`.
    pub pool_core_size: Option<usize>,
    /// `pool.maxQueueSize`. `-1` selects a synchronous handoff queue.
    pub pool_max_queue_size: Option<i64>,
    /// `pool.queueSizeRejectionThreshold`.
    pub pool_queue_size_rejection_threshold: Option<usize>,
    /// `pool.keepAliveTime`, in milliseconds.
    pub pool_keep_alive_ms: Option<u64>,
}

/// A loaded property document: a builtin-default layer plus per-group and
/// per-command override layers, keyed by the key's name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PropertyDocument {
    /// Overrides applied to every command unless a more specific layer overrides them.
    pub default: PropertyOverrides,
    /// Overrides keyed by [`crate::GroupKey`] name.
    pub groups: BTreeMap<String, PropertyOverrides>,
    /// Overrides keyed by [`crate::CommandKey`] name.
    pub commands: BTreeMap<String, PropertyOverrides>,
}

impl PropertyDocument {
    /// Parses a property document from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|source| ConfigError::InvalidJson { source })
    }

    /// Parses a property document from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::InvalidYaml { source })
    }

    /// Overrides for a given group, if any were declared.
    #[must_use]
    pub fn group(&self, group: &str) -> Option<&PropertyOverrides> {
        self.groups.get(group)
    }

    /// Overrides for a given command, if any were declared.
    #[must_use]
    pub fn command(&self, command: &str) -> Option<&PropertyOverrides> {
        self.commands.get(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_fields() {
        let raw = r#"{"default": {"not_a_real_property": 1}}"#;
        assert!(PropertyDocument::from_json(raw).is_err());
    }

    #[test]
    fn parses_layered_document() {
        let raw = r#"{
            "default": {"circuit_breaker_sleep_window_ms": 5000},
            "groups": {"BillingService": {"pool_core_size": 4}},
            "commands": {"GetInvoice": {"fallback_enabled": false}}
        }"#;
        let doc = PropertyDocument::from_json(raw).unwrap();
        assert_eq!(doc.default.circuit_breaker_sleep_window_ms, Some(5000));
        assert_eq!(doc.group("BillingService").unwrap().pool_core_size, Some(4));
        assert_eq!(doc.command("GetInvoice").unwrap().fallback_enabled, Some(false));
        assert!(doc.group("Unknown").is_none());
    }
}
