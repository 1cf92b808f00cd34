// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while resolving or loading configuration.

use thiserror::Error;

/// Errors raised by [`crate::PropertyTable`] and [`crate::PropertyDocument`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A loaded document could not be parsed as JSON.
    #[error("invalid JSON property document: {source}")]
    InvalidJson {
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A loaded document could not be parsed as YAML.
    #[error("invalid YAML property document: {source}")]
    InvalidYaml {
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A property value was present but had the wrong shape for its target type.
    #[error("property `{key}` has an invalid value: {reason}")]
    InvalidValue {
        /// Dotted property key, e.g. `circuitBreaker.sleepWindowMs`.
        key: String,
        /// Human-readable reason.
        reason: String,
    },
}
