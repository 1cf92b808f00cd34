// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-process registry of command state: resolved property tables,
//! metrics, circuit breakers, isolation pools, and the singleton
//! policy that keeps every command's state reachable by key rather than
//! by reference.
//!
//! Grounded on the same "shared state lives in an explicit registry, not
//! behind a static mutable" shape this workspace uses for pipeline
//! component wiring, adapted from a build-time component graph to a
//! lazily-populated, thread-safe one: nothing here is ever torn down and
//! rebuilt, only grown.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use vigil_breaker::CircuitBreaker;
use vigil_config::{Clock, CommandKey, GroupKey, PoolKey, Property, PropertyDocument, PropertyOverrides, PropertyTable, PropertyTableBuilder, SystemClock};
use vigil_isolation::{IsolationError, IsolationPool, TryableSemaphore};
use vigil_metrics::{CommandMetrics, CommandMetricsConfig};

/// Everything one `(GroupKey, CommandKey)` pair needs to dispatch,
/// resolved once and reused for every subsequent call.
pub struct CommandEntry {
    /// This command's resolved, dynamically-readable properties.
    pub table: Arc<PropertyTable>,
    /// This command's rolling health and latency counters.
    pub metrics: Arc<CommandMetrics>,
    /// This command's circuit breaker.
    pub breaker: Arc<CircuitBreaker>,
    /// Bounds concurrent `run()` calls under semaphore isolation.
    pub execution_semaphore: Arc<TryableSemaphore>,
    /// Bounds concurrent `fallback()` calls regardless of isolation
    /// strategy.
    pub fallback_semaphore: Arc<TryableSemaphore>,
}

/// Owns every per-key singleton a registered command depends on.
///
/// Commands identify their state by [`CommandKey`] and [`PoolKey`] and
/// look it up here on every dispatch; nothing holds a back-pointer into
/// a [`CommandEntry`] or pool from outside this registry, so there is no
/// teardown ordering to get wrong.
pub struct VigilContext {
    clock: Arc<dyn Clock>,
    document: Option<PropertyDocument>,
    commands: Mutex<AHashMap<CommandKey, Arc<CommandEntry>>>,
    pools: Mutex<AHashMap<PoolKey, Arc<IsolationPool>>>,
}

impl VigilContext {
    /// Builds an empty context reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            document: None,
            commands: Mutex::new(AHashMap::new()),
            pools: Mutex::new(AHashMap::new()),
        }
    }

    /// An empty context reading the system clock, with no loaded
    /// property document.
    #[must_use]
    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock::default()))
    }

    /// Attaches group/command/default property layers loaded from a
    /// configuration document.
    #[must_use]
    pub fn with_document(mut self, document: PropertyDocument) -> Self {
        self.document = Some(document);
        self
    }

    /// The clock this context resolves command timing from.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the [`CommandEntry`] for `(group, command)`, building and
    /// registering it on first use.
    ///
    /// Construction happens under the registry lock: on the cold path
    /// (first call for a given command) this serializes concurrent
    /// callers instead of racing independent builds and discarding the
    /// loser, a simplification over the lock-free registration this
    /// workspace uses for higher-traffic registries, justified by how
    /// rarely a new command key is first seen.
    pub fn command_entry(&self, group: &GroupKey, command: &CommandKey, overrides: &PropertyOverrides) -> Arc<CommandEntry> {
        let mut commands = self.commands.lock();
        if let Some(existing) = commands.get(command) {
            return Arc::clone(existing);
        }

        let table = Arc::new(
            PropertyTableBuilder::new()
                .with_overrides(overrides.clone())
                .build(group.clone(), command.clone(), self.document.as_ref()),
        );

        let percentile_enabled = {
            let table = Arc::clone(&table);
            Property::from_fn(move || Some(table.metrics_rolling_percentile_enabled()))
        };
        let metrics = Arc::new(CommandMetrics::new(
            Arc::clone(&self.clock),
            CommandMetricsConfig::from_table(&table),
            percentile_enabled,
        ));
        let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&self.clock), Arc::clone(&metrics), Arc::clone(&table)));
        let execution_semaphore = Arc::new(TryableSemaphore::new(
            {
                let table = Arc::clone(&table);
                Property::from_fn(move || Some(table.execution_isolation_semaphore_max_concurrent_requests()))
            },
            10,
        ));
        let fallback_semaphore = Arc::new(TryableSemaphore::new(
            {
                let table = Arc::clone(&table);
                Property::from_fn(move || Some(table.fallback_isolation_semaphore_max_concurrent_requests()))
            },
            10,
        ));

        let entry = Arc::new(CommandEntry {
            table,
            metrics,
            breaker,
            execution_semaphore,
            fallback_semaphore,
        });
        let _ = commands.insert(command.clone(), Arc::clone(&entry));
        entry
    }

    /// Returns the [`IsolationPool`] for `pool_key`, building and
    /// registering it on first use against `table`'s pool properties.
    ///
    /// # Errors
    ///
    /// Propagates [`IsolationError::ThreadSpawn`] if the pool's worker
    /// threads cannot be spawned.
    pub fn pool_for(&self, pool_key: &PoolKey, table: &Arc<PropertyTable>) -> Result<Arc<IsolationPool>, IsolationError> {
        let mut pools = self.pools.lock();
        if let Some(existing) = pools.get(pool_key) {
            return Ok(Arc::clone(existing));
        }
        let core_size = table.pool_core_size();
        let max_queue_size = table.pool_max_queue_size();
        let threshold = {
            let table = Arc::clone(table);
            Property::from_fn(move || Some(table.pool_queue_size_rejection_threshold()))
        };
        let keep_alive = {
            let table = Arc::clone(table);
            Property::from_fn(move || Some(table.pool_keep_alive_ms()))
        };
        let pool = Arc::new(IsolationPool::new(pool_key.clone(), core_size, max_queue_size, threshold, keep_alive)?);
        let _ = pools.insert(pool_key.clone(), Arc::clone(&pool));
        Ok(pool)
    }
}
