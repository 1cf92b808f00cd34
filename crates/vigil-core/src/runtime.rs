// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The command execution state machine: cache lookup, circuit check,
//! isolation dispatch, timed run, and fallback, exactly in that order
//! for every call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vigil_config::{CommandKey, GroupKey, IsolationStrategy, PoolKey, PropertyOverrides};
use vigil_isolation::IsolationError;

use crate::cache::RequestContext;
use crate::command::Command;
use crate::context::{CommandEntry, VigilContext};
use crate::error::{BadRequestFailure, CommandError, ExecutionError, FallbackOutcome, RuntimeFailure, RuntimeFailureKind};
use crate::future::QueuedCommand;
use crate::hooks::{CommandHooks, NoopHooks};

fn millis_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn elapsed_ms(since: Instant) -> i64 {
    i64::try_from(since.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// One command's identity plus the portion of a `run()`/`fallback()`
/// cycle that is common to every isolation strategy and every failure
/// path that reaches fallback.
///
/// Built fresh for each phase that needs it rather than held across the
/// whole dispatch, since a thread-isolated run hands one of these to a
/// pool worker while the dispatching thread keeps its own copy for the
/// timeout path.
struct Invocation<C: Command> {
    group: GroupKey,
    command_key: CommandKey,
    entry: Arc<CommandEntry>,
    hooks: Arc<dyn CommandHooks<C::Output>>,
}

impl<C: Command> Invocation<C> {
    fn run_and_fallback(&self, command: &C) -> Result<C::Output, ExecutionError> {
        self.hooks.on_run_start(&self.command_key);
        let started = Instant::now();
        match command.run() {
            Ok(value) => {
                self.entry.metrics.mark_success(elapsed_ms(started));
                self.entry.breaker.mark_success();
                self.hooks.on_run_success(&self.command_key, &value);
                Ok(value)
            }
            Err(cause @ CommandError::BadRequest(_)) => {
                self.entry.metrics.mark_exception_thrown();
                Err(ExecutionError::BadRequest(BadRequestFailure {
                    group: self.group.clone(),
                    command: self.command_key.clone(),
                    cause,
                }))
            }
            Err(cause) => {
                self.entry.metrics.mark_failure(elapsed_ms(started));
                self.fallback(command, RuntimeFailureKind::CommandException, Some(cause))
            }
        }
    }

    fn fallback(&self, command: &C, kind: RuntimeFailureKind, cause: Option<CommandError>) -> Result<C::Output, ExecutionError> {
        let failure = RuntimeFailure {
            group: self.group.clone(),
            command: self.command_key.clone(),
            kind,
            cause,
            fallback: None,
        };

        if !self.entry.table.fallback_enabled() {
            self.entry.metrics.mark_fallback_failure();
            return Err(ExecutionError::Runtime(RuntimeFailure {
                fallback: Some(FallbackOutcome::Disabled),
                ..failure
            }));
        }
        if !self.entry.fallback_semaphore.try_acquire() {
            self.entry.metrics.mark_fallback_rejection();
            return Err(ExecutionError::Runtime(RuntimeFailure {
                fallback: Some(FallbackOutcome::RejectedSemaphoreFallback),
                ..failure
            }));
        }

        self.hooks.on_fallback_start(&self.command_key);
        let outcome = command.fallback(&failure);
        self.entry.fallback_semaphore.release();

        match outcome {
            Ok(value) => {
                self.entry.metrics.mark_fallback_success();
                self.hooks.on_fallback_success(&self.command_key, &value);
                Ok(value)
            }
            Err(fallback_cause) => {
                self.entry.metrics.mark_fallback_failure();
                self.hooks.on_fallback_error(&self.command_key, &fallback_cause);
                Err(ExecutionError::Runtime(RuntimeFailure {
                    fallback: Some(FallbackOutcome::Failed(fallback_cause)),
                    ..failure
                }))
            }
        }
    }
}

/// Builds and runs one command dispatch against a [`VigilContext`].
///
/// A [`GroupKey`] and [`CommandKey`] are required; [`PoolKey`] defaults
/// to the group's name, matching the authoring contract's default of
/// joining the group's shared pool unless a command names its own.
pub struct CommandRunner {
    ctx: Arc<VigilContext>,
    group: GroupKey,
    command: CommandKey,
    pool_key: PoolKey,
    overrides: PropertyOverrides,
}

impl CommandRunner {
    /// Starts a runner for `command` in `group`, with no property
    /// overrides and a pool shared with every other command in `group`.
    #[must_use]
    pub fn new(ctx: Arc<VigilContext>, group: GroupKey, command: CommandKey) -> Self {
        let pool_key = PoolKey::from_group(&group);
        Self {
            ctx,
            group,
            command,
            pool_key,
            overrides: PropertyOverrides::default(),
        }
    }

    /// Dispatches to a pool other than the group's default one.
    #[must_use]
    pub fn pool(mut self, pool_key: PoolKey) -> Self {
        self.pool_key = pool_key;
        self
    }

    /// Applies an explicit, per-call property override layer.
    #[must_use]
    pub fn overrides(mut self, overrides: PropertyOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    fn clone_for_dispatch(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            group: self.group.clone(),
            command: self.command.clone(),
            pool_key: self.pool_key.clone(),
            overrides: self.overrides.clone(),
        }
    }

    fn invocation<C: Command>(&self, entry: &Arc<CommandEntry>, hooks: &Arc<dyn CommandHooks<C::Output>>) -> Invocation<C> {
        Invocation {
            group: self.group.clone(),
            command_key: self.command.clone(),
            entry: Arc::clone(entry),
            hooks: Arc::clone(hooks),
        }
    }

    /// Runs `command` to completion, blocking the calling thread.
    pub fn execute<C: Command>(&self, command: Arc<C>, request: &RequestContext) -> Result<C::Output, ExecutionError> {
        self.execute_with_hooks(command, request, Arc::new(NoopHooks))
    }

    /// Runs `command` to completion with lifecycle observation, blocking
    /// the calling thread.
    pub fn execute_with_hooks<C: Command>(
        &self,
        command: Arc<C>,
        request: &RequestContext,
        hooks: Arc<dyn CommandHooks<C::Output>>,
    ) -> Result<C::Output, ExecutionError> {
        let entry = self.ctx.command_entry(&self.group, &self.command, &self.overrides);
        hooks.on_start(&self.command);
        entry.metrics.increment_concurrent_executions();
        let outcome = self.run_cached(&command, request, &hooks, &entry);
        entry.metrics.decrement_concurrent_executions();
        hooks.on_complete(&self.command);
        outcome
    }

    /// Dispatches `command` without blocking the calling thread.
    ///
    /// Backed by a dedicated thread, not the command's own isolation
    /// pool — see [`QueuedCommand`] for why.
    pub fn queue<C: Command>(&self, command: Arc<C>, request: Arc<RequestContext>) -> QueuedCommand<Result<C::Output, ExecutionError>> {
        self.queue_with_hooks(command, request, Arc::new(NoopHooks))
    }

    /// [`CommandRunner::queue`] with lifecycle observation.
    pub fn queue_with_hooks<C: Command>(
        &self,
        command: Arc<C>,
        request: Arc<RequestContext>,
        hooks: Arc<dyn CommandHooks<C::Output>>,
    ) -> QueuedCommand<Result<C::Output, ExecutionError>> {
        let runner = self.clone_for_dispatch();
        let thread_name = format!("{}-queue", self.command.as_str());
        QueuedCommand::spawn(thread_name, move || runner.execute_with_hooks(command, request.as_ref(), hooks))
    }

    fn run_cached<C: Command>(
        &self,
        command: &Arc<C>,
        request: &RequestContext,
        hooks: &Arc<dyn CommandHooks<C::Output>>,
        entry: &Arc<CommandEntry>,
    ) -> Result<C::Output, ExecutionError> {
        let cache_key = if entry.table.request_cache_enabled() { command.cache_key() } else { None };
        let Some(key) = cache_key else {
            return self.run_guarded(command, hooks, entry);
        };

        let composite = format!("{}::{key}", self.command.as_str());
        let (slot, is_new) = request.slot_for::<Result<C::Output, ExecutionError>>(&composite);
        if !is_new {
            entry.metrics.mark_response_from_cache();
            return slot.wait();
        }
        let result = self.run_guarded(command, hooks, entry);
        slot.publish(result.clone());
        result
    }

    fn run_guarded<C: Command>(
        &self,
        command: &Arc<C>,
        hooks: &Arc<dyn CommandHooks<C::Output>>,
        entry: &Arc<CommandEntry>,
    ) -> Result<C::Output, ExecutionError> {
        if !entry.breaker.allow_request() {
            entry.metrics.mark_short_circuited();
            return self.invocation(entry, hooks).fallback(command.as_ref(), RuntimeFailureKind::ShortCircuit, None);
        }

        match entry.table.execution_isolation_strategy() {
            IsolationStrategy::Thread => self.run_thread_isolated(command, entry, hooks),
            IsolationStrategy::Semaphore => self.run_semaphore_isolated(command, entry, hooks),
        }
    }

    fn run_semaphore_isolated<C: Command>(
        &self,
        command: &Arc<C>,
        entry: &Arc<CommandEntry>,
        hooks: &Arc<dyn CommandHooks<C::Output>>,
    ) -> Result<C::Output, ExecutionError> {
        if !entry.execution_semaphore.try_acquire() {
            entry.metrics.mark_semaphore_rejection();
            return self
                .invocation(entry, hooks)
                .fallback(command.as_ref(), RuntimeFailureKind::RejectedSemaphoreExecution, None);
        }
        let result = self.invocation(entry, hooks).run_and_fallback(command.as_ref());
        entry.execution_semaphore.release();
        result
    }

    fn run_thread_isolated<C: Command>(
        &self,
        command: &Arc<C>,
        entry: &Arc<CommandEntry>,
        hooks: &Arc<dyn CommandHooks<C::Output>>,
    ) -> Result<C::Output, ExecutionError> {
        let pool = match self.ctx.pool_for(&self.pool_key, &entry.table) {
            Ok(pool) => pool,
            Err(source) => {
                tracing::warn!(pool = self.pool_key.as_str(), %source, "failed to provision isolation pool");
                entry.metrics.mark_thread_pool_rejection();
                return self
                    .invocation(entry, hooks)
                    .fallback(command.as_ref(), RuntimeFailureKind::RejectedThreadExecution, None);
            }
        };

        if !pool.is_queue_space_available() {
            entry.metrics.mark_thread_pool_rejection();
            return self
                .invocation(entry, hooks)
                .fallback(command.as_ref(), RuntimeFailureKind::RejectedThreadExecution, None);
        }

        let timeout_ms = entry.table.execution_isolation_thread_timeout_ms();
        let worker_invocation = self.invocation(entry, hooks);
        let worker_command = Arc::clone(command);
        let worker_command_key = self.command.clone();
        let worker_hooks = Arc::clone(hooks);
        let worker_metrics = Arc::clone(&entry.metrics);
        let worker_pool = Arc::clone(&pool);

        let future = pool.submit(move || {
            worker_metrics.mark_thread_execution();
            worker_metrics.mark_thread_max_active(worker_pool.current_active_count() as i64);
            worker_hooks.on_thread_start(&worker_command_key);
            let outcome = worker_invocation.run_and_fallback(worker_command.as_ref());
            worker_hooks.on_thread_complete(&worker_command_key);
            outcome
        });

        match future.get(Some(Duration::from_millis(timeout_ms))) {
            Ok(outcome) => outcome,
            Err(IsolationError::TimedOut | IsolationError::Cancelled) => {
                // The worker may still be running; cancellation is
                // cooperative and only stops a task that has not yet
                // started. A late success from it cannot change the
                // outcome already returned here.
                future.cancel();
                entry.metrics.mark_timeout(millis_to_i64(timeout_ms));
                self.invocation(entry, hooks).fallback(command.as_ref(), RuntimeFailureKind::Timeout, None)
            }
            Err(IsolationError::WorkerPanicked) => {
                entry.metrics.mark_exception_thrown();
                self.invocation(entry, hooks)
                    .fallback(command.as_ref(), RuntimeFailureKind::CommandException, None)
            }
            Err(IsolationError::ThreadSpawn { .. }) => {
                unreachable!("IsolationFuture::get never returns a spawn error; only IsolationPool::new does")
            }
        }
    }
}
