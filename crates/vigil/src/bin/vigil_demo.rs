// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Walks one thread-isolated and one semaphore-isolated command through
//! a handful of calls, one of which is made to fail, then prints a
//! health snapshot for each.

use std::sync::Arc;
use std::time::Duration;

use vigil::{
    Command, CommandError, GroupKey, IsolationStrategy, Registry, RequestContext, RuntimeFailure,
};

struct Lookup {
    fail: bool,
}

impl Command for Lookup {
    type Output = u64;

    fn run(&self) -> Result<u64, CommandError> {
        if self.fail {
            return Err(CommandError::failed(std::io::Error::other("dependency unreachable")));
        }
        std::thread::sleep(Duration::from_millis(5));
        Ok(1)
    }

    fn fallback(&self, _failure: &RuntimeFailure) -> Result<u64, CommandError> {
        Ok(0)
    }
}

struct SlowLookup;

impl Command for SlowLookup {
    type Output = u64;

    fn run(&self) -> Result<u64, CommandError> {
        std::thread::sleep(Duration::from_millis(50));
        Ok(1)
    }

    fn fallback(&self, _failure: &RuntimeFailure) -> Result<u64, CommandError> {
        Ok(0)
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let registry = Registry::with_system_clock();
    let group = GroupKey::new("DemoService");
    let request = RequestContext::new();

    let semaphore_runner = registry.runner(group.clone(), "LookupAccount");
    for attempt in 0..5 {
        let command = Arc::new(Lookup { fail: attempt == 2 });
        let outcome = semaphore_runner.execute(command, &request);
        tracing::info!(attempt, ?outcome, "semaphore-isolated call completed");
    }

    let thread_entry = registry
        .context()
        .command_entry(&group, &"SlowLookupAccount".into(), &Default::default());
    thread_entry.table.set_execution_isolation_strategy(IsolationStrategy::Thread);
    thread_entry.table.set_execution_isolation_thread_timeout_ms(20);
    let thread_runner = registry.runner(group.clone(), "SlowLookupAccount");
    let outcome = thread_runner.execute(Arc::new(SlowLookup), &request);
    tracing::info!(?outcome, "thread-isolated call completed (expected to time out)");

    for name in ["LookupAccount", "SlowLookupAccount"] {
        let entry = registry.context().command_entry(&group, &name.into(), &Default::default());
        let health = entry.metrics.get_health_counts();
        tracing::info!(
            command = name,
            total_requests = health.total_requests(),
            error_count = health.error_count(),
            error_percentage = health.error_percentage(),
            properties = ?entry.table.snapshot(),
            "health snapshot"
        );
    }
}
