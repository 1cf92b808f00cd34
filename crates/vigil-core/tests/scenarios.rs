// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios exercising the runtime against a real
//! [`VigilContext`], not just its individual pieces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use vigil_config::testing::ManualClock;
use vigil_config::{Clock, CommandKey, GroupKey, IsolationStrategy, PoolKey};
use vigil_core::{Command, CommandError, CommandRunner, ExecutionError, FallbackOutcome, RequestContext, RuntimeFailureKind, VigilContext};

struct NoOp;
impl Command for NoOp {
    type Output = u64;
    fn run(&self) -> Result<u64, CommandError> {
        Ok(7)
    }
}

struct AlwaysFails {
    run_count: AtomicU64,
}
impl Command for AlwaysFails {
    type Output = u64;
    fn run(&self) -> Result<u64, CommandError> {
        let _ = self.run_count.fetch_add(1, Ordering::SeqCst);
        Err(CommandError::failed(std::io::Error::other("dependency down")))
    }
}

struct BlockOnBarrier {
    barrier: Arc<Barrier>,
}
impl Command for BlockOnBarrier {
    type Output = u64;
    fn run(&self) -> Result<u64, CommandError> {
        self.barrier.wait();
        Ok(1)
    }
}

struct Sleeps {
    duration: Duration,
}
impl Command for Sleeps {
    type Output = u64;
    fn run(&self) -> Result<u64, CommandError> {
        thread::sleep(self.duration);
        Ok(1)
    }
}

struct BadRequester;
impl Command for BadRequester {
    type Output = u64;
    fn run(&self) -> Result<u64, CommandError> {
        Err(CommandError::bad_request(std::io::Error::other("malformed request")))
    }
}

#[test]
fn circuit_opens_then_grants_exactly_one_half_open_probe_under_contention() {
    let clock = Arc::new(ManualClock::new());
    let ctx = Arc::new(VigilContext::new(Arc::clone(&clock) as Arc<dyn Clock>));
    let group = GroupKey::new("ScenarioGroup");
    let command = CommandKey::new("FlakyDependency");
    let entry = ctx.command_entry(&group, &command, &Default::default());
    entry.table.set_circuit_breaker_request_volume_threshold(20);
    entry.table.set_circuit_breaker_error_threshold_percentage(50);
    entry.table.set_circuit_breaker_sleep_window_ms(5_000);

    let runner = CommandRunner::new(Arc::clone(&ctx), group.clone(), command.clone());
    let request = RequestContext::new();

    let dependency = Arc::new(AlwaysFails { run_count: AtomicU64::new(0) });
    for _ in 0..20 {
        let _ = runner.execute(Arc::clone(&dependency), &request);
    }
    assert!(entry.breaker.is_open(), "20 calls at 100% error rate must trip the breaker");
    let baseline_run_count = dependency.run_count.load(Ordering::SeqCst);

    clock.advance(5_001);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let runner = CommandRunner::new(Arc::clone(&ctx), group.clone(), command.clone());
        let dependency = Arc::clone(&dependency);
        handles.push(thread::spawn(move || {
            let request = RequestContext::new();
            runner.execute(dependency, &request)
        }));
    }
    for handle in handles {
        let _ = handle.join().unwrap();
    }

    // Every caller racing the cooldown window is short-circuited except
    // the single winner of `allow_single_test`'s CAS, which alone
    // reaches `run()` (and fails it, re-opening the breaker).
    assert_eq!(dependency.run_count.load(Ordering::SeqCst) - baseline_run_count, 1);
    assert!(entry.breaker.is_open());
}

#[test]
fn thread_pool_rejects_once_the_queue_reaches_its_threshold() {
    let ctx = Arc::new(VigilContext::with_system_clock());
    let group = GroupKey::new("ScenarioGroup");
    let command = CommandKey::new("QueuedDependency");
    let entry = ctx.command_entry(&group, &command, &Default::default());
    entry.table.set_execution_isolation_strategy(IsolationStrategy::Thread);
    entry.table.set_execution_isolation_thread_timeout_ms(5_000);
    entry.table.set_pool_core_size(1);
    entry.table.set_pool_max_queue_size(-1);
    entry.table.set_pool_queue_size_rejection_threshold(2);

    let pool_key = PoolKey::from_group(&group);
    let pool = ctx.pool_for(&pool_key, &entry.table).expect("pool provisions");

    let barrier = Arc::new(Barrier::new(2));
    let runner_a = CommandRunner::new(Arc::clone(&ctx), group.clone(), command.clone());
    let handle_a = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let request = RequestContext::new();
            runner_a.execute(Arc::new(BlockOnBarrier { barrier }), &request)
        })
    };
    wait_until(|| pool.current_active_count() == 1);

    let runner_b = CommandRunner::new(Arc::clone(&ctx), group.clone(), command.clone());
    let handle_b = thread::spawn(move || {
        let request = RequestContext::new();
        runner_b.execute(Arc::new(NoOp), &request)
    });
    wait_until(|| pool.current_queue_size() == 1);

    let runner_c = CommandRunner::new(Arc::clone(&ctx), group.clone(), command.clone());
    let handle_c = thread::spawn(move || {
        let request = RequestContext::new();
        runner_c.execute(Arc::new(NoOp), &request)
    });
    wait_until(|| pool.current_queue_size() == 2);

    // A fourth call arrives while core_size=1 worker is busy and the
    // queue already holds two: it is rejected without ever touching
    // the worker.
    let runner_d = CommandRunner::new(Arc::clone(&ctx), group.clone(), command.clone());
    let request_d = RequestContext::new();
    let result_d = runner_d.execute(Arc::new(NoOp), &request_d);
    match result_d.unwrap_err() {
        ExecutionError::Runtime(failure) => assert_eq!(failure.kind, RuntimeFailureKind::RejectedThreadExecution),
        ExecutionError::BadRequest(_) => panic!("expected a rejected-thread-execution runtime failure"),
    }

    barrier.wait();
    assert_eq!(handle_a.join().unwrap().unwrap(), 1);
    assert_eq!(handle_b.join().unwrap().unwrap(), 7);
    assert_eq!(handle_c.join().unwrap().unwrap(), 7);
}

fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !predicate() {
        assert!(Instant::now() < deadline, "condition never became true");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn thread_isolated_timeout_surfaces_within_the_configured_deadline() {
    let ctx = Arc::new(VigilContext::with_system_clock());
    let group = GroupKey::new("ScenarioGroup");
    let command = CommandKey::new("SlowDependency");
    let entry = ctx.command_entry(&group, &command, &Default::default());
    entry.table.set_execution_isolation_strategy(IsolationStrategy::Thread);
    entry.table.set_execution_isolation_thread_timeout_ms(50);

    let runner = CommandRunner::new(ctx, group, command);
    let request = RequestContext::new();

    let started = Instant::now();
    let result = runner.execute(Arc::new(Sleeps { duration: Duration::from_millis(300) }), &request);
    assert!(started.elapsed() < Duration::from_millis(200));

    match result.unwrap_err() {
        ExecutionError::Runtime(failure) => {
            assert_eq!(failure.kind, RuntimeFailureKind::Timeout);
            assert!(failure.cause.is_none());
            assert!(matches!(failure.fallback, Some(FallbackOutcome::Failed(_))));
        }
        ExecutionError::BadRequest(_) => panic!("expected a timeout runtime failure"),
    }
}

#[test]
fn bad_requests_never_trip_the_breaker_even_at_volume() {
    let ctx = Arc::new(VigilContext::with_system_clock());
    let group = GroupKey::new("ScenarioGroup");
    let command = CommandKey::new("StrictValidator");
    let entry = ctx.command_entry(&group, &command, &Default::default());
    entry.table.set_circuit_breaker_request_volume_threshold(1);
    entry.table.set_circuit_breaker_error_threshold_percentage(1);

    let runner = CommandRunner::new(Arc::clone(&ctx), group, command);
    let request = RequestContext::new();

    for _ in 0..100 {
        let err = runner.execute(Arc::new(BadRequester), &request).unwrap_err();
        assert!(matches!(err, ExecutionError::BadRequest(_)));
    }

    assert_eq!(entry.metrics.rolling().rolling_sum(vigil_metrics::RollingEvent::Failure), 0);
    assert_eq!(entry.metrics.rolling().rolling_sum(vigil_metrics::RollingEvent::ExceptionThrown), 100);
    assert!(!entry.breaker.is_open());
    assert!(entry.breaker.allow_request());
}
