//! End-to-end tests for the strand runtime.
//!
//! Every test drives effects through the public API on a real thread pool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use strand_runtime::config::ExecutorConfig;
use strand_runtime::{
    Callback, Cause, CountDownLatch, Effect, Executor, Exit, Fiber, Immediate, Runtime,
    RuntimeConfig, ThreadPool, Value,
};

fn runtime(workers: usize) -> Runtime {
    let config = RuntimeConfig::builder().num_workers(workers).build().unwrap();
    Runtime::new(&config).unwrap()
}

fn value<A: Value>(runtime: &Runtime, effect: Effect<A>) -> A {
    match runtime.unsafe_run_sync(effect) {
        Exit::Success(value) => value,
        Exit::Failure(cause) => panic!("effect failed: {cause}"),
    }
}

/// Succeeds with `value` after `millis`, completed from a helper thread.
fn delayed<A: Value>(value: A, millis: u64) -> Effect<A> {
    Effect::async_effect(move |callback: Callback<A>| {
        let value = value.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(millis));
            callback.complete(value);
        });
    })
}

/// Suspends until `latch` opens.
fn wait_for(latch: Arc<CountDownLatch>) -> Effect<()> {
    Effect::async_effect(move |callback: Callback<()>| {
        let latch = latch.clone();
        thread::spawn(move || {
            latch.wait();
            callback.complete(());
        });
    })
}

fn counting(counter: &Arc<AtomicUsize>) -> Effect<()> {
    let counter = counter.clone();
    Effect::succeed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

// ============================================================================
// Stack safety
// ============================================================================

#[test]
fn repeat_ten_thousand_steps() {
    let runtime = runtime(2);
    let counter = Arc::new(AtomicUsize::new(0));
    value(&runtime, counting(&counter).repeat(10_000));
    assert_eq!(counter.load(Ordering::SeqCst), 10_000);
}

#[test]
fn forever_runs_until_failure() {
    let runtime = runtime(2);
    let counter = Arc::new(AtomicUsize::new(0));
    let step = {
        let counter = counter.clone();
        Effect::defer(move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 20_000 {
                Effect::fail(|| "stop")
            } else {
                Effect::unit()
            }
        })
    };
    let exit = runtime.unsafe_run_sync(step.forever());
    assert!(exit.cause().is_some_and(Cause::is_fail));
    assert_eq!(counter.load(Ordering::SeqCst), 20_000);
}

#[test]
fn immediately_completed_async_steps() {
    let runtime = runtime(2);
    let counter = Arc::new(AtomicUsize::new(0));
    let step = Effect::async_effect(|callback: Callback<()>| callback.complete(()))
        .zip_right(counting(&counter));
    value(&runtime, step.repeat(10_000));
    assert_eq!(counter.load(Ordering::SeqCst), 10_000);
}

#[test]
fn left_nested_map_chain() {
    let runtime = runtime(1);
    let mut effect = Effect::succeed_now(0usize);
    for _ in 0..10_000 {
        effect = effect.map(|n| n + 1);
    }
    assert_eq!(value(&runtime, effect), 10_000);
}

#[test]
fn repeated_fork() {
    let runtime = runtime(4);
    let counter = Arc::new(AtomicUsize::new(0));
    let effect = counting(&counter).fork().as_unit().repeat(1_000);
    value(&runtime, effect);

    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.load(Ordering::SeqCst) < 1_000 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1_000);
}

#[test]
fn repeated_shift_onto_inline_executor() {
    let runtime = runtime(1);
    let effect = Effect::shift(Arc::new(Immediate)).repeat(200_000);
    assert!(runtime.unsafe_run_sync(effect).is_success());
}

fn nested_joins(depth: usize) -> Effect<usize> {
    if depth == 0 {
        return Effect::succeed_now(0);
    }
    Effect::defer(move || nested_joins(depth - 1))
        .fork()
        .flat_map(|fiber| fiber.join())
        .map(|n| n + 1)
}

#[test]
fn deep_chain_of_joined_forks() {
    let runtime = runtime(2);
    assert_eq!(value(&runtime, nested_joins(20_000)), 20_000);
}

// ============================================================================
// Composition and concurrency
// ============================================================================

#[test]
fn zip_pairs_values() {
    let runtime = runtime(2);
    let effect = Effect::succeed(|| 1).zip(Effect::succeed(|| "b"));
    assert_eq!(value(&runtime, effect), (1, "b"));
}

#[test]
fn zip_par_runs_sides_concurrently() {
    let runtime = runtime(2);
    let started = Instant::now();
    let pair = value(&runtime, delayed(1, 300).zip_par(delayed("b", 300)));
    let elapsed = started.elapsed();

    assert_eq!(pair, (1, "b"));
    assert!(elapsed < Duration::from_millis(550), "took {elapsed:?}");
}

#[test]
fn fork_join_returns_results_in_join_order() {
    let runtime = runtime(4);
    let n = 8usize;

    // Earlier fibers sleep longer, so the first join waits for a running
    // fiber while later joins find theirs already done.
    let forks = (0..n).fold(Effect::succeed_now(Vec::new()), |acc, i| {
        let delay = ((n - i) * 20) as u64;
        acc.zip_with(delayed(i, delay).fork(), |mut fibers: Vec<Fiber<usize>>, fiber| {
            fibers.push(fiber);
            fibers
        })
    });
    let joined = forks.flat_map(|fibers| {
        fibers
            .into_iter()
            .fold(Effect::succeed_now(Vec::new()), |acc, fiber| {
                acc.zip_with(fiber.join(), |mut values: Vec<usize>, value| {
                    values.push(value);
                    values
                })
            })
    });

    assert_eq!(value(&runtime, joined), (0..n).collect::<Vec<_>>());
}

#[test]
fn join_after_completion() {
    let runtime = runtime(2);
    let effect = Effect::succeed(|| 11)
        .fork()
        .zip_left(delayed((), 50))
        .flat_map(|fiber| {
            assert!(fiber.is_done());
            fiber.join()
        });
    assert_eq!(value(&runtime, effect), 11);
}

#[test]
fn join_propagates_child_failure() {
    let runtime = runtime(2);
    let effect = Effect::<i32>::die("child bug")
        .fork()
        .flat_map(|fiber| fiber.join());
    assert!(runtime.unsafe_run_sync(effect).cause().is_some_and(Cause::is_die));
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn catch_all_recovers_fail_but_not_die() {
    let runtime = runtime(2);
    let recovered = Effect::<&str>::fail(|| "expected").catch_all(|_| Effect::succeed_now("ok"));
    assert_eq!(value(&runtime, recovered), "ok");

    let defect = Effect::<&str>::succeed(|| panic!("unexpected")).catch_all(|_| Effect::succeed_now("ok"));
    let exit = runtime.unsafe_run_sync(defect);
    let message = exit.cause().and_then(Cause::defect).map(|d| d.message().to_string());
    assert_eq!(message.as_deref(), Some("unexpected"));
}

#[test]
fn fold_cause_effect_recovers_fail_and_die() {
    let runtime = runtime(2);
    let classify = |effect: Effect<&'static str>| {
        effect.fold_cause_effect(
            |cause| {
                Effect::succeed_now(match cause {
                    Cause::Fail(_) => "fail",
                    Cause::Die(_) => "die",
                    Cause::Interrupt => "interrupt",
                })
            },
            Effect::succeed_now,
        )
    };
    assert_eq!(value(&runtime, classify(Effect::fail(|| "x"))), "fail");
    assert_eq!(value(&runtime, classify(Effect::succeed(|| panic!("y")))), "die");
    assert_eq!(value(&runtime, classify(Effect::succeed_now("fine"))), "fine");
}

// ============================================================================
// Interruption
// ============================================================================

#[test]
fn uninterruptible_region_defers_interrupt() {
    let runtime = runtime(2);
    let started = Arc::new(CountDownLatch::new(1));
    let release = Arc::new(CountDownLatch::new(1));
    let region_done = Arc::new(AtomicBool::new(false));
    let after_region = Arc::new(AtomicBool::new(false));

    let region = {
        let started = started.clone();
        let region_done = region_done.clone();
        Effect::succeed(move || started.count_down())
            .zip_right(wait_for(release.clone()))
            .zip_right(Effect::succeed(move || region_done.store(true, Ordering::SeqCst)))
            .uninterruptible()
    };
    let after = {
        let after_region = after_region.clone();
        Effect::succeed(move || after_region.store(true, Ordering::SeqCst))
    };
    let fiber = runtime.fork(region.zip_right(after));

    started.wait();
    value(&runtime, fiber.interrupt());
    assert!(!fiber.is_done());
    release.count_down();

    let exit = value(&runtime, fiber.await_exit());
    assert!(exit.cause().is_some_and(Cause::is_interrupt));
    assert!(region_done.load(Ordering::SeqCst));
    assert!(!after_region.load(Ordering::SeqCst));
}

#[test]
fn ensuring_runs_when_forever_is_interrupted() {
    let runtime = runtime(2);
    let ticks = Arc::new(AtomicUsize::new(0));
    let finalized = Arc::new(AtomicUsize::new(0));

    let effect = counting(&ticks).forever().ensuring(counting(&finalized));
    let fiber = runtime.fork(effect);

    let deadline = Instant::now() + Duration::from_secs(5);
    while ticks.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    value(&runtime, fiber.interrupt());

    let exit = runtime
        .unsafe_run_sync_timeout(fiber.await_exit(), Duration::from_secs(5))
        .and_then(|exit| exit.into_result().ok())
        .expect("interrupted fiber should finish");
    assert!(exit.cause().is_some_and(Cause::is_interrupt));
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

#[test]
fn interrupting_a_finished_fiber_has_no_effect() {
    let runtime = runtime(2);
    let fiber = runtime.fork(Effect::succeed_now(5));
    value(&runtime, fiber.await_exit());
    value(&runtime, fiber.interrupt());
    assert_eq!(fiber.poll().and_then(|exit| exit.into_result().ok()), Some(5));
}

// ============================================================================
// Environment
// ============================================================================

#[test]
fn provide_then_environment_round_trip() {
    let runtime = runtime(1);
    let effect = Effect::<String>::environment().provide(String::from("settings"));
    assert_eq!(value(&runtime, effect), "settings");
}

#[test]
fn nested_provide_shadows_and_restores() {
    let runtime = runtime(1);
    let inner = Effect::<u32>::environment().provide(2u32);
    let effect = Effect::<u32>::environment()
        .zip(inner)
        .zip(Effect::<u32>::environment())
        .provide(1u32);
    assert_eq!(value(&runtime, effect), ((1, 2), 1));
}

#[test]
fn environment_restored_after_caught_failure() {
    let runtime = runtime(1);
    let failing = Effect::<u32>::fail(|| "inner failure")
        .provide(100u32)
        .catch_all(|_| Effect::succeed_now(0));
    let effect = failing.zip_right(Effect::<u32>::environment()).provide(200u32);
    assert_eq!(value(&runtime, effect), 200);
}

#[test]
fn forked_fiber_inherits_environment() {
    let runtime = runtime(2);
    let effect = Effect::<u32>::environment()
        .fork()
        .flat_map(|fiber| fiber.join())
        .provide(7u32);
    assert_eq!(value(&runtime, effect), 7);
}

struct SharedCounter {
    count: AtomicUsize,
    barrier: Barrier,
}

/// Both fibers read the counter, meet at the barrier, then write.
fn increment(atomic: bool) -> Effect<()> {
    Effect::access_effect(move |shared: Arc<SharedCounter>| {
        let read = shared.count.load(Ordering::SeqCst);
        let meet = {
            let shared = shared.clone();
            Effect::async_effect(move |callback: Callback<()>| {
                let shared = shared.clone();
                thread::spawn(move || {
                    shared.barrier.wait();
                    callback.complete(());
                });
            })
        };
        meet.map(move |_| {
            if atomic {
                shared.count.fetch_add(1, Ordering::SeqCst);
            } else {
                shared.count.store(read + 1, Ordering::SeqCst);
            }
        })
    })
}

fn run_two_increments(atomic: bool) -> usize {
    let runtime = runtime(2);
    let shared = Arc::new(SharedCounter {
        count: AtomicUsize::new(0),
        barrier: Barrier::new(2),
    });
    let effect = increment(atomic)
        .fork()
        .zip(increment(atomic).fork())
        .flat_map(|(left, right)| left.join().zip(right.join()))
        .provide(shared.clone());
    value(&runtime, effect);
    shared.count.load(Ordering::SeqCst)
}

#[test]
fn unsynchronized_increments_lose_updates() {
    assert_eq!(run_two_increments(false), 1);
}

#[test]
fn atomic_increments_do_not_lose_updates() {
    assert_eq!(run_two_increments(true), 2);
}

// ============================================================================
// Execution contexts
// ============================================================================

#[test]
fn shift_moves_fiber_to_other_pool() {
    let runtime = runtime(1);
    let config = ExecutorConfig {
        num_workers: 1,
        thread_name: "shifted".into(),
        ..Default::default()
    };
    let other: Arc<dyn Executor> = Arc::new(ThreadPool::new(&config).unwrap());

    let thread_name = || thread::current().name().unwrap_or_default().to_string();
    let effect = Effect::succeed(thread_name)
        .zip_left(Effect::shift(other))
        .zip(Effect::succeed(thread_name))
        .zip(Effect::succeed(thread_name).fork().flat_map(|fiber| fiber.join()));

    let ((before, after), forked) = value(&runtime, effect);
    assert!(before.starts_with("strand-worker-"), "{before}");
    assert_eq!(after, "shifted-0");
    assert_eq!(forked, "shifted-0");
}

#[test]
fn run_async_delivers_exit() {
    let runtime = runtime(2);
    let latch = Arc::new(CountDownLatch::new(1));
    let result = Arc::new(parking_lot::Mutex::new(None));
    {
        let latch = latch.clone();
        let result = result.clone();
        runtime.unsafe_run_async(delayed(3, 10).map(|n| n * 3), move |exit| {
            *result.lock() = exit.into_result().ok();
            latch.count_down();
        });
    }
    assert!(latch.wait_timeout(Duration::from_secs(5)));
    assert_eq!(*result.lock(), Some(9));
}
