//! Timing sanity checks for every strategy.
//!
//! Delays are tens of milliseconds and the upper bounds are generous, so the
//! checks only catch a strategy that serializes when it should not (or the
//! reverse), not scheduling noise.
//!
//! ```bash
//! RUST_LOG=corus_bench=debug cargo test --test strategies -- --nocapture
//! ```

use std::time::Duration;

use corus_bench::{init_tracing, Strategy, Workload};

const DELAY: Duration = Duration::from_millis(50);

fn run(strategy: Strategy, workload: &Workload) -> corus_bench::Measurement {
    init_tracing();
    let m = strategy.run(workload).unwrap();
    assert_eq!(m.label, strategy.label());
    assert_eq!(m.tasks, workload.tasks);
    assert_eq!(m.completed, workload.tasks, "{strategy:?} lost tasks");
    assert!(
        m.elapsed >= m.ideal,
        "{strategy:?} finished faster than its tasks can: {:?} < {:?}",
        m.elapsed,
        m.ideal
    );
    m
}

#[test]
fn sequential_takes_the_sum_of_delays() {
    let m = run(Strategy::Sequential, &Workload::new(3, DELAY));
    assert!(m.elapsed >= 3 * DELAY);
}

#[test]
fn promise_chain_takes_the_sum_of_delays() {
    let m = run(Strategy::PromiseChain, &Workload::new(3, DELAY));
    assert!(m.elapsed >= 3 * DELAY);
}

#[test]
fn threads_overlap() {
    let m = run(Strategy::Threads, &Workload::new(3, DELAY));
    assert!(m.elapsed < 3 * DELAY, "threads serialized: {:?}", m.elapsed);
}

#[test]
fn many_threads_still_take_about_one_delay() {
    let m = run(Strategy::Threads, &Workload::new(100, DELAY));
    assert!(m.elapsed < 10 * DELAY, "took {:?}", m.elapsed);
}

#[test]
fn pool_is_bounded_by_worker_count() {
    let workload = Workload::new(4, DELAY).with_workers(2);
    let m = run(Strategy::ThreadPool, &workload);
    assert_eq!(m.ideal, 2 * DELAY);
    assert!(m.elapsed < 4 * DELAY, "pool serialized: {:?}", m.elapsed);
}

#[test]
fn async_tasks_overlap() {
    let m = run(Strategy::AsyncTasks, &Workload::new(3, DELAY));
    assert!(m.elapsed < 3 * DELAY, "tasks serialized: {:?}", m.elapsed);
}

#[test]
fn many_async_tasks_take_about_one_delay() {
    let m = run(Strategy::AsyncTasks, &Workload::new(10_000, DELAY));
    assert!(m.elapsed < 20 * DELAY, "took {:?}", m.elapsed);
}

#[test]
fn coroutines_overlap() {
    let m = run(Strategy::Coroutines, &Workload::new(3, DELAY));
    assert!(m.elapsed < 3 * DELAY, "coroutines serialized: {:?}", m.elapsed);
}

#[test]
fn many_coroutines_take_about_one_delay() {
    let m = run(Strategy::Coroutines, &Workload::new(1_000, DELAY));
    assert!(m.elapsed < 20 * DELAY, "took {:?}", m.elapsed);
}

#[test]
fn zero_tasks_complete_immediately() {
    for strategy in Strategy::ALL {
        let m = run(strategy, &Workload::new(0, Duration::from_secs(5)));
        assert_eq!(m.completed, 0);
        assert!(m.elapsed < Duration::from_secs(1), "{strategy:?} waited anyway");
    }
}

#[test]
fn coroutines_scale_past_the_kernel_map_limit() {
    // Guarded stacks would need two memory regions each, over 65530 here.
    let workload = Workload {
        coroutine_stack: 16 * 1024,
        ..Workload::new(40_000, Duration::from_millis(10))
    };
    let m = run(Strategy::Coroutines, &workload);
    assert!(m.elapsed < Duration::from_secs(10), "took {:?}", m.elapsed);
}
