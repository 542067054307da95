//! The ways of running N delayed tasks that get timed against each other.
//!
//! Every strategy hands each task its index and counts the indices that come
//! back, so a run only reports once all of its tasks have finished.

use std::{thread, time::Duration};

use clap::ValueEnum;

use crate::{
    config::Workload,
    error::Result,
    timing::{self, Measurement},
};

pub mod chain;
pub mod coroutines;
pub mod pool;
pub mod sequential;
pub mod tasks;
pub mod threads;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Strategy {
    /// Blocking sleeps one after another on the calling thread.
    Sequential,
    /// Futures chained so each starts when the previous one resolves.
    PromiseChain,
    /// One OS thread per task.
    Threads,
    /// A fixed number of worker threads draining a job queue.
    ThreadPool,
    /// Tokio tasks on a single-threaded runtime.
    AsyncTasks,
    /// Stackful coroutines on this crate's scheduler.
    Coroutines,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::Sequential,
        Strategy::PromiseChain,
        Strategy::Threads,
        Strategy::ThreadPool,
        Strategy::AsyncTasks,
        Strategy::Coroutines,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::PromiseChain => "promise-chain",
            Strategy::Threads => "threads",
            Strategy::ThreadPool => "thread-pool",
            Strategy::AsyncTasks => "async-tasks",
            Strategy::Coroutines => "coroutines",
        }
    }

    pub fn default_tasks(self) -> usize {
        match self {
            Strategy::Sequential | Strategy::PromiseChain => 3,
            Strategy::Threads => 1_000,
            Strategy::ThreadPool => 2,
            Strategy::AsyncTasks => 100_000,
            Strategy::Coroutines => 10_000,
        }
    }

    /// Elapsed time with zero scheduling overhead.
    pub fn ideal(self, workload: &Workload) -> Duration {
        let Workload { tasks, delay, .. } = *workload;
        if tasks == 0 {
            return Duration::ZERO;
        }
        match self {
            Strategy::Sequential | Strategy::PromiseChain => timing::scaled(delay, tasks),
            Strategy::ThreadPool => timing::scaled(delay, tasks.div_ceil(workload.workers.max(1))),
            Strategy::Threads | Strategy::AsyncTasks | Strategy::Coroutines => delay,
        }
    }

    pub fn run(self, workload: &Workload) -> Result<Measurement> {
        tracing::debug!(strategy = self.label(), tasks = workload.tasks, delay = ?workload.delay, "starting");
        match self {
            Strategy::Sequential => sequential::run(self, workload),
            Strategy::PromiseChain => chain::run(self, workload),
            Strategy::Threads => threads::run(self, workload),
            Strategy::ThreadPool => pool::run(self, workload),
            Strategy::AsyncTasks => tasks::run(self, workload),
            Strategy::Coroutines => coroutines::run(self, workload),
        }
    }
}

/// Stand-in for a blocking I/O call: holds the calling thread for `delay`.
pub fn blocking_task(index: usize, delay: Duration) -> usize {
    thread::sleep(delay);
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ideal_times() {
        let w = Workload::new(5, Duration::from_millis(100)).with_workers(2);
        assert_eq!(Strategy::Sequential.ideal(&w), Duration::from_millis(500));
        assert_eq!(Strategy::PromiseChain.ideal(&w), Duration::from_millis(500));
        assert_eq!(Strategy::ThreadPool.ideal(&w), Duration::from_millis(300));
        assert_eq!(Strategy::Threads.ideal(&w), Duration::from_millis(100));
        assert_eq!(Strategy::AsyncTasks.ideal(&w), Duration::from_millis(100));
        assert_eq!(Strategy::Coroutines.ideal(&w), Duration::from_millis(100));
    }

    #[test]
    fn nothing_to_do_takes_no_time() {
        let w = Workload::new(0, Duration::from_secs(1));
        for strategy in Strategy::ALL {
            assert_eq!(strategy.ideal(&w), Duration::ZERO);
        }
    }

    #[test]
    fn labels_match_cli_names() {
        for strategy in Strategy::ALL {
            let value = strategy.to_possible_value().unwrap();
            assert_eq!(value.get_name(), strategy.label());
        }
    }
}
