use std::time::Duration;

use clap::Parser;

use crate::{stack::DEFAULT_STACK_SIZE, strategies::Strategy};

pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_THREAD_STACK: usize = 64 * 1024;

/// Everything one strategy run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub tasks: usize,
    pub delay: Duration,
    /// Thread pool size.
    pub workers: usize,
    pub thread_stack: usize,
    pub coroutine_stack: usize,
}

impl Workload {
    pub fn new(tasks: usize, delay: Duration) -> Self {
        Self {
            tasks,
            delay,
            workers: DEFAULT_WORKERS,
            thread_stack: DEFAULT_THREAD_STACK,
            coroutine_stack: DEFAULT_STACK_SIZE,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

#[derive(Debug, Parser)]
#[command(name = "corus-bench")]
#[command(
    about = "Time fixed-delay tasks run sequentially and concurrently.",
    long_about = "Time fixed-delay tasks run sequentially and concurrently.\nEach strategy creates N tasks that wait for the same delay, waits for all of them and prints the elapsed wall-clock time."
)]
pub struct Config {
    #[arg(value_enum, help = "strategies to run; all of them when omitted")]
    pub strategies: Vec<Strategy>,
    #[arg(
        short, long,
        help = "number of tasks; overrides every strategy's default",
    )]
    pub tasks: Option<usize>,
    #[arg(
        short, long,
        default_value = "1000",
        help = "delay of each task in milliseconds",
    )]
    pub delay_ms: u64,
    #[arg(
        short, long,
        default_value = "2",
        value_parser = clap::value_parser!(u32).range(1..),
        help = "thread pool size",
    )]
    pub workers: u32,
    #[arg(
        long,
        default_value = "64",
        help = "stack size of spawned OS threads, KiB",
    )]
    pub thread_stack_kib: usize,
    #[arg(
        long,
        default_value = "64",
        help = "stack size of coroutines, KiB",
    )]
    pub coroutine_stack_kib: usize,
}

impl Config {
    pub fn selected(&self) -> Vec<Strategy> {
        if self.strategies.is_empty() {
            Strategy::ALL.to_vec()
        } else {
            self.strategies.clone()
        }
    }

    pub fn workload(&self, strategy: Strategy) -> Workload {
        let tasks = self.tasks.unwrap_or_else(|| strategy.default_tasks());
        Workload {
            thread_stack: self.thread_stack_kib * 1024,
            coroutine_stack: self.coroutine_stack_kib * 1024,
            ..Workload::new(tasks, Duration::from_millis(self.delay_ms))
        }
        .with_workers(self.workers as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("corus-bench").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn no_arguments_runs_everything_with_defaults() {
        let config = parse(&[]);
        assert_eq!(config.selected(), Strategy::ALL.to_vec());

        let w = config.workload(Strategy::AsyncTasks);
        assert_eq!(w.tasks, 100_000);
        assert_eq!(w.delay, DEFAULT_DELAY);
        assert_eq!(w.workers, DEFAULT_WORKERS);
        assert_eq!(w.thread_stack, DEFAULT_THREAD_STACK);
        assert_eq!(w.coroutine_stack, DEFAULT_STACK_SIZE);
        assert_eq!(config.workload(Strategy::Sequential).tasks, 3);
    }

    #[test]
    fn tasks_override_every_strategy() {
        let config = parse(&["threads", "coroutines", "--tasks", "7", "--delay-ms", "5"]);
        assert_eq!(config.selected(), vec![Strategy::Threads, Strategy::Coroutines]);
        for strategy in config.selected() {
            let w = config.workload(strategy);
            assert_eq!(w.tasks, 7);
            assert_eq!(w.delay, Duration::from_millis(5));
        }
    }

    #[test]
    fn kebab_case_strategy_names() {
        let config = parse(&["promise-chain", "thread-pool", "async-tasks"]);
        assert_eq!(
            config.selected(),
            vec![Strategy::PromiseChain, Strategy::ThreadPool, Strategy::AsyncTasks]
        );
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(Config::try_parse_from(["corus-bench", "--workers", "0"]).is_err());
        assert!(Config::try_parse_from(["corus-bench", "bogus"]).is_err());
    }

    #[test]
    fn workload_never_has_zero_workers() {
        let w = Workload::new(1, Duration::ZERO).with_workers(0);
        assert_eq!(w.workers, 1);
    }
}
