use std::{io, thread, time::Duration};

use super::{blocking_task, Strategy};
use crate::{
    config::Workload,
    error::{Error, Result},
    timing::{self, Measurement},
};

pub fn run(strategy: Strategy, workload: &Workload) -> Result<Measurement> {
    run_with(strategy, workload, blocking_task)
}

fn run_with(
    strategy: Strategy,
    workload: &Workload,
    task: fn(usize, Duration) -> usize,
) -> Result<Measurement> {
    let ideal = strategy.ideal(workload);
    let delay = workload.delay;

    timing::measure(strategy.label(), workload.tasks, ideal, || {
        // Threads already started when a later spawn fails are left to
        // finish on their own.
        let handles = (0..workload.tasks)
            .map(|index| {
                thread::Builder::new()
                    .name(format!("task-{index}"))
                    .stack_size(workload.thread_stack)
                    .spawn(move || task(index, delay))
            })
            .collect::<io::Result<Vec<_>>>()
            .map_err(Error::Spawn)?;
        tracing::debug!(threads = handles.len(), "all threads started");

        let mut completed = 0;
        for handle in handles {
            handle.join().map_err(Error::from_panic)?;
            completed += 1;
        }
        Ok(completed)
    })
}
