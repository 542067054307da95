use super::{blocking_task, Strategy};
use crate::{config::Workload, error::Result, timing, timing::Measurement};

pub fn run(strategy: Strategy, workload: &Workload) -> Result<Measurement> {
    let ideal = strategy.ideal(workload);
    timing::measure(strategy.label(), workload.tasks, ideal, || {
        let mut completed = 0;
        for index in 0..workload.tasks {
            blocking_task(index, workload.delay);
            completed += 1;
        }
        Ok(completed)
    })
}
