use std::time::Duration;

use futures::future::join_all;
use tokio::{runtime::Runtime, task::JoinHandle};

use super::Strategy;
use crate::{
    config::Workload,
    error::{Error, Result},
    timing::{self, Measurement},
};

/// Single-threaded runtime: every task shares the thread and only gives it
/// up at an `.await`.
pub fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(Error::Runtime)
}

/// Stand-in for non-blocking I/O: suspends for `delay` without holding the
/// thread.
pub async fn async_task(index: usize, delay: Duration) -> usize {
    tokio::time::sleep(delay).await;
    index
}

pub fn run(strategy: Strategy, workload: &Workload) -> Result<Measurement> {
    let ideal = strategy.ideal(workload);
    let delay = workload.delay;
    let rt = runtime()?;

    timing::measure(strategy.label(), workload.tasks, ideal, || {
        rt.block_on(async {
            let handles: Vec<JoinHandle<usize>> = (0..workload.tasks)
                .map(|index| tokio::spawn(async_task(index, delay)))
                .collect();

            let mut completed = 0;
            for joined in join_all(handles).await {
                joined.map_err(|err| Error::Join(err.to_string()))?;
                completed += 1;
            }
            Ok(completed)
        })
    })
}
