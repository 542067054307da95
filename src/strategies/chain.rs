//! Each delayed future is only created once the previous one resolved, the
//! same shape as `p = p.then(task)` on a promise.

use std::time::Duration;

use futures::{stream, StreamExt};

use super::{tasks, Strategy};
use crate::{config::Workload, error::Result, timing, timing::Measurement};

/// Resolves to the number of links once the last one has finished.
pub async fn chained(links: usize, delay: Duration) -> usize {
    stream::iter(0..links)
        .then(move |index| tasks::async_task(index, delay))
        .fold(0, |done, _| async move { done + 1 })
        .await
}

pub fn run(strategy: Strategy, workload: &Workload) -> Result<Measurement> {
    let ideal = strategy.ideal(workload);
    let rt = tasks::runtime()?;

    timing::measure(strategy.label(), workload.tasks, ideal, || {
        Ok(rt.block_on(chained(workload.tasks, workload.delay)))
    })
}
