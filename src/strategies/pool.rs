//! Fixed-size worker pool. Each submitted job gets a one-shot channel that
//! acts as its future.

use std::{
    panic::{self, AssertUnwindSafe},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::{blocking_task, Strategy};
use crate::{
    config::Workload,
    error::{Error, Result},
    timing::{self, Measurement},
};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(size: usize, stack_size: usize) -> Result<Self> {
        let (jobs, queue) = unbounded::<Job>();
        let mut pool = Self {
            jobs: Some(jobs),
            workers: Vec::with_capacity(size),
        };

        for n in 0..size.max(1) {
            let queue = queue.clone();
            let worker = thread::Builder::new()
                .name(format!("pool-{n}"))
                .stack_size(stack_size)
                .spawn(move || {
                    for job in queue.iter() {
                        job();
                    }
                })
                .map_err(Error::Spawn)?;
            pool.workers.push(worker);
        }
        Ok(pool)
    }

    /// Queue `f`; the returned receiver yields its outcome once a worker has
    /// run it, `Err` carrying the panic payload if it panicked. It
    /// disconnects without a value only if the job never ran.
    pub fn submit<F, T>(&self, f: F) -> Receiver<thread::Result<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result, future) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = result.send(panic::catch_unwind(AssertUnwindSafe(f)));
        });
        if let Some(jobs) = &self.jobs {
            if jobs.send(job).is_err() {
                tracing::warn!("pool has no workers left; job dropped");
            }
        }
        future
    }

    /// Let the workers drain the queue, then join them.
    pub fn shutdown(mut self) -> Result<()> {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            worker.join().map_err(Error::from_panic)?;
        }
        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

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
        let pool = ThreadPool::new(workload.workers, workload.thread_stack)?;
        let pending: Vec<Receiver<thread::Result<usize>>> = (0..workload.tasks)
            .map(|index| pool.submit(move || task(index, delay)))
            .collect();

        let mut completed = 0;
        for future in pending {
            future
                .recv()
                .map_err(|_| Error::ChannelClosed)?
                .map_err(Error::from_panic)?;
            completed += 1;
        }
        pool.shutdown()?;
        Ok(completed)
    })
}
