//! Stopwatch and the per-run measurement it produces.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub label: &'static str,
    pub tasks: usize,
    pub completed: usize,
    pub elapsed: Duration,
    /// Elapsed time the strategy would need with zero scheduling cost.
    pub ideal: Duration,
}

impl Measurement {
    pub fn overhead(&self) -> Duration {
        self.elapsed.saturating_sub(self.ideal)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<14} {:.3} sec  ({}/{} tasks, ideal {:.3} sec)",
            self.label,
            self.elapsed.as_secs_f64(),
            self.completed,
            self.tasks,
            self.ideal.as_secs_f64(),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Time `run`, which must only return once every unit it created is done.
/// It reports how many units completed.
pub fn measure<F>(label: &'static str, tasks: usize, ideal: Duration, run: F) -> Result<Measurement>
where
    F: FnOnce() -> Result<usize>,
{
    let watch = Stopwatch::start();
    let completed = run()?;
    let elapsed = watch.elapsed();

    let measurement = Measurement {
        label,
        tasks,
        completed,
        elapsed,
        ideal,
    };
    tracing::info!(
        label,
        tasks,
        completed,
        elapsed_ms = elapsed.as_millis() as u64,
        overhead_ms = measurement.overhead().as_millis() as u64,
        "measurement finished"
    );
    Ok(measurement)
}

/// `delay * n`, saturating instead of overflowing.
pub fn scaled(delay: Duration, n: usize) -> Duration {
    delay.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX))
}
