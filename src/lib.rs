//! Wall-clock comparisons of running many fixed-delay tasks sequentially and
//! concurrently: blocking calls, chained futures, OS threads, a fixed thread
//! pool, tokio tasks, and stackful coroutines on an in-crate scheduler.

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
compile_error!("the coroutine context switch is x86_64 System V assembly; only x86_64 Linux is supported");

pub mod config;
pub mod context;
pub mod coroutines;
pub mod error;
pub mod stack;
pub mod strategies;
pub mod timing;
pub mod trace;

pub use config::{Config, Workload};
pub use error::{Error, Result};
pub use strategies::Strategy;
pub use timing::Measurement;
pub use trace::init_tracing;
