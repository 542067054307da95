use std::io;

use nix::errno::Errno;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn OS thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("task did not complete: {0}")]
    Join(String),

    #[error("failed to map coroutine stack: {0}")]
    Stack(#[source] Errno),

    #[error("poll failed: {0}")]
    Poll(#[source] Errno),

    /// Nothing is runnable and nothing is pending on a timer or a descriptor.
    #[error("no runnable coroutines and nothing to wait for")]
    Deadlock,

    #[error("join_all must be called from the thread's main context")]
    NotMainContext,

    #[error("{0} coroutine(s) panicked")]
    CoroutinePanicked(usize),

    #[error("worker result channel closed before all tasks reported")]
    ChannelClosed,
}

impl Error {
    /// Renders a panic payload from `JoinHandle::join` into a `Join` error.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panicked".to_string()
        };
        Error::Join(msg)
    }
}
