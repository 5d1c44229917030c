//! Process pool that runs detection tasks.
//!
//! Every slot of a [`ProcessPool`] owns one `hough-worker` child process and
//! feeds it tasks from a shared queue. Callers interact with the pool only
//! through [`TaskRunner`], so connection handlers can share it freely and
//! tests can substitute in-process runners.
//!
//! The worker side of the conversation lives in [`run_worker`]; the
//! `hough-worker` binary is a thin wrapper around it.

mod errors;
mod process;
mod protocol;
mod task;
mod worker;
mod worker_main;

pub use self::errors::{PoolError, TaskError};
pub use self::process::{PoolStats, ProcessPool, ProcessPoolConfig, WorkerCommand};
pub use self::task::{DetectionTask, PendingTask, TaskCompleter, TaskRunner};
pub use self::worker_main::{
    FAULT_INJECTION_ENV, FaultInjection, FaultInjectionParseError, MAX_FRAME_BYTES_ENV,
    WorkerError, max_frame_bytes_from_env, run_worker,
};
#[cfg(test)]
pub(crate) use self::worker_main::detect_task;

pub(crate) const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");

#[cfg(test)]
mod tests;
