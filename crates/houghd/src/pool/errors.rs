//! Error types for the worker pool.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single detection task.
///
/// The display text becomes the `error` field of that item's result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Detection raised inside the worker.
    #[error("detection failed: {message}")]
    Fault {
        /// Description reported by the worker.
        message: String,
    },
    /// The worker process exited before answering.
    #[error("worker process exited during detection")]
    WorkerDied,
    /// The task exceeded the configured compute budget.
    #[error("detection timed out after {timeout:?}")]
    Timeout {
        /// Configured per-task budget.
        timeout: Duration,
    },
    /// The worker replied with something other than a task outcome.
    #[error("worker protocol error: {message}")]
    Protocol {
        /// What went wrong.
        message: String,
    },
    /// The pool no longer accepts work.
    #[error("worker pool is closed")]
    PoolClosed,
    /// The runner dropped the task without reporting an outcome.
    #[error("detection task was abandoned")]
    Abandoned,
    /// No worker could be started for the task.
    #[error("failed to start worker: {message}")]
    Spawn {
        /// Spawn failure description.
        message: String,
    },
}

impl TaskError {
    /// Returns `true` when the worker that ran the task cannot be reused.
    #[must_use]
    pub const fn poisons_worker(&self) -> bool {
        matches!(
            self,
            Self::WorkerDied | Self::Timeout { .. } | Self::Protocol { .. }
        )
    }
}

/// Errors raised while starting the pool.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The worker program could not be launched.
    #[error("failed to spawn worker '{program}': {source}")]
    Spawn {
        /// Program path.
        program: String,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The child did not expose the expected pipes.
    #[error("worker '{program}' is missing its {stream} pipe")]
    Pipes {
        /// Program path.
        program: String,
        /// `stdin` or `stdout`.
        stream: &'static str,
    },
    /// The worker never reported that it was ready.
    #[error("worker '{program}' did not become ready: {message}")]
    Handshake {
        /// Program path.
        program: String,
        /// What was received instead.
        message: String,
    },
    /// A pool thread could not be started.
    #[error("failed to start pool thread: {source}")]
    Thread {
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },
}
