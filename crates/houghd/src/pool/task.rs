//! Task submission interface shared by every runner.

use std::sync::mpsc::{self, Receiver, SyncSender};

use hough_protocol::{Circle, RoiRecord, Thresholds};

use super::TaskError;

/// One region to analyse, with the thresholds of its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionTask {
    /// Region spec and pixels.
    pub record: RoiRecord,
    /// Canny thresholds shared by the batch.
    pub thresholds: Thresholds,
}

impl DetectionTask {
    /// Bundles a record with its batch thresholds.
    #[must_use]
    pub const fn new(record: RoiRecord, thresholds: Thresholds) -> Self {
        Self { record, thresholds }
    }

    /// Identifier of the region.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.spec.id
    }
}

type Outcome = Result<Option<Circle>, TaskError>;

/// Executes detection tasks on behalf of connection handlers.
///
/// Implementations must tolerate concurrent `submit` calls from many
/// threads. A submitted task runs to completion even if its
/// [`PendingTask`] is dropped.
pub trait TaskRunner: Send + Sync {
    /// Queues a task and returns a handle to its eventual outcome.
    fn submit(&self, task: DetectionTask) -> PendingTask;

    /// Stops accepting work and waits, bounded, for queued tasks to finish.
    fn close(&self) {}
}

/// Handle to the outcome of a submitted task.
#[derive(Debug)]
pub struct PendingTask {
    receiver: Receiver<Outcome>,
}

impl PendingTask {
    /// Creates a linked completer/handle pair.
    #[must_use]
    pub fn channel() -> (TaskCompleter, Self) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (TaskCompleter { sender }, Self { receiver })
    }

    /// A handle whose outcome is already known.
    #[must_use]
    pub fn ready(outcome: Outcome) -> Self {
        let (completer, pending) = Self::channel();
        completer.complete(outcome);
        pending
    }

    /// Blocks until the task finishes.
    ///
    /// # Errors
    ///
    /// Returns the task's [`TaskError`], or [`TaskError::Abandoned`] if the
    /// runner dropped the task without completing it.
    pub fn wait(self) -> Outcome {
        self.receiver.recv().unwrap_or(Err(TaskError::Abandoned))
    }
}

/// Sending half paired with a [`PendingTask`].
#[derive(Debug)]
pub struct TaskCompleter {
    sender: SyncSender<Outcome>,
}

impl TaskCompleter {
    /// Delivers the outcome. A handle that was already dropped is ignored.
    pub fn complete(self, outcome: Outcome) {
        let _ = self.sender.try_send(outcome);
    }
}
