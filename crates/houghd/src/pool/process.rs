//! The process-backed [`TaskRunner`].

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use hough_config::Config;
use hough_protocol::Circle;

use super::worker::{ChildCell, WorkerProcess, reap};
use super::{
    DetectionTask, MAX_FRAME_BYTES_ENV, POOL_TARGET, PendingTask, PoolError, TaskCompleter,
    TaskError, TaskRunner,
};

const JOIN_POLL: Duration = Duration::from_millis(20);

/// Grace period a worker gets to honour an exit request.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// How to launch a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed to every worker.
    pub args: Vec<OsString>,
    /// Extra environment variables for every worker.
    pub envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    /// A command running `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Settings for [`ProcessPool::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessPoolConfig {
    /// Number of worker processes; zero is treated as one.
    pub workers: usize,
    /// Worker launch command.
    pub command: WorkerCommand,
    /// Per-task compute budget; `None` waits indefinitely.
    pub task_timeout: Option<Duration>,
    /// Bound on the wait for queued tasks during shutdown.
    pub shutdown_timeout: Duration,
    /// Largest pixel frame a worker accepts.
    pub max_frame_bytes: u64,
}

impl ProcessPoolConfig {
    /// Derives pool settings from the server configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.worker_count(),
            command: WorkerCommand::new(config.worker_program().into_std_path_buf()),
            task_timeout: config.task_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            max_frame_bytes: config.max_frame_bytes(),
        }
    }
}

/// Counters describing pool activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks that produced a shape or a no-match outcome.
    pub tasks_completed: u64,
    /// Tasks that ended in a [`TaskError`].
    pub task_faults: u64,
    /// Workers replaced after dying, timing out or misbehaving.
    pub worker_restarts: u64,
}

struct Job {
    task: DetectionTask,
    completer: TaskCompleter,
}

#[derive(Default)]
struct Shared {
    abort: AtomicBool,
    tasks_completed: AtomicU64,
    task_faults: AtomicU64,
    worker_restarts: AtomicU64,
}

struct Slot {
    handle: JoinHandle<()>,
    child: ChildCell,
}

/// Fixed-size pool of worker processes fed from one shared queue.
///
/// Workers are started eagerly so a missing or broken worker program is
/// reported by [`ProcessPool::start`] rather than by the first request.
pub struct ProcessPool {
    sender: Mutex<Option<Sender<Job>>>,
    slots: Mutex<Vec<Slot>>,
    shared: Arc<Shared>,
    shutdown_timeout: Duration,
}

impl ProcessPool {
    /// Spawns every worker and its slot thread.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if a worker cannot be launched or never reports
    /// ready. Workers already started are killed.
    pub fn start(config: ProcessPoolConfig) -> Result<Self, PoolError> {
        let workers = config.workers.max(1);
        let command = Arc::new(
            config
                .command
                .clone()
                .env(MAX_FRAME_BYTES_ENV, config.max_frame_bytes.to_string()),
        );
        let (sender, receiver) = mpsc::channel::<Job>();
        let queue = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared::default());

        let mut slots = Vec::with_capacity(workers);
        for index in 0..workers {
            match start_slot(index, &command, &queue, &shared, config.task_timeout) {
                Ok(slot) => slots.push(slot),
                Err(error) => {
                    shared.abort.store(true, Ordering::SeqCst);
                    drop(sender);
                    for slot in slots {
                        kill_slot(&slot);
                        let _ = slot.handle.join();
                    }
                    return Err(error);
                }
            }
        }

        info!(
            target: POOL_TARGET,
            workers,
            program = %command.program.display(),
            task_timeout_ms = config.task_timeout.map(|timeout| timeout.as_millis()),
            "worker pool started"
        );
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            slots: Mutex::new(slots),
            shared,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            tasks_completed: self.shared.tasks_completed.load(Ordering::Relaxed),
            task_faults: self.shared.task_faults.load(Ordering::Relaxed),
            worker_restarts: self.shared.worker_restarts.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting tasks, drains the queue and stops every worker.
    ///
    /// Slots still busy when `shutdown_timeout` elapses have their workers
    /// killed; tasks still queued then fail with [`TaskError::PoolClosed`].
    /// Calling this more than once is harmless.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let slots = std::mem::take(&mut *self.slots.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = Instant::now() + self.shutdown_timeout;
        while Instant::now() < deadline && slots.iter().any(|slot| !slot.handle.is_finished()) {
            thread::sleep(JOIN_POLL);
        }
        if slots.iter().any(|slot| !slot.handle.is_finished()) {
            warn!(
                target: POOL_TARGET,
                timeout_ms = self.shutdown_timeout.as_millis(),
                "worker pool did not drain in time; killing workers"
            );
            self.shared.abort.store(true, Ordering::SeqCst);
            for slot in &slots {
                kill_slot(slot);
            }
        }
        for slot in slots {
            if slot.handle.join().is_err() {
                warn!(target: POOL_TARGET, "pool slot thread panicked");
            }
        }

        let stats = self.stats();
        info!(
            target: POOL_TARGET,
            tasks_completed = stats.tasks_completed,
            task_faults = stats.task_faults,
            worker_restarts = stats.worker_restarts,
            "worker pool stopped"
        );
    }
}

impl TaskRunner for ProcessPool {
    fn submit(&self, task: DetectionTask) -> PendingTask {
        let (completer, pending) = PendingTask::channel();
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => {
                if let Err(mpsc::SendError(job)) = sender.send(Job { task, completer }) {
                    job.completer.complete(Err(TaskError::PoolClosed));
                }
            }
            None => completer.complete(Err(TaskError::PoolClosed)),
        }
        pending
    }

    fn close(&self) {
        self.shutdown();
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn start_slot(
    index: usize,
    command: &Arc<WorkerCommand>,
    queue: &Arc<Mutex<Receiver<Job>>>,
    shared: &Arc<Shared>,
    task_timeout: Option<Duration>,
) -> Result<Slot, PoolError> {
    let child: ChildCell = Arc::new(Mutex::new(None));
    let worker = WorkerProcess::spawn(command, index, &child)?;
    let context = SlotContext {
        index,
        command: Arc::clone(command),
        queue: Arc::clone(queue),
        shared: Arc::clone(shared),
        child: Arc::clone(&child),
        task_timeout,
    };
    let spawned = thread::Builder::new()
        .name(format!("hough-pool-{index}"))
        .spawn(move || context.run(worker));
    match spawned {
        Ok(handle) => Ok(Slot { handle, child }),
        Err(source) => {
            if let Some(mut process) = child.lock().ok().and_then(|mut guard| guard.take()) {
                reap(&mut process);
            }
            Err(PoolError::Thread {
                source: Arc::new(source),
            })
        }
    }
}

fn kill_slot(slot: &Slot) {
    let process = slot
        .child
        .lock()
        .ok()
        .and_then(|mut guard| guard.take());
    if let Some(mut process) = process {
        reap(&mut process);
    }
}

struct SlotContext {
    index: usize,
    command: Arc<WorkerCommand>,
    queue: Arc<Mutex<Receiver<Job>>>,
    shared: Arc<Shared>,
    child: ChildCell,
    task_timeout: Option<Duration>,
}

impl SlotContext {
    fn run(self, first: WorkerProcess) {
        let mut worker = Some(first);
        while let Some(job) = self.next_job() {
            if self.shared.abort.load(Ordering::SeqCst) {
                job.completer.complete(Err(TaskError::PoolClosed));
                continue;
            }
            let outcome = match worker.as_mut() {
                Some(process) => process.run(&job.task, self.task_timeout),
                None => Err(TaskError::Spawn {
                    message: String::from("worker unavailable after a failed restart"),
                }),
            };
            self.record(job.task.id(), &outcome);
            let poisoned = outcome.as_ref().err().is_some_and(TaskError::poisons_worker);
            job.completer.complete(outcome);

            if poisoned || worker.is_none() {
                if let Some(mut process) = worker.take() {
                    process.kill();
                }
                worker = self.respawn();
            }
        }

        if let Some(process) = worker {
            process.exit(EXIT_GRACE);
        }
        debug!(target: POOL_TARGET, slot = self.index, "pool slot stopped");
    }

    fn next_job(&self) -> Option<Job> {
        let queue = self.queue.lock().ok()?;
        queue.recv().ok()
    }

    fn record(&self, id: &str, outcome: &Result<Option<Circle>, TaskError>) {
        match outcome {
            Ok(_) => {
                self.shared.tasks_completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.shared.task_faults.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: POOL_TARGET,
                    slot = self.index,
                    roi = id,
                    error = %error,
                    "detection task failed"
                );
            }
        }
    }

    fn respawn(&self) -> Option<WorkerProcess> {
        if self.shared.abort.load(Ordering::SeqCst) {
            return None;
        }
        self.shared.worker_restarts.fetch_add(1, Ordering::Relaxed);
        match WorkerProcess::spawn(&self.command, self.index, &self.child) {
            Ok(process) => {
                info!(target: POOL_TARGET, slot = self.index, "worker restarted");
                Some(process)
            }
            Err(error) => {
                warn!(
                    target: POOL_TARGET,
                    slot = self.index,
                    error = %error,
                    "failed to restart worker"
                );
                None
            }
        }
    }
}
