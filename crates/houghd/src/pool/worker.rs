//! Parent-side handle to one worker child process.

use std::io;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use hough_protocol::{Circle, FrameError, decode_json, read_frame_or_eof, write_frame, write_json};

use super::protocol::{WorkerReply, WorkerRequest};
use super::{DetectionTask, POOL_TARGET, PoolError, TaskError, WorkerCommand};

const READY_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Replies are tiny; anything larger is a protocol error.
const REPLY_FRAME_LIMIT: u64 = 64 * 1024;

/// Child handle shared between a slot and the pool, so the pool can kill a
/// stuck worker at the shutdown deadline.
pub(crate) type ChildCell = Arc<Mutex<Option<Child>>>;

enum ReaderEvent {
    Reply(WorkerReply),
    Malformed(String),
    Closed,
}

pub(crate) struct WorkerProcess {
    slot: usize,
    pid: u32,
    stdin: Option<ChildStdin>,
    replies: Receiver<ReaderEvent>,
    child: ChildCell,
}

impl WorkerProcess {
    /// Launches the worker and waits for its ready message.
    pub(crate) fn spawn(
        command: &WorkerCommand,
        slot: usize,
        child: &ChildCell,
    ) -> Result<Self, PoolError> {
        let program = command.program.display().to_string();
        let mut process = Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| PoolError::Spawn {
                program: program.clone(),
                source: Arc::new(source),
            })?;

        let pipes = process.stdin.take().zip(process.stdout.take());
        let Some((stdin, stdout)) = pipes else {
            reap(&mut process);
            return Err(PoolError::Pipes {
                program,
                stream: "stdin/stdout",
            });
        };
        let pid = process.id();
        let replies = spawn_reader(stdout, slot);
        store_child(child, process);

        let mut worker = Self {
            slot,
            pid,
            stdin: Some(stdin),
            replies,
            child: Arc::clone(child),
        };
        match worker.replies.recv_timeout(READY_TIMEOUT) {
            Ok(ReaderEvent::Reply(WorkerReply::Ready)) => {
                debug!(target: POOL_TARGET, slot, pid, "worker ready");
                Ok(worker)
            }
            outcome => {
                worker.kill();
                Err(PoolError::Handshake {
                    program,
                    message: describe_handshake(outcome),
                })
            }
        }
    }

    /// Sends a task and waits for its outcome.
    ///
    /// When this returns an error for which [`TaskError::poisons_worker`]
    /// holds, the worker must be killed and replaced.
    pub(crate) fn run(
        &mut self,
        task: &DetectionTask,
        timeout: Option<Duration>,
    ) -> Result<Option<Circle>, TaskError> {
        self.send(task).map_err(|error| {
            debug!(
                target: POOL_TARGET,
                slot = self.slot,
                pid = self.pid,
                error = %error,
                "failed to send task to worker"
            );
            TaskError::WorkerDied
        })?;

        let event = match timeout {
            Some(limit) => match self.replies.recv_timeout(limit) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Err(TaskError::Timeout { timeout: limit }),
                Err(RecvTimeoutError::Disconnected) => ReaderEvent::Closed,
            },
            None => self.replies.recv().unwrap_or(ReaderEvent::Closed),
        };

        match event {
            ReaderEvent::Reply(WorkerReply::Shape { x, y, r }) => Ok(Some(Circle { x, y, r })),
            ReaderEvent::Reply(WorkerReply::NoMatch) => Ok(None),
            ReaderEvent::Reply(WorkerReply::Fault { message }) => Err(TaskError::Fault { message }),
            ReaderEvent::Reply(WorkerReply::Ready) => Err(TaskError::Protocol {
                message: String::from("unexpected ready message"),
            }),
            ReaderEvent::Malformed(message) => Err(TaskError::Protocol { message }),
            ReaderEvent::Closed => Err(TaskError::WorkerDied),
        }
    }

    fn send(&mut self, task: &DetectionTask) -> Result<(), FrameError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| FrameError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))?;
        write_json(stdin, &WorkerRequest::detect(task))?;
        write_frame(stdin, &task.record.pixels)
    }

    /// Kills the child immediately and reaps it.
    pub(crate) fn kill(&mut self) {
        self.stdin = None;
        if let Some(mut process) = take_child(&self.child) {
            reap(&mut process);
        }
    }

    /// Asks the worker to exit, killing it if it lingers past `grace`.
    pub(crate) fn exit(mut self, grace: Duration) {
        if let Some(stdin) = self.stdin.as_mut() {
            let _ = write_json(stdin, &WorkerRequest::Exit);
        }
        self.stdin = None;

        let deadline = Instant::now() + grace;
        loop {
            let status = {
                let Ok(mut guard) = self.child.lock() else {
                    return;
                };
                let Some(process) = guard.as_mut() else {
                    return;
                };
                match process.try_wait() {
                    Ok(Some(status)) => Some(status),
                    Ok(None) => None,
                    Err(error) => {
                        warn!(target: POOL_TARGET, slot = self.slot, error = %error, "failed to poll worker");
                        None
                    }
                }
            };
            if let Some(status) = status {
                debug!(target: POOL_TARGET, slot = self.slot, pid = self.pid, %status, "worker exited");
                let _ = take_child(&self.child);
                return;
            }
            if Instant::now() >= deadline {
                warn!(target: POOL_TARGET, slot = self.slot, pid = self.pid, "worker ignored exit request");
                self.kill();
                return;
            }
            thread::sleep(EXIT_POLL);
        }
    }
}

fn spawn_reader(mut stdout: ChildStdout, slot: usize) -> Receiver<ReaderEvent> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        loop {
            let event = match read_frame_or_eof(&mut stdout, REPLY_FRAME_LIMIT) {
                Ok(Some(payload)) => match decode_json::<WorkerReply>(&payload) {
                    Ok(reply) => ReaderEvent::Reply(reply),
                    Err(error) => ReaderEvent::Malformed(error.to_string()),
                },
                Ok(None) => ReaderEvent::Closed,
                Err(error) if error.is_transport() => {
                    debug!(target: POOL_TARGET, slot, error = %error, "worker output ended");
                    ReaderEvent::Closed
                }
                Err(error) => ReaderEvent::Malformed(error.to_string()),
            };
            let last = matches!(event, ReaderEvent::Closed);
            if sender.send(event).is_err() || last {
                break;
            }
        }
    });
    receiver
}

fn describe_handshake(outcome: Result<ReaderEvent, RecvTimeoutError>) -> String {
    match outcome {
        Ok(ReaderEvent::Reply(reply)) => format!("unexpected reply {reply:?}"),
        Ok(ReaderEvent::Malformed(message)) => message,
        Ok(ReaderEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
            String::from("process exited before reporting ready")
        }
        Err(RecvTimeoutError::Timeout) => format!("no ready message within {READY_TIMEOUT:?}"),
    }
}

fn store_child(cell: &ChildCell, mut process: Child) {
    match cell.lock() {
        Ok(mut guard) => *guard = Some(process),
        Err(_) => reap(&mut process),
    }
}

fn take_child(cell: &ChildCell) -> Option<Child> {
    cell.lock().ok().and_then(|mut guard| guard.take())
}

/// Kills `process` if it is still running and collects its status.
pub(crate) fn reap(process: &mut Child) {
    if let Err(error) = process.kill()
        && error.kind() != io::ErrorKind::InvalidInput
    {
        debug!(target: POOL_TARGET, error = %error, "failed to kill worker");
    }
    let _ = process.wait();
}
