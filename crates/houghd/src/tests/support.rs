//! In-process runners and wire helpers shared by the crate's tests.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use hough_protocol::{
    DEFAULT_MAX_FRAME_BYTES, DetectParams, DetectRequest, DetectResponse, FrameError, RoiSpec,
    read_frame_or_eof, read_json, write_frame, write_json,
};

use crate::pool::{DetectionTask, PendingTask, TaskError, TaskRunner, detect_task};

/// Runs detection on a fresh thread per task, optionally faulting or
/// delaying chosen region ids.
#[derive(Default)]
pub(crate) struct InlineRunner {
    faults: HashSet<String>,
    delays: HashMap<String, Duration>,
    submitted: AtomicUsize,
    closed: AtomicBool,
}

impl InlineRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fault_on(mut self, id: &str) -> Self {
        self.faults.insert(id.to_owned());
        self
    }

    pub(crate) fn delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_owned(), delay);
        self
    }

    pub(crate) fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TaskRunner for InlineRunner {
    fn submit(&self, task: DetectionTask) -> PendingTask {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return PendingTask::ready(Err(TaskError::PoolClosed));
        }
        let fault = self.faults.contains(task.id());
        let delay = self.delays.get(task.id()).copied();
        let (completer, pending) = PendingTask::channel();
        thread::spawn(move || {
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            let outcome = if fault {
                Err(TaskError::Fault {
                    message: format!("injected fault for roi '{}'", task.id()),
                })
            } else {
                detect_task(task).map_err(|message| TaskError::Fault { message })
            };
            completer.complete(outcome);
        });
        pending
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A region image ready to be framed onto the wire.
#[derive(Debug, Clone)]
pub(crate) struct Roi {
    pub(crate) spec: RoiSpec,
    pub(crate) pixels: Vec<u8>,
}

impl Roi {
    pub(crate) fn new(id: &str, size: u32, pixels: Vec<u8>, radii: (u32, u32)) -> Self {
        Self {
            spec: RoiSpec {
                id: id.to_owned(),
                height: size,
                width: size,
                num_bytes: u64::from(size) * u64::from(size),
                min_radius: radii.0,
                max_radius: radii.1,
            },
            pixels,
        }
    }

    /// A square image with one bright disc.
    pub(crate) fn disc(id: &str, size: u32, centre: (i64, i64), radius: i64) -> Self {
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| (x, y)))
            .map(|(x, y)| {
                let dx = i64::from(x) - centre.0;
                let dy = i64::from(y) - centre.1;
                if dx * dx + dy * dy <= radius * radius { 255 } else { 0 }
            })
            .collect();
        Self::new(id, size, pixels, (5, 20))
    }

    /// A square image with no edges at all.
    pub(crate) fn blank(id: &str, size: u32) -> Self {
        let len = usize::try_from(size * size).expect("small image");
        Self::new(id, size, vec![0; len], (5, 20))
    }
}

/// Writes a request header followed by one pixel frame per region.
pub(crate) fn send_batch<W: Write>(stream: &mut W, rois: &[Roi]) {
    let request = DetectRequest::new(
        DetectParams::new(50, 150),
        rois.iter().map(|roi| roi.spec.clone()).collect(),
    );
    write_json(stream, &request).expect("write header");
    for roi in rois {
        write_frame(stream, &roi.pixels).expect("write pixels");
    }
}

pub(crate) fn read_response<R: Read>(stream: &mut R) -> DetectResponse {
    read_json(stream, DEFAULT_MAX_FRAME_BYTES).expect("read response")
}

/// Returns `true` once the peer has closed its side of the stream.
pub(crate) fn is_closed<R: Read>(stream: &mut R) -> bool {
    matches!(read_frame_or_eof(stream, DEFAULT_MAX_FRAME_BYTES), Ok(None) | Err(FrameError::Io(_)))
}
