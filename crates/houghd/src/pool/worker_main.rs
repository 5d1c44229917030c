//! The loop run inside each `hough-worker` process.

use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use hough_detect::{EdgeThresholds, RadiusRange, detect_in_buffer};
use hough_protocol::{
    Circle, DEFAULT_MAX_FRAME_BYTES, FrameError, decode_json, read_frame, read_frame_or_eof,
    write_json,
};

use super::protocol::{WorkerReply, WorkerRequest};

/// Environment variable holding a [`FaultInjection`] directive.
pub const FAULT_INJECTION_ENV: &str = "HOUGH_WORKER_FAULT_INJECTION";

/// Environment variable carrying the pixel frame limit from the pool.
pub const MAX_FRAME_BYTES_ENV: &str = "HOUGH_WORKER_MAX_FRAME_BYTES";

/// Errors that end the worker loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Reading or writing a frame failed.
    #[error("worker stream failed: {0}")]
    Frame(#[from] FrameError),
    /// The parent sent a request the worker does not understand.
    #[error("malformed worker request: {0}")]
    Request(#[source] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    Abort,
    Stall,
    Panic,
}

/// Deliberate misbehaviour for one region id, used to exercise the pool's
/// fault handling.
///
/// Parsed from `abort:<id>`, `stall:<id>` or `panic:<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultInjection {
    kind: FaultKind,
    id: String,
}

/// An unrecognised fault injection directive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised fault injection '{0}'; expected abort:<id>, stall:<id> or panic:<id>")]
pub struct FaultInjectionParseError(String);

impl FromStr for FaultInjection {
    type Err = FaultInjectionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || FaultInjectionParseError(value.to_owned());
        let (kind, id) = value.split_once(':').ok_or_else(invalid)?;
        let kind = match kind {
            "abort" => FaultKind::Abort,
            "stall" => FaultKind::Stall,
            "panic" => FaultKind::Panic,
            _ => return Err(invalid()),
        };
        if id.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            kind,
            id: id.to_owned(),
        })
    }
}

impl FaultInjection {
    fn trigger(&self, id: &str) {
        if self.id != id {
            return;
        }
        match self.kind {
            FaultKind::Abort => std::process::abort(),
            FaultKind::Stall => loop {
                thread::sleep(Duration::from_secs(3600));
            },
            FaultKind::Panic => panic!("injected fault for roi '{id}'"),
        }
    }
}

/// Serves detection requests until the parent asks the worker to exit or
/// closes `input`.
///
/// Panics raised by detection are caught and reported as faults, so the
/// worker survives them.
///
/// # Errors
///
/// Returns [`WorkerError`] when the streams fail or a request cannot be
/// decoded; the worker should then exit with a failure status.
pub fn run_worker<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    max_frame_bytes: u64,
    fault: Option<&FaultInjection>,
) -> Result<(), WorkerError> {
    write_json(output, &WorkerReply::Ready)?;
    while let Some(payload) = read_frame_or_eof(input, max_frame_bytes)? {
        let request: WorkerRequest = decode_json(&payload).map_err(WorkerError::Request)?;
        let WorkerRequest::Detect {
            id,
            height,
            width,
            min_radius,
            max_radius,
            low,
            high,
        } = request
        else {
            return Ok(());
        };
        let pixels = read_frame(input, max_frame_bytes)?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if let Some(fault) = fault {
                fault.trigger(&id);
            }
            detect(width, height, pixels, (min_radius, max_radius), (low, high))
        }));
        let reply = match outcome {
            Ok(Ok(circle)) => WorkerReply::from_circle(circle),
            Ok(Err(message)) => WorkerReply::Fault { message },
            Err(payload) => WorkerReply::Fault {
                message: panic_message(payload.as_ref()),
            },
        };
        write_json(output, &reply)?;
    }
    Ok(())
}

/// Reads the frame limit passed down by the pool.
#[must_use]
pub fn max_frame_bytes_from_env() -> u64 {
    std::env::var(MAX_FRAME_BYTES_ENV)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_MAX_FRAME_BYTES)
}

/// Runs detection for a task in the current process.
#[cfg(test)]
pub(crate) fn detect_task(task: super::DetectionTask) -> Result<Option<Circle>, String> {
    let spec = task.record.spec;
    detect(
        spec.width,
        spec.height,
        task.record.pixels,
        (spec.min_radius, spec.max_radius),
        (task.thresholds.low, task.thresholds.high),
    )
}

fn detect(
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    (min_radius, max_radius): (u32, u32),
    (low, high): (u8, u8),
) -> Result<Option<Circle>, String> {
    let radii = RadiusRange::new(min_radius, max_radius).map_err(|error| error.to_string())?;
    let thresholds = EdgeThresholds::new(low, high);
    let detection = detect_in_buffer(width, height, pixels, radii, thresholds)
        .map_err(|error| error.to_string())?;
    Ok(detection.map(|found| Circle {
        x: f64::from(found.x),
        y: f64::from(found.y),
        r: f64::from(found.radius),
    }))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("detection panicked"))
}
