//! Messages exchanged with worker processes.
//!
//! Both directions use the wire codec's length-prefixed frames. A
//! [`WorkerRequest::Detect`] frame is followed by one binary frame holding
//! the region's pixels.

use serde::{Deserialize, Serialize};

use hough_protocol::Circle;

use super::DetectionTask;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WorkerRequest {
    Detect {
        id: String,
        height: u32,
        width: u32,
        min_radius: u32,
        max_radius: u32,
        low: u8,
        high: u8,
    },
    Exit,
}

impl WorkerRequest {
    pub(crate) fn detect(task: &DetectionTask) -> Self {
        let spec = &task.record.spec;
        Self::Detect {
            id: spec.id.clone(),
            height: spec.height,
            width: spec.width,
            min_radius: spec.min_radius,
            max_radius: spec.max_radius,
            low: task.thresholds.low,
            high: task.thresholds.high,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WorkerReply {
    Ready,
    Shape { x: f64, y: f64, r: f64 },
    NoMatch,
    Fault { message: String },
}

impl WorkerReply {
    pub(crate) fn from_circle(circle: Option<Circle>) -> Self {
        circle.map_or(Self::NoMatch, |Circle { x, y, r }| Self::Shape { x, y, r })
    }
}
