//! Serde types for detection headers and responses.
//!
//! These types describe the wire shape only. Anything that deserialises into
//! them still has to pass [`crate::validate`] before it is trusted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Discriminator carried in the `type` field of every header and response.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Batch circle detection.
    #[default]
    Detect,
}

/// Canny hysteresis thresholds shared by every item in a batch.
///
/// Values are carried as wide integers so that out-of-range input reaches
/// the validator instead of failing inside serde with a vaguer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectParams {
    /// Lower hysteresis threshold.
    pub low: u32,
    /// Upper hysteresis threshold.
    pub high: u32,
}

impl DetectParams {
    /// Builds parameters from in-range thresholds.
    #[must_use]
    pub fn new(low: u8, high: u8) -> Self {
        Self {
            low: u32::from(low),
            high: u32::from(high),
        }
    }
}

/// Describes one region of interest and the binary frame that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiSpec {
    /// Caller-chosen identifier, unique within the batch.
    pub id: String,
    /// Region height in pixels.
    pub height: u32,
    /// Region width in pixels.
    pub width: u32,
    /// Length of the binary frame; always `height * width`.
    pub num_bytes: u64,
    /// Smallest radius searched, inclusive.
    pub min_radius: u32,
    /// Largest radius searched, exclusive.
    pub max_radius: u32,
}

impl RoiSpec {
    /// Number of pixels implied by the region's dimensions.
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.height) * u64::from(self.width)
    }
}

/// The JSON header that opens a detection request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectRequest {
    /// Message discriminator; absent means `detect`.
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    /// Thresholds applied to every region.
    pub params: DetectParams,
    /// Ordered region descriptions; response order follows this order.
    pub roi_specs: Vec<RoiSpec>,
}

impl DetectRequest {
    /// Builds a detection header.
    #[must_use]
    pub const fn new(params: DetectParams, roi_specs: Vec<RoiSpec>) -> Self {
        Self {
            kind: MessageType::Detect,
            params,
            roi_specs,
        }
    }
}

/// A detected circle in region-local pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Column of the centre.
    pub x: f64,
    /// Row of the centre.
    pub y: f64,
    /// Radius in pixels.
    pub r: f64,
}

/// Outcome for one region of a batch.
///
/// `shape` and `error` both `None` means the detector found no confident
/// match, which is not a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiResult {
    /// Identifier copied from the matching [`RoiSpec`].
    pub id: String,
    /// Detected circle, if any.
    pub shape: Option<Circle>,
    /// Per-item failure description.
    pub error: Option<String>,
}

impl RoiResult {
    /// A result carrying a detected circle.
    #[must_use]
    pub const fn matched(id: String, circle: Circle) -> Self {
        Self {
            id,
            shape: Some(circle),
            error: None,
        }
    }

    /// A result reporting that nothing confident was found.
    #[must_use]
    pub const fn no_match(id: String) -> Self {
        Self {
            id,
            shape: None,
            error: None,
        }
    }

    /// A result reporting a per-item fault.
    #[must_use]
    pub fn failed(id: String, error: impl Into<String>) -> Self {
        Self {
            id,
            shape: None,
            error: Some(error.into()),
        }
    }
}

/// The single JSON frame answering a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    /// Message discriminator.
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    /// `false` only when the whole batch failed.
    pub ok: bool,
    /// One entry per requested region, in request order.
    #[serde(default)]
    pub results: Vec<RoiResult>,
    /// Wall-clock dispatch time in milliseconds, two decimal places.
    #[serde(default)]
    pub elapsed_ms: Option<f64>,
    /// Batch-level failure description.
    #[serde(default)]
    pub error: Option<String>,
}

impl DetectResponse {
    /// A successful batch response.
    #[must_use]
    pub fn success(results: Vec<RoiResult>, elapsed: Duration) -> Self {
        Self {
            kind: MessageType::Detect,
            ok: true,
            results,
            elapsed_ms: Some(round_millis(elapsed)),
            error: None,
        }
    }

    /// A whole-batch failure with no results.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Detect,
            ok: false,
            results: Vec::new(),
            elapsed_ms: None,
            error: Some(message.into()),
        }
    }
}

#[expect(clippy::float_arithmetic, reason = "elapsed time is reported in fractional milliseconds")]
fn round_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}
