//! Strict validation of decoded headers and pairing of pixel frames.
//!
//! The server obtains a [`ValidatedRequest`] through [`parse_header`]; clients
//! build one with [`ValidatedRequest::new`] before sending anything. The
//! server reads exactly [`ValidatedRequest::len`] binary frames after a
//! header, and turns each into a [`RoiRecord`] with [`RoiRecord::from_frame`].

use std::collections::HashSet;

use thiserror::Error;

use crate::codec::FrameError;
use crate::schema::{DetectRequest, RoiSpec};

/// Semantic problems found in a well-formed header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The batch lists no regions.
    #[error("roi_specs must not be empty")]
    EmptyBatch,
    /// A threshold lies outside 0..=255.
    #[error("params.{name} must be within 0..=255, got {value}")]
    ThresholdOutOfRange {
        /// Field name (`low` or `high`).
        name: &'static str,
        /// Offending value.
        value: u32,
    },
    /// A region has a zero dimension.
    #[error("roi '{id}': {field} must be positive")]
    ZeroDimension {
        /// Region identifier.
        id: String,
        /// Field name (`height` or `width`).
        field: &'static str,
    },
    /// A region declares an empty pixel frame.
    #[error("roi '{id}': num_bytes must be positive")]
    ZeroBytes {
        /// Region identifier.
        id: String,
    },
    /// `num_bytes` disagrees with the region dimensions.
    #[error("roi '{id}': num_bytes {num_bytes} does not equal height * width ({expected})")]
    ByteCountMismatch {
        /// Region identifier.
        id: String,
        /// Declared frame length.
        num_bytes: u64,
        /// `height * width`.
        expected: u64,
    },
    /// `min_radius` is zero.
    #[error("roi '{id}': min_radius must be positive")]
    ZeroMinRadius {
        /// Region identifier.
        id: String,
    },
    /// The radius range is empty.
    #[error("roi '{id}': max_radius ({max_radius}) must exceed min_radius ({min_radius})")]
    EmptyRadiusRange {
        /// Region identifier.
        id: String,
        /// Declared lower bound.
        min_radius: u32,
        /// Declared upper bound.
        max_radius: u32,
    },
    /// A region's pixel frame would exceed the frame limit.
    #[error("roi '{id}': num_bytes {num_bytes} exceeds the {limit} byte frame limit")]
    FrameTooLarge {
        /// Region identifier.
        id: String,
        /// Declared frame length.
        num_bytes: u64,
        /// Largest frame the reader accepts.
        limit: u64,
    },
    /// Two regions share an identifier.
    #[error("roi id '{id}' appears more than once")]
    DuplicateId {
        /// Repeated identifier.
        id: String,
    },
}

/// Reasons a header frame is rejected.
///
/// The display text is the diagnostic sent back to the client.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The frame was not a JSON object at all.
    ///
    /// Such a frame is usually a stray pixel frame, so the reader can no
    /// longer tell where the next request starts.
    #[error("bad request: {0}")]
    Unreadable(#[source] FrameError),
    /// The frame was a JSON object that does not match the request schema.
    #[error("bad request: {0}")]
    Malformed(#[source] FrameError),
    /// The header decoded but broke a semantic rule.
    #[error("bad request: {0}")]
    Invalid(#[from] ValidationError),
}

impl HeaderError {
    /// Returns `true` when the connection cannot be trusted to stay aligned
    /// on request boundaries after this rejection.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        matches!(self, Self::Unreadable(_))
    }
}

/// A pixel frame that does not match its region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame length differs from `num_bytes`.
    #[error("roi decode failed: roi '{id}' expected {expected} bytes, received {actual}")]
    LengthMismatch {
        /// Region identifier.
        id: String,
        /// Declared `num_bytes`.
        expected: u64,
        /// Actual frame length.
        actual: u64,
    },
    /// The frame length differs from `height * width`.
    #[error("roi decode failed: roi '{id}' expected {expected} pixels, received {actual}")]
    PixelCountMismatch {
        /// Region identifier.
        id: String,
        /// `height * width`.
        expected: u64,
        /// Actual frame length.
        actual: u64,
    },
}

/// Canny thresholds after range checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Lower hysteresis threshold.
    pub low: u8,
    /// Upper hysteresis threshold.
    pub high: u8,
}

/// A header that passed every semantic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    thresholds: Thresholds,
    specs: Vec<RoiSpec>,
}

impl ValidatedRequest {
    /// Validates a decoded header against a reader that accepts frames of
    /// at most `frame_limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found, checking the batch, then
    /// the thresholds, then each region in order.
    pub fn new(request: DetectRequest, frame_limit: u64) -> Result<Self, ValidationError> {
        if request.roi_specs.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        let thresholds = Thresholds {
            low: threshold("low", request.params.low)?,
            high: threshold("high", request.params.high)?,
        };

        let mut seen = HashSet::with_capacity(request.roi_specs.len());
        for spec in &request.roi_specs {
            validate_spec(spec, frame_limit)?;
            if !seen.insert(spec.id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    id: spec.id.clone(),
                });
            }
        }

        Ok(Self {
            thresholds,
            specs: request.roi_specs,
        })
    }

    /// Range-checked thresholds for the batch.
    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Region specs in request order.
    #[must_use]
    pub fn specs(&self) -> &[RoiSpec] {
        &self.specs
    }

    /// Number of binary frames that follow the header.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Always `false`; an empty batch never validates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Consumes the request, yielding its specs.
    #[must_use]
    pub fn into_specs(self) -> Vec<RoiSpec> {
        self.specs
    }
}

/// Decodes and validates a header frame payload.
///
/// # Errors
///
/// Returns [`HeaderError::Unreadable`] when the payload is not a JSON
/// object, [`HeaderError::Malformed`] when the object is not of the request
/// shape, and [`HeaderError::Invalid`] when it breaks a semantic rule.
pub fn parse_header(payload: &[u8], frame_limit: u64) -> Result<ValidatedRequest, HeaderError> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|source| HeaderError::Unreadable(FrameError::Json(source)))?;
    if !value.is_object() {
        return Err(HeaderError::Unreadable(FrameError::NotAnObject));
    }
    let request: DetectRequest = serde_json::from_value(value)
        .map_err(|source| HeaderError::Malformed(FrameError::Json(source)))?;
    Ok(ValidatedRequest::new(request, frame_limit)?)
}

/// A validated region paired with its pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiRecord {
    /// The region's spec.
    pub spec: RoiSpec,
    /// Row-major grayscale pixels, `height * width` bytes.
    pub pixels: Vec<u8>,
}

impl RoiRecord {
    /// Pairs a pixel frame with the spec it answers.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the frame length does not match the
    /// spec.
    pub fn from_frame(spec: RoiSpec, pixels: Vec<u8>) -> Result<Self, DecodeError> {
        let actual = pixels.len() as u64;
        if actual != spec.num_bytes {
            return Err(DecodeError::LengthMismatch {
                id: spec.id,
                expected: spec.num_bytes,
                actual,
            });
        }
        let expected = spec.pixel_count();
        if actual != expected {
            return Err(DecodeError::PixelCountMismatch {
                id: spec.id,
                expected,
                actual,
            });
        }
        Ok(Self { spec, pixels })
    }
}

fn threshold(name: &'static str, value: u32) -> Result<u8, ValidationError> {
    u8::try_from(value).map_err(|_| ValidationError::ThresholdOutOfRange { name, value })
}

fn validate_spec(spec: &RoiSpec, frame_limit: u64) -> Result<(), ValidationError> {
    let zero_dimension = |field| ValidationError::ZeroDimension {
        id: spec.id.clone(),
        field,
    };
    if spec.height == 0 {
        return Err(zero_dimension("height"));
    }
    if spec.width == 0 {
        return Err(zero_dimension("width"));
    }
    if spec.num_bytes == 0 {
        return Err(ValidationError::ZeroBytes {
            id: spec.id.clone(),
        });
    }
    let expected = spec.pixel_count();
    if spec.num_bytes != expected {
        return Err(ValidationError::ByteCountMismatch {
            id: spec.id.clone(),
            num_bytes: spec.num_bytes,
            expected,
        });
    }
    if spec.num_bytes > frame_limit {
        return Err(ValidationError::FrameTooLarge {
            id: spec.id.clone(),
            num_bytes: spec.num_bytes,
            limit: frame_limit,
        });
    }
    if spec.min_radius == 0 {
        return Err(ValidationError::ZeroMinRadius {
            id: spec.id.clone(),
        });
    }
    if spec.max_radius <= spec.min_radius {
        return Err(ValidationError::EmptyRadiusRange {
            id: spec.id.clone(),
            min_radius: spec.min_radius,
            max_radius: spec.max_radius,
        });
    }
    Ok(())
}
