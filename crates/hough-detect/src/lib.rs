//! Single-circle detection in small grayscale images.
//!
//! Detection runs Canny edge extraction followed by a Hough circle transform
//! over integer radii. Scores are normalised by the rasterised perimeter
//! length, so a complete circle of any radius scores `1.0`. The detector
//! reports a circle only when exactly one confident candidate exists.

mod accumulator;
mod perimeter;

use std::ops::Range;

use image::GrayImage;
use imageproc::edges::canny;
use thiserror::Error;

use crate::accumulator::HoughAccumulator;

/// Intensity of an edge pixel in Canny output.
const EDGE: u8 = 255;

/// A detected circle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Column of the centre.
    pub x: u32,
    /// Row of the centre.
    pub y: u32,
    /// Radius in pixels.
    pub radius: u32,
    /// Fraction of the perimeter covered by edge pixels.
    pub score: f64,
}

/// Errors raised for inputs the detector cannot process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectError {
    /// The radius range is empty or starts at zero.
    #[error("radius range {min}..{max} is empty or starts at zero")]
    EmptyRadiusRange {
        /// Inclusive lower bound.
        min: u32,
        /// Exclusive upper bound.
        max: u32,
    },
    /// The pixel buffer does not hold `width * height` bytes.
    #[error("expected {expected} pixels for a {width}x{height} image, got {actual}")]
    BufferSize {
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
        /// `width * height`.
        expected: u64,
        /// Buffer length.
        actual: u64,
    },
}

/// Canny hysteresis thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeThresholds {
    low: u8,
    high: u8,
}

impl EdgeThresholds {
    /// Builds thresholds, swapping an inverted pair.
    #[must_use]
    pub const fn new(low: u8, high: u8) -> Self {
        if low > high {
            Self {
                low: high,
                high: low,
            }
        } else {
            Self { low, high }
        }
    }

    /// Lower threshold.
    #[must_use]
    pub const fn low(self) -> u8 {
        self.low
    }

    /// Upper threshold.
    #[must_use]
    pub const fn high(self) -> u8 {
        self.high
    }
}

/// Radii searched, `min` inclusive and `max` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadiusRange {
    min: u32,
    max: u32,
}

impl RadiusRange {
    /// Validates and builds a radius range.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::EmptyRadiusRange`] when `min` is zero or
    /// `max <= min`.
    pub const fn new(min: u32, max: u32) -> Result<Self, DetectError> {
        if min == 0 || max <= min {
            return Err(DetectError::EmptyRadiusRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Smallest radius searched.
    #[must_use]
    pub const fn min(self) -> u32 {
        self.min
    }

    /// The radii as a range.
    #[must_use]
    pub const fn as_range(self) -> Range<u32> {
        self.min..self.max
    }
}

/// Finds the single most convincing circle in `image`.
///
/// Returns `None` when the image has no edges, when no circle in the range
/// collects a vote, or when two distinct centres (further apart than the
/// smallest radius) tie for the best score.
#[must_use]
pub fn detect_circle(
    image: &GrayImage,
    radii: RadiusRange,
    thresholds: EdgeThresholds,
) -> Option<Detection> {
    let edges = canny(
        image,
        f32::from(thresholds.low()),
        f32::from(thresholds.high()),
    );
    let points: Vec<(i64, i64)> = edges
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel.0 == [EDGE])
        .map(|(x, y, _)| (i64::from(x), i64::from(y)))
        .collect();
    if points.is_empty() {
        return None;
    }

    let (width, height) = image.dimensions();
    HoughAccumulator::vote(width, height, &points, radii.as_range()).best_unambiguous(radii.min())
}

/// Builds an image from a row-major pixel buffer and runs [`detect_circle`].
///
/// # Errors
///
/// Returns [`DetectError::BufferSize`] if `pixels` does not hold exactly
/// `width * height` bytes.
pub fn detect_in_buffer(
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    radii: RadiusRange,
    thresholds: EdgeThresholds,
) -> Result<Option<Detection>, DetectError> {
    let actual = pixels.len() as u64;
    let expected = u64::from(width) * u64::from(height);
    let size_error = || DetectError::BufferSize {
        width,
        height,
        expected,
        actual,
    };
    if expected == 0 || actual != expected {
        return Err(size_error());
    }
    let image = GrayImage::from_raw(width, height, pixels).ok_or_else(size_error)?;
    Ok(detect_circle(&image, radii, thresholds))
}
