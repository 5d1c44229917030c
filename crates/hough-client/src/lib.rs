//! Client for the Hough detection server.
//!
//! [`DetectionClient`] keeps one connection open and sends batches of
//! grayscale regions over it, one request at a time:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use hough_client::{DetectionClient, RoiImage};
//! use hough_config::SocketEndpoint;
//! use hough_protocol::DetectParams;
//!
//! # fn main() -> Result<(), hough_client::ClientError> {
//! let endpoint = SocketEndpoint::unix("/run/user/1000/hough/houghd.sock");
//! let mut client = DetectionClient::connect(&endpoint, Duration::from_secs(5))?;
//! let image = RoiImage::new("well-a1", 64, 64, vec![0; 64 * 64], 5, 20);
//! for result in client.detect_batch(&[image], DetectParams::new(50, 150))? {
//!     println!("{}: {:?}", result.id, result.shape);
//! }
//! # Ok(())
//! # }
//! ```

mod errors;
mod transport;

use std::time::Duration;

use hough_config::SocketEndpoint;
use hough_protocol::{
    DEFAULT_MAX_FRAME_BYTES, DetectParams, DetectRequest, DetectResponse, HeaderError, RoiResult,
    RoiSpec, ValidatedRequest, read_json, write_frame, write_json,
};

pub use self::errors::ClientError;
use self::transport::Connection;

/// One grayscale region to search, row-major with one byte per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiImage {
    /// Identifier echoed back in the matching result.
    pub id: String,
    /// Rows.
    pub height: u32,
    /// Columns.
    pub width: u32,
    /// `height * width` pixel values.
    pub pixels: Vec<u8>,
    /// Smallest radius searched, inclusive.
    pub min_radius: u32,
    /// Largest radius searched, exclusive.
    pub max_radius: u32,
}

impl RoiImage {
    /// Bundles an image with its search radii.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        height: u32,
        width: u32,
        pixels: Vec<u8>,
        min_radius: u32,
        max_radius: u32,
    ) -> Self {
        Self {
            id: id.into(),
            height,
            width,
            pixels,
            min_radius,
            max_radius,
        }
    }

    fn spec(&self) -> Result<RoiSpec, ClientError> {
        let expected = u64::from(self.height) * u64::from(self.width);
        let actual = self.pixels.len() as u64;
        if actual != expected {
            return Err(ClientError::InvalidImage {
                id: self.id.clone(),
                height: self.height,
                width: self.width,
                expected,
                actual,
            });
        }
        Ok(RoiSpec {
            id: self.id.clone(),
            height: self.height,
            width: self.width,
            num_bytes: expected,
            min_radius: self.min_radius,
            max_radius: self.max_radius,
        })
    }
}

/// A connection to a detection server.
pub struct DetectionClient {
    connection: Connection,
    max_frame_bytes: u64,
}

impl DetectionClient {
    /// Connects to `endpoint`. `timeout` bounds the connect and each socket
    /// read or write that follows.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Resolve`] or [`ClientError::Connect`] when the
    /// server cannot be reached.
    pub fn connect(endpoint: &SocketEndpoint, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            connection: transport::connect(endpoint, timeout)?,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    /// Runs detection on `rois` and returns one result per image, in order.
    ///
    /// Per-image failures come back inside the matching [`RoiResult`]; only
    /// whole-batch problems are errors. Images and the header are checked
    /// before anything is sent, so a batch the server would refuse leaves
    /// the connection untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidImage`] for a buffer of the wrong size,
    /// [`ClientError::Rejected`] when the batch breaks a header rule or the
    /// server fails it,
    /// [`ClientError::Mismatch`] when results do not line up with `rois`,
    /// and transport or decoding errors otherwise. After a rejected decode
    /// the server closes the connection, so the client should be dropped.
    pub fn detect_batch(
        &mut self,
        rois: &[RoiImage],
        params: DetectParams,
    ) -> Result<Vec<RoiResult>, ClientError> {
        let specs = rois
            .iter()
            .map(RoiImage::spec)
            .collect::<Result<Vec<_>, _>>()?;
        let request = DetectRequest::new(params, specs);
        // The server never reads the pixels of a rejected header, so nothing
        // may be sent for a batch it would refuse.
        ValidatedRequest::new(request.clone(), self.max_frame_bytes).map_err(|error| {
            ClientError::Rejected {
                message: HeaderError::from(error).to_string(),
            }
        })?;
        write_json(&mut self.connection, &request).map_err(ClientError::from_frame)?;
        for roi in rois {
            write_frame(&mut self.connection, &roi.pixels).map_err(ClientError::from_frame)?;
        }

        let response: DetectResponse =
            read_json(&mut self.connection, self.max_frame_bytes).map_err(ClientError::from_frame)?;
        if !response.ok {
            return Err(ClientError::Rejected {
                message: response
                    .error
                    .unwrap_or_else(|| String::from("no reason given")),
            });
        }
        check_alignment(rois, &response.results)?;
        Ok(response.results)
    }
}

fn check_alignment(rois: &[RoiImage], results: &[RoiResult]) -> Result<(), ClientError> {
    if rois.len() != results.len() {
        return Err(ClientError::Mismatch {
            message: format!("sent {} images but got {} results", rois.len(), results.len()),
        });
    }
    let misplaced = rois
        .iter()
        .zip(results)
        .enumerate()
        .find(|(_, (roi, result))| roi.id != result.id);
    match misplaced {
        Some((index, (roi, result))) => Err(ClientError::Mismatch {
            message: format!(
                "result {index} is for '{}' but image '{}' was sent there",
                result.id, roi.id
            ),
        }),
        None => Ok(()),
    }
}
