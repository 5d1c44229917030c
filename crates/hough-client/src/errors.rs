//! Errors raised by the detection client.

use std::io;

use hough_protocol::FrameError;
use thiserror::Error;

/// Failures while talking to a detection server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The TCP host name could not be resolved.
    #[error("failed to resolve server address {endpoint}: {source}")]
    Resolve {
        /// Endpoint being resolved.
        endpoint: String,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// The server could not be reached.
    #[error("failed to connect to server at {endpoint}: {source}")]
    Connect {
        /// Endpoint being dialled.
        endpoint: String,
        /// Socket error.
        #[source]
        source: io::Error,
    },
    /// Unix sockets are unavailable on this platform.
    #[cfg(not(unix))]
    #[error("platform does not support Unix sockets: {0}")]
    UnsupportedUnixTransport(String),
    /// An image buffer does not hold `height * width` pixels.
    #[error("image '{id}' holds {actual} bytes but {height}x{width} needs {expected}")]
    InvalidImage {
        /// Image identifier.
        id: String,
        /// Declared height.
        height: u32,
        /// Declared width.
        width: u32,
        /// Bytes implied by the dimensions.
        expected: u64,
        /// Bytes supplied.
        actual: u64,
    },
    /// The connection failed while a request or response was in flight.
    #[error("connection to server failed: {source}")]
    Transport {
        /// Framing error.
        #[source]
        source: FrameError,
    },
    /// The server answered with something that is not a detection response.
    #[error("malformed response from server: {source}")]
    MalformedResponse {
        /// Decoding error.
        #[source]
        source: FrameError,
    },
    /// The server refused the whole batch.
    #[error("server rejected the batch: {message}")]
    Rejected {
        /// Message reported by the server.
        message: String,
    },
    /// The results do not line up with the request.
    #[error("response does not match request: {message}")]
    Mismatch {
        /// What differed.
        message: String,
    },
}

impl ClientError {
    pub(crate) fn from_frame(source: FrameError) -> Self {
        if source.is_transport() {
            Self::Transport { source }
        } else {
            Self::MalformedResponse { source }
        }
    }
}
