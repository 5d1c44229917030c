//! Length-prefixed framing over blocking byte streams.
//!
//! A frame is an eight byte unsigned big-endian length followed by exactly
//! that many payload bytes. The codec does not know whether a payload holds
//! JSON or pixels; the protocol phase decides which one the reader expects.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Size of the length prefix preceding every frame payload.
pub const LENGTH_PREFIX_BYTES: usize = 8;

/// Default upper bound on a single frame payload (64 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: u64 = 64 * 1024 * 1024;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream closed before the declared number of bytes arrived.
    #[error("stream closed mid-frame after {received} of {expected} bytes")]
    Truncated {
        /// Bytes the frame (or its prefix) declared.
        expected: u64,
        /// Bytes actually received before end of stream.
        received: u64,
    },
    /// The length prefix exceeds the configured frame limit.
    #[error("frame of {declared} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Length announced by the prefix.
        declared: u64,
        /// Configured limit.
        limit: u64,
    },
    /// Reading from or writing to the stream failed.
    #[error("I/O error on framed stream: {0}")]
    Io(#[from] io::Error),
    /// A text frame did not contain valid JSON for the expected type.
    #[error("invalid JSON payload: {0}")]
    Json(#[source] serde_json::Error),
    /// A text frame held valid JSON that was not an object.
    #[error("expected a JSON object")]
    NotAnObject,
    /// Serialising an outgoing payload failed.
    #[error("failed to serialise payload: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl FrameError {
    /// Returns `true` when the byte stream itself is no longer trustworthy.
    ///
    /// Transport faults leave the reader somewhere inside a frame (or with a
    /// dead stream), so the only safe reaction is to drop the connection.
    /// Payload faults (`Json`, `NotAnObject`) leave the stream on a frame
    /// boundary.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::TooLarge { .. } | Self::Io(_)
        )
    }
}

/// Writes one frame and flushes the writer.
///
/// # Errors
///
/// Returns [`FrameError::Io`] if the underlying writer fails.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let declared = u64::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        declared: u64::MAX,
        limit: u64::MAX,
    })?;
    writer.write_all(&declared.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame, treating end of stream before the prefix as a fault.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] if the stream ends early,
/// [`FrameError::TooLarge`] if the prefix exceeds `limit`, and
/// [`FrameError::Io`] for read failures (including read timeouts).
pub fn read_frame<R: Read>(reader: &mut R, limit: u64) -> Result<Vec<u8>, FrameError> {
    read_frame_or_eof(reader, limit)?.ok_or(FrameError::Truncated {
        expected: LENGTH_PREFIX_BYTES as u64,
        received: 0,
    })
}

/// Reads one frame, returning `Ok(None)` on a clean end of stream.
///
/// A clean end of stream is one that happens exactly on a frame boundary,
/// before any byte of the next length prefix.
///
/// # Errors
///
/// See [`read_frame`].
pub fn read_frame_or_eof<R: Read>(reader: &mut R, limit: u64) -> Result<Option<Vec<u8>>, FrameError> {
    let mut prefix = [0_u8; LENGTH_PREFIX_BYTES];
    let filled = fill_buffer(reader, &mut prefix)?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < LENGTH_PREFIX_BYTES {
        return Err(FrameError::Truncated {
            expected: LENGTH_PREFIX_BYTES as u64,
            received: filled as u64,
        });
    }

    let declared = u64::from_be_bytes(prefix);
    if declared > limit {
        return Err(FrameError::TooLarge { declared, limit });
    }
    let capacity = usize::try_from(declared).map_err(|_| FrameError::TooLarge { declared, limit })?;

    let mut payload = Vec::with_capacity(capacity);
    let received = Read::take(&mut *reader, declared).read_to_end(&mut payload)?;
    if received < capacity {
        return Err(FrameError::Truncated {
            expected: declared,
            received: received as u64,
        });
    }
    Ok(Some(payload))
}

/// Serialises `value` as compact JSON and writes it as one frame.
///
/// # Errors
///
/// Returns [`FrameError::Serialize`] if serialisation fails, or
/// [`FrameError::Io`] if writing fails.
pub fn write_json<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(value).map_err(FrameError::Serialize)?;
    write_frame(writer, &payload)
}

/// Decodes a text frame payload, insisting on a top-level JSON object.
///
/// # Errors
///
/// Returns [`FrameError::Json`] if the payload is not valid JSON for `T`, or
/// [`FrameError::NotAnObject`] if it is valid JSON but not an object.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    let value: serde_json::Value = serde_json::from_slice(payload).map_err(FrameError::Json)?;
    if !value.is_object() {
        return Err(FrameError::NotAnObject);
    }
    serde_json::from_value(value).map_err(FrameError::Json)
}

/// Reads one frame and decodes it with [`decode_json`].
///
/// # Errors
///
/// Any error from [`read_frame`] or [`decode_json`].
pub fn read_json<R: Read, T: DeserializeOwned>(reader: &mut R, limit: u64) -> Result<T, FrameError> {
    let payload = read_frame(reader, limit)?;
    decode_json(&payload)
}

/// Reads until `buf` is full or the stream ends, retrying on interrupts.
fn fill_buffer<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let Some(remaining) = buf.get_mut(filled..) else {
            break;
        };
        match reader.read(remaining) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}
