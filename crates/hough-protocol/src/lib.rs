//! Wire protocol shared by the Hough detection server and its clients.
//!
//! Every message travels as a frame: an eight byte big-endian length prefix
//! followed by that many payload bytes. A request is one JSON header frame
//! describing a batch of regions of interest, followed by one binary frame of
//! grayscale pixels per region, in header order. A response is a single JSON
//! frame carrying one result per region in the same order.
//!
//! The crate keeps wire decoding and semantic validation apart:
//!
//! - [`codec`] moves frames on and off a byte stream and knows nothing about
//!   the schema;
//! - [`schema`] holds the serde types for headers and responses;
//! - [`validate`] turns a decoded header into a [`ValidatedRequest`] and
//!   pairs binary frames with their specs.
//!
//! A header that fails validation never touches the binary frames that
//! follow it, so the stream stays aligned on a frame boundary.

pub mod codec;
pub mod schema;
pub mod validate;

pub use self::codec::{
    DEFAULT_MAX_FRAME_BYTES, FrameError, LENGTH_PREFIX_BYTES, decode_json, read_frame,
    read_frame_or_eof, read_json, write_frame, write_json,
};
pub use self::schema::{
    Circle, DetectParams, DetectRequest, DetectResponse, MessageType, RoiResult, RoiSpec,
};
pub use self::validate::{
    DecodeError, HeaderError, RoiRecord, Thresholds, ValidatedRequest, ValidationError,
    parse_header,
};
