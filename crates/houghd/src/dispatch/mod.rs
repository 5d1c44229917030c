//! Framed request handling for detection batches.
//!
//! Each connection cycles through one exchange at a time:
//!
//! 1. read a JSON header frame and validate it;
//! 2. read one binary pixel frame per region spec;
//! 3. fan the regions out to the shared [`TaskRunner`](crate::pool::TaskRunner)
//!    and collect the outcomes in request order;
//! 4. write a single JSON response frame.
//!
//! A header that is a JSON object but fails validation is answered with
//! `ok=false` and the connection stays open. A header frame that is not a
//! JSON object at all closes the connection without a reply, since it is
//! most likely a pixel frame the client sent after a rejected header. A pixel frame that does not match its spec is answered the same
//! way, but the connection is then closed because the framing position can
//! no longer be trusted. Transport faults drop the connection silently.

mod engine;
mod handler;

pub use self::engine::DispatchEngine;
pub(crate) use self::handler::{DetectionConnectionHandler, HandlerSettings};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
