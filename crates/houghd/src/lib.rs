//! Same-host circle detection server.
//!
//! `houghd` accepts batches of small grayscale regions over a local socket,
//! runs circle detection for each region on a pool of worker processes and
//! answers with one result per region, in request order.
//!
//! ## Wire protocol
//!
//! Every message is a frame: an eight byte big-endian length followed by the
//! payload. A request is a JSON header frame naming the regions, followed by
//! one binary pixel frame per region. The server answers each request with a
//! single JSON frame. See [`hough_protocol`] for the schema.
//!
//! ## Failure handling
//!
//! Faults are contained at the smallest possible scope:
//!
//! - a failing region reports an `error` in its own result while the rest of
//!   the batch succeeds;
//! - an invalid header is rejected with `ok=false` and the connection stays
//!   open;
//! - a pixel frame that does not match its header is rejected with `ok=false`
//!   and the connection is closed;
//! - a broken stream drops the connection without a reply.
//!
//! Worker processes that crash or exceed the optional per-task timeout are
//! replaced automatically.
//!
//! ## Embedding
//!
//! [`Server`] can run inside another process. It installs no signal
//! handlers unless asked to, and stops when its [`ShutdownHandle`] is used
//! or the [`RunningServer`] is dropped.

mod bootstrap;
mod dispatch;
mod health;
pub mod pool;
mod server;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with, launch,
};
pub use dispatch::DispatchEngine;
pub use health::{HealthReporter, StructuredHealthReporter};
pub use server::{RunningServer, Server, ServerError, ShutdownHandle};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
