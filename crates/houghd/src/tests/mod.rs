//! Test suites for the detection server.

mod server_behaviour;
pub(crate) mod support;
