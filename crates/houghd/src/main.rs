//! Entry point for the detection server.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use houghd::{StructuredHealthReporter, SystemConfigLoader, launch};

fn main() -> ExitCode {
    let outcome = launch(&SystemConfigLoader, Arc::new(StructuredHealthReporter::new()))
        .and_then(|server| {
            server
                .wait()
                .map_err(|source| houghd::BootstrapError::Server { source })
        });
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(io::stderr(), "houghd: {error}");
            ExitCode::FAILURE
        }
    }
}
