//! Detection worker spawned by the `houghd` process pool.
//!
//! Speaks the framed worker protocol on stdin and stdout. It is not meant
//! to be run by hand.

use std::io::{self, Write};
use std::process::ExitCode;

use houghd::pool::{FAULT_INJECTION_ENV, FaultInjection, max_frame_bytes_from_env, run_worker};

fn main() -> ExitCode {
    let fault = match std::env::var(FAULT_INJECTION_ENV) {
        Ok(directive) => match directive.parse::<FaultInjection>() {
            Ok(fault) => Some(fault),
            Err(error) => {
                let _ = writeln!(io::stderr(), "hough-worker: {error}");
                return ExitCode::FAILURE;
            }
        },
        Err(_) => None,
    };

    let mut input = io::stdin().lock();
    let mut output = io::stdout().lock();
    match run_worker(&mut input, &mut output, max_frame_bytes_from_env(), fault.as_ref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(io::stderr(), "hough-worker: {error}");
            ExitCode::FAILURE
        }
    }
}
