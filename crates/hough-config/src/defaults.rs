use std::env;
use std::num::NonZeroUsize;
use std::thread;

use camino::Utf8PathBuf;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP port used where Unix domain sockets are unavailable.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Seconds a connection may sit idle between reads.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Upper bound on draining the worker pool at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Pause between accept polls when no connection is pending. It bounds
/// both accept latency and how quickly shutdown is noticed.
pub const DEFAULT_ACCEPT_POLL_MS: u64 = 25;

/// Largest frame payload accepted from a client (64 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: u64 = 64 * 1024 * 1024;

/// File name of the worker executable.
pub const WORKER_PROGRAM_NAME: &str = "hough-worker";

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value for serde defaults.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Number of workers used when the configuration asks for `0`.
#[must_use]
pub fn available_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Locates `hough-worker` next to the running executable.
///
/// Falls back to the bare program name, which the OS resolves via `PATH`.
#[must_use]
pub fn default_worker_program() -> Utf8PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(worker_file_name())))
        .filter(|candidate| candidate.is_file())
        .and_then(|candidate| Utf8PathBuf::from_path_buf(candidate).ok())
        .unwrap_or_else(|| Utf8PathBuf::from(WORKER_PROGRAM_NAME))
}

fn worker_file_name() -> String {
    format!("{WORKER_PROGRAM_NAME}{}", env::consts::EXE_SUFFIX)
}

/// Computes the default listening endpoint.
///
/// Uses `$XDG_RUNTIME_DIR/hough/houghd.sock` when a runtime directory is
/// available and `$TMPDIR/hough/uid-<euid>/houghd.sock` otherwise.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("hough");
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketEndpoint::unix(base.join("houghd.sock"))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
