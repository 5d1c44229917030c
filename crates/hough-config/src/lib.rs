//! Configuration for the Hough detection server.
//!
//! [`Config`] is loaded with `ortho_config`, which layers built-in defaults,
//! an optional TOML file (`--config-path` or `HOUGH_CONFIG_PATH`),
//! `HOUGH_*` environment variables and command-line flags, later layers
//! winning.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use self::defaults::{
    DEFAULT_ACCEPT_POLL_MS, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_SHUTDOWN_TIMEOUT_SECS, DEFAULT_TCP_PORT, WORKER_PROGRAM_NAME,
    available_workers, default_log_filter, default_log_format, default_socket_endpoint,
    default_worker_program,
};
pub use self::logging::{LogFormat, LogFormatParseError};
pub use self::socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "HOUGH")]
pub struct Config {
    /// Endpoint the server listens on.
    #[serde(default = "default_socket_endpoint")]
    #[ortho_config(default = default_socket_endpoint())]
    pub socket: SocketEndpoint,
    /// Worker processes in the pool; `0` selects the host's parallelism.
    #[serde(default)]
    #[ortho_config(default = 0)]
    pub workers: usize,
    /// Worker executable; defaults to `hough-worker` beside the server.
    #[serde(default)]
    pub worker_program: Option<Utf8PathBuf>,
    /// Seconds a connection may stay idle before it is dropped.
    #[serde(default = "idle_timeout_default")]
    #[ortho_config(default = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,
    /// Per-task compute limit in seconds; unset disables the limit.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    /// Seconds allowed for the pool to drain at shutdown.
    #[serde(default = "shutdown_timeout_default")]
    #[ortho_config(default = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout_secs: u64,
    /// Milliseconds the accept loop pauses when no connection is pending.
    #[serde(default = "accept_poll_default")]
    #[ortho_config(default = DEFAULT_ACCEPT_POLL_MS)]
    pub accept_poll_ms: u64,
    /// Largest frame payload accepted from a client.
    #[serde(default = "max_frame_default")]
    #[ortho_config(default = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: u64,
    /// `tracing` filter directive.
    #[serde(default = "defaults::default_log_filter_string")]
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: default_socket_endpoint(),
            workers: 0,
            worker_program: None,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            task_timeout_secs: None,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            accept_poll_ms: DEFAULT_ACCEPT_POLL_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            log_filter: defaults::default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Endpoint the server listens on.
    #[must_use]
    pub const fn socket(&self) -> &SocketEndpoint {
        &self.socket
    }

    /// Effective pool size, resolving `0` to the host's parallelism.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => available_workers(),
            count => count,
        }
    }

    /// Effective worker executable.
    #[must_use]
    pub fn worker_program(&self) -> Utf8PathBuf {
        self.worker_program
            .clone()
            .unwrap_or_else(default_worker_program)
    }

    /// Idle-read timeout applied to each connection.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Optional per-task compute limit.
    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Bound on pool drain at shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Accept-loop polling interval.
    #[must_use]
    pub const fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    /// Largest accepted frame payload.
    #[must_use]
    pub const fn max_frame_bytes(&self) -> u64 {
        self.max_frame_bytes
    }

    /// `tracing` filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

const fn idle_timeout_default() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

const fn shutdown_timeout_default() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

const fn accept_poll_default() -> u64 {
    DEFAULT_ACCEPT_POLL_MS
}

const fn max_frame_default() -> u64 {
    DEFAULT_MAX_FRAME_BYTES
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.accept_poll_interval(), Duration::from_millis(25));
        assert_eq!(config.max_frame_bytes(), 64 * 1024 * 1024);
        assert_eq!(config.task_timeout(), None);
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[rstest]
    #[case(0, available_workers())]
    #[case(3, 3)]
    fn worker_count_resolves_auto(#[case] workers: usize, #[case] expected: usize) {
        let config = Config {
            workers,
            ..Config::default()
        };
        assert_eq!(config.worker_count(), expected);
    }

    #[rstest]
    fn explicit_worker_program_wins() {
        let config = Config {
            worker_program: Some(Utf8PathBuf::from("/opt/hough/bin/hough-worker")),
            ..Config::default()
        };
        assert_eq!(
            config.worker_program(),
            Utf8PathBuf::from("/opt/hough/bin/hough-worker")
        );
    }

    #[rstest]
    fn task_timeout_is_opt_in() {
        let config = Config {
            task_timeout_secs: Some(5),
            ..Config::default()
        };
        assert_eq!(config.task_timeout(), Some(Duration::from_secs(5)));
    }
}
