//! Lifecycle events surfaced to operators.

use std::sync::Arc;

use hough_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer notified as the server starts and stops.
pub trait HealthReporter: Send + Sync {
    /// Before configuration is loaded.
    fn bootstrap_starting(&self);

    /// After configuration and telemetry are ready.
    fn bootstrap_succeeded(&self, config: &Config);

    /// When start-up fails at any stage.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Once the listener accepts connections.
    fn server_listening(&self, endpoint: &SocketEndpoint);

    /// When shutdown begins.
    fn server_stopping(&self);

    /// After the listener and pool have stopped.
    fn server_stopped(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn server_listening(&self, endpoint: &SocketEndpoint) {
        (**self).server_listening(endpoint);
    }

    fn server_stopping(&self) {
        (**self).server_stopping();
    }

    fn server_stopped(&self) {
        (**self).server_stopped();
    }
}

/// Reporter that writes each event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting server bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.socket(),
            workers = config.worker_count(),
            worker_program = %config.worker_program(),
            task_timeout_ms = config.task_timeout().map(|timeout| timeout.as_millis()),
            log_format = %config.log_format(),
            "server bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "server bootstrap failed"
        );
    }

    fn server_listening(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "server_listening",
            endpoint = %endpoint,
            "detection server listening"
        );
    }

    fn server_stopping(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "server_stopping",
            "detection server shutting down"
        );
    }

    fn server_stopped(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "server_stopped",
            "detection server stopped"
        );
    }
}
