//! Start-up sequence shared by the `houghd` binary and embedders.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use hough_config::Config;

use crate::health::HealthReporter;
use crate::server::{RunningServer, Server, ServerError};
use crate::telemetry::{self, TelemetryError};

/// Source of the server configuration.
pub trait ConfigLoader: Send + Sync {
    /// Produces the configuration to run with.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when configuration is unavailable or
    /// invalid.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loads defaults, the configuration file, `HOUGH_*` variables and the
/// command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Hands out a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors raised before the server is up.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration could not be loaded.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Logging could not be set up.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The server failed to start.
    #[error("failed to start server: {source}")]
    Server {
        /// Server error.
        #[source]
        source: ServerError,
    },
}

/// Loads configuration and installs telemetry, returning a server ready to
/// start.
///
/// # Errors
///
/// Returns [`BootstrapError`] if either step fails; `reporter` is told about
/// the failure first.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Server, BootstrapError> {
    reporter.bootstrap_starting();

    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })
        .and_then(|config| {
            telemetry::initialise(&config)
                .map(|_| config)
                .map_err(|source| BootstrapError::Telemetry { source })
        })
        .inspect_err(|error| reporter.bootstrap_failed(error))?;

    reporter.bootstrap_succeeded(&config);
    Ok(Server::new(config).with_reporter(reporter))
}

/// Bootstraps and starts the server with the termination signal hook
/// enabled, as the `houghd` binary runs it.
///
/// # Errors
///
/// Returns [`BootstrapError`] if bootstrap or server start-up fails.
pub fn launch(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<RunningServer, BootstrapError> {
    let server = bootstrap_with(loader, Arc::clone(&reporter))?;
    server
        .with_signal_hook(true)
        .start()
        .map_err(|source| BootstrapError::Server { source })
        .inspect_err(|error| reporter.bootstrap_failed(error))
}
