//! Server supervisor: listener, pool and shutdown wiring.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use signal_hook::SigId;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use thiserror::Error;
use tracing::{info, warn};

use hough_config::{Config, SocketEndpoint, SocketPreparationError};

use crate::dispatch::{DetectionConnectionHandler, DispatchEngine, HandlerSettings};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::pool::{PoolError, ProcessPool, ProcessPoolConfig, TaskRunner};
use crate::transport::{ListenerError, ListenerHandle, SocketListener};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Interval at which [`RunningServer::wait`] checks for a shutdown request.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Errors raised while starting or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The socket's parent directory could not be prepared.
    #[error("failed to prepare socket: {0}")]
    Socket(#[from] SocketPreparationError),
    /// Binding or running the listener failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] PoolError),
    /// Termination signal handlers could not be installed.
    #[error("failed to install signal handlers: {source}")]
    Signal {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Cloneable handle that asks a running server to stop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Requests shutdown. Repeated requests are harmless.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Builder for a detection server.
///
/// By default the server starts a [`ProcessPool`] from the configuration,
/// reports health through [`StructuredHealthReporter`] and leaves process
/// signals alone so it can be embedded.
pub struct Server {
    config: Config,
    runner: Option<Arc<dyn TaskRunner>>,
    reporter: Arc<dyn HealthReporter>,
    signal_hook: bool,
}

impl Server {
    /// Prepares a server for `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runner: None,
            reporter: Arc::new(StructuredHealthReporter::new()),
            signal_hook: false,
        }
    }

    /// Uses `runner` instead of starting a process pool.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Sends lifecycle events to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Requests shutdown on SIGINT or SIGTERM when `enabled`.
    #[must_use]
    pub const fn with_signal_hook(mut self, enabled: bool) -> Self {
        self.signal_hook = enabled;
        self
    }

    /// Binds the endpoint, starts the pool and begins accepting connections.
    ///
    /// A stale Unix socket left by an earlier run is replaced; a socket that
    /// still answers is reported as in use.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the socket cannot be prepared or bound, the
    /// pool cannot start, or signal handlers cannot be installed. Anything
    /// already started is stopped again.
    pub fn start(self) -> Result<RunningServer, ServerError> {
        let Self {
            config,
            runner: injected,
            reporter,
            signal_hook,
        } = self;
        config.socket().prepare_filesystem()?;
        let listener = SocketListener::bind(config.socket())?;

        let runner: Arc<dyn TaskRunner> = match injected {
            Some(runner) => runner,
            None => Arc::new(ProcessPool::start(ProcessPoolConfig::from_config(&config))?),
        };

        let shutdown = ShutdownHandle::default();
        let signals = if signal_hook {
            match register_signals(&shutdown) {
                Ok(ids) => ids,
                Err(error) => {
                    runner.close();
                    return Err(error);
                }
            }
        } else {
            Vec::new()
        };

        let endpoint = listener.bound_endpoint();
        let local_addr = listener.local_addr();
        let handler = DetectionConnectionHandler::new(
            DispatchEngine::new(Arc::clone(&runner)),
            shutdown.flag(),
            HandlerSettings {
                idle_timeout: Some(config.idle_timeout()).filter(|timeout| !timeout.is_zero()),
                max_frame_bytes: config.max_frame_bytes(),
            },
        );
        let accepting = match listener.start(
            Arc::new(handler),
            shutdown.flag(),
            config.accept_poll_interval(),
        ) {
            Ok(handle) => handle,
            Err(error) => {
                unregister_signals(signals);
                runner.close();
                return Err(error.into());
            }
        };

        reporter.server_listening(&endpoint);
        Ok(RunningServer {
            endpoint,
            local_addr,
            shutdown,
            listener: Some(accepting),
            runner,
            reporter,
            signals,
        })
    }
}

/// A server accepting connections.
///
/// Dropping it stops the server as [`RunningServer::stop`] would.
pub struct RunningServer {
    endpoint: SocketEndpoint,
    local_addr: Option<SocketAddr>,
    shutdown: ShutdownHandle,
    listener: Option<ListenerHandle>,
    runner: Arc<dyn TaskRunner>,
    reporter: Arc<dyn HealthReporter>,
    signals: Vec<SigId>,
}

impl RunningServer {
    /// The endpoint clients should connect to. For TCP this carries the
    /// port actually bound.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Bound TCP address, or `None` for Unix sockets.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// A handle that can stop the server from another thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Blocks until shutdown is requested, then stops the server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listener`] if the accept thread panicked.
    pub fn wait(mut self) -> Result<(), ServerError> {
        while !self.shutdown.is_requested() {
            thread::sleep(WAIT_POLL);
        }
        self.finish()
    }

    /// Stops accepting connections, drains the pool and removes the socket.
    ///
    /// Connections already open are left to finish on their own.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listener`] if the accept thread panicked.
    pub fn stop(mut self) -> Result<(), ServerError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), ServerError> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };
        self.shutdown.request();
        self.reporter.server_stopping();
        unregister_signals(std::mem::take(&mut self.signals));

        let joined = listener.join();
        self.runner.close();
        self.reporter.server_stopped();
        joined.map_err(ServerError::from)
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Err(error) = self.finish() {
            warn!(target: SERVER_TARGET, error = %error, "server stopped uncleanly");
        }
    }
}

fn register_signals(shutdown: &ShutdownHandle) -> Result<Vec<SigId>, ServerError> {
    let mut ids = Vec::with_capacity(2);
    for signal in [SIGINT, SIGTERM] {
        match signal_hook::flag::register(signal, shutdown.flag()) {
            Ok(id) => ids.push(id),
            Err(source) => {
                unregister_signals(ids);
                return Err(ServerError::Signal { source });
            }
        }
    }
    info!(target: SERVER_TARGET, "termination signals will stop the server");
    Ok(ids)
}

fn unregister_signals(ids: Vec<SigId>) {
    for id in ids {
        signal_hook::low_level::unregister(id);
    }
}
