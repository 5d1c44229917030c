//! Bound server socket and its accept thread.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use hough_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::os::unix::net::UnixListener;
#[cfg(unix)]
use camino::Utf8Path;

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(150);

/// Server socket bound to its endpoint but not yet accepting.
///
/// Dropping it removes the socket file of a Unix endpoint.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    socket: BoundSocket,
}

#[derive(Debug)]
enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl BoundSocket {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Accepts one pending connection, if any, as a blocking stream.
    fn poll_accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().map(|(stream, _)| ConnectionStream::Tcp(stream)),
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().map(|(stream, _)| ConnectionStream::Unix(stream)),
        };
        match accepted {
            Ok(stream) => stream.set_blocking().map(|()| Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl SocketListener {
    /// Binds `endpoint`.
    ///
    /// For a Unix endpoint an existing socket file that nobody answers on is
    /// replaced; one with a live server behind it is refused.
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let socket = match endpoint {
            SocketEndpoint::Tcp { host, port } => BoundSocket::Tcp(bind_tcp(host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => BoundSocket::Unix(bind_unix(path)?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            socket,
        })
    }

    /// Address of a TCP listener; `None` for Unix sockets.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            BoundSocket::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            BoundSocket::Unix(_) => None,
        }
    }

    /// The endpoint as bound, with an OS-assigned TCP port filled in.
    pub(crate) fn bound_endpoint(&self) -> SocketEndpoint {
        match (&self.endpoint, self.local_addr()) {
            (SocketEndpoint::Tcp { host, .. }, Some(addr)) => {
                SocketEndpoint::tcp(host.clone(), addr.port())
            }
            (endpoint, _) => endpoint.clone(),
        }
    }

    /// Moves the listener onto a background accept thread.
    ///
    /// Each connection is served on its own thread. With nothing pending the
    /// thread pauses `poll_interval` before polling again, so the interval
    /// bounds accept latency as well as how soon `shutdown` is noticed.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Result<ListenerHandle, ListenerError> {
        self.socket
            .set_nonblocking()
            .map_err(|source| ListenerError::NonBlocking { source })?;

        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name(String::from("hough-accept"))
            .spawn(move || {
                AcceptLoop {
                    listener: self,
                    handler,
                    poll_interval,
                    accepted: AtomicU64::new(0),
                }
                .run(&flag);
            })
            .map_err(|source| ListenerError::Thread { source })?;
        Ok(ListenerHandle {
            shutdown,
            thread: Some(thread),
        })
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let SocketEndpoint::Unix { path } = &self.endpoint {
            remove_socket_file(path);
        }
    }
}

/// Owner of the accept thread.
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Stops the accept loop and waits for it to exit.
    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        self.shutdown();
        self.thread
            .take()
            .map_or(Ok(()), |thread| thread.join().map_err(|_| ListenerError::ThreadPanic))
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AcceptLoop {
    listener: SocketListener,
    handler: Arc<dyn ConnectionHandler>,
    poll_interval: Duration,
    accepted: AtomicU64,
}

impl AcceptLoop {
    fn run(self, shutdown: &AtomicBool) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.bound_endpoint(),
            "accepting connections"
        );
        // Repeated identical failures are logged once.
        let mut reported: Option<io::ErrorKind> = None;
        while !shutdown.load(Ordering::SeqCst) {
            match self.listener.socket.poll_accept() {
                Ok(Some(stream)) => {
                    reported = None;
                    self.dispatch(stream);
                }
                Ok(None) => thread::sleep(self.poll_interval),
                Err(error) => {
                    if reported.replace(error.kind()) != Some(error.kind()) {
                        warn!(target: LISTENER_TARGET, error = %error, "accept failed");
                    }
                    thread::sleep(ACCEPT_RETRY_DELAY);
                }
            }
        }
        info!(
            target: LISTENER_TARGET,
            connections = self.accepted.load(Ordering::Relaxed),
            "listener stopped"
        );
    }

    fn dispatch(&self, stream: ConnectionStream) {
        let number = self.accepted.fetch_add(1, Ordering::Relaxed);
        let peer = stream.peer();
        debug!(target: LISTENER_TARGET, peer = %peer, connection = number, "connection accepted");
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(format!("hough-conn-{number}"))
            .spawn(move || handler.handle(stream));
        if let Err(error) = spawned {
            warn!(
                target: LISTENER_TARGET,
                peer = %peer,
                error = %error,
                "could not start connection thread; dropping connection"
            );
        }
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Utf8Path) -> Result<UnixListener, ListenerError> {
    reclaim_stale_socket(path)?;
    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.to_string(),
        source,
    })
}

/// Clears a socket file left behind by a server that is no longer running.
#[cfg(unix)]
fn reclaim_stale_socket(path: &Utf8Path) -> Result<(), ListenerError> {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::UnixStream;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(ListenerError::UnixMetadata {
                path: path.to_string(),
                source,
            });
        }
    };
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::UnixNotSocket {
            path: path.to_string(),
        });
    }

    match UnixStream::connect(path) {
        Ok(_) => Err(ListenerError::UnixInUse {
            path: path.to_string(),
        }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            info!(target: LISTENER_TARGET, path = %path, "replacing stale unix socket");
            std::fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                path: path.to_string(),
                source,
            })
        }
        Err(source) => Err(ListenerError::UnixConnect {
            path: path.to_string(),
            source,
        }),
    }
}

#[cfg(unix)]
fn remove_socket_file(path: &Utf8Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(target: LISTENER_TARGET, path = %path, "removed unix socket"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            target: LISTENER_TARGET,
            path = %path,
            error = %error,
            "failed to remove unix socket"
        ),
    }
}
