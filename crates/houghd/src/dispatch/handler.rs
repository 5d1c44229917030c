//! Per-connection request loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use hough_protocol::{
    DetectResponse, FrameError, RoiRecord, parse_header, read_frame, read_frame_or_eof, write_json,
};

use crate::transport::{ConnectionHandler, ConnectionStream};

use super::{DISPATCH_TARGET, DispatchEngine};

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandlerSettings {
    /// Longest wait for the next bytes from the client; `None` waits
    /// forever.
    pub(crate) idle_timeout: Option<Duration>,
    /// Largest frame accepted from the client.
    pub(crate) max_frame_bytes: u64,
}

/// What to do with the connection after an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Continue,
    Close,
}

/// Serves framed detection requests until the client leaves.
pub(crate) struct DetectionConnectionHandler {
    engine: DispatchEngine,
    shutdown: Arc<AtomicBool>,
    settings: HandlerSettings,
}

impl DetectionConnectionHandler {
    pub(crate) fn new(
        engine: DispatchEngine,
        shutdown: Arc<AtomicBool>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            engine,
            shutdown,
            settings,
        }
    }

    fn serve(&self, stream: &mut ConnectionStream) -> Result<(), FrameError> {
        let limit = self.settings.max_frame_bytes;
        while !self.shutdown.load(Ordering::SeqCst) {
            if self.exchange(stream, limit)? == Next::Close {
                break;
            }
        }
        Ok(())
    }

    fn exchange(&self, stream: &mut ConnectionStream, limit: u64) -> Result<Next, FrameError> {
        let Some(header) = read_frame_or_eof(stream, limit)? else {
            return Ok(Next::Close);
        };
        let request = match parse_header(&header, limit) {
            Ok(request) => request,
            Err(error) if error.closes_connection() => {
                warn!(target: DISPATCH_TARGET, error = %error, "unreadable request header; closing connection");
                return Ok(Next::Close);
            }
            Err(error) => {
                debug!(target: DISPATCH_TARGET, error = %error, "rejected request header");
                write_json(stream, &DetectResponse::failure(error.to_string()))?;
                return Ok(Next::Continue);
            }
        };

        let thresholds = request.thresholds();
        let mut records = Vec::with_capacity(request.len());
        for spec in request.into_specs() {
            let pixels = read_frame(stream, limit)?;
            match RoiRecord::from_frame(spec, pixels) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(target: DISPATCH_TARGET, error = %error, "pixel frame mismatch; closing connection");
                    write_json(stream, &DetectResponse::failure(error.to_string()))?;
                    return Ok(Next::Close);
                }
            }
        }

        let response = self.engine.run(thresholds, records);
        write_json(stream, &response)?;
        Ok(Next::Continue)
    }
}

impl ConnectionHandler for DetectionConnectionHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        let peer = stream.peer();
        if let Err(error) = stream.set_read_timeout(self.settings.idle_timeout) {
            warn!(target: DISPATCH_TARGET, peer = %peer, error = %error, "failed to set idle timeout");
            return;
        }
        debug!(target: DISPATCH_TARGET, peer = %peer, "connection opened");
        match self.serve(&mut stream) {
            Ok(()) => debug!(target: DISPATCH_TARGET, peer = %peer, "connection closed"),
            Err(error) => info!(target: DISPATCH_TARGET, peer = %peer, error = %error, "connection dropped"),
        }
    }
}
