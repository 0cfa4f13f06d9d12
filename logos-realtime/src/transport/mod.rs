//! Push transports.
//!
//! ```text
//! ┌──────────────────┐  run(request, sink)   ┌──────────────────────┐
//! │ TransportSession │ ────────────────────► │ dyn Transport        │
//! │ (one per attempt)│                       │  ├ WebSocketTransport │
//! └────────┬─────────┘                       │  └ EventStreamTransport│
//!          │                                 └──────────┬───────────┘
//!          │          FrameSink: opened() / frame(raw)  │
//!          ▼  ◄─────────────────────────────────────────┘
//!    Supervisor (SessionSignal, tagged with session id)
//! ```
//!
//! A backend only has to connect, call [`FrameSink::opened`] once the link is
//! up, hand every text frame to [`FrameSink::frame`], and resolve when the
//! link is gone. Decoding, routing and retry policy live above it.

pub mod event_stream;
pub mod websocket;

pub use event_stream::EventStreamTransport;
pub use websocket::WebSocketTransport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::TransportKind;
use crate::metrics::MetricsCollector;
use crate::protocol::Envelope;

/// Why a connection attempt or a live connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unauthorized (HTTP {0})")]
    Unauthorized(u16),
    #[error("Unexpected HTTP status {0}")]
    Http(u16),
    #[error("Connection closed: {0}")]
    Closed(String),
    #[error("Connection timeout")]
    Timeout,
}

/// Parameters for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    /// Bearer credential, fixed for the lifetime of the session
    pub auth_token: Option<String>,
}

/// A push transport backend.
pub trait Transport: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Connect and pump frames into `sink` until the link ends.
    ///
    /// The returned future resolves with the reason the link ended; a clean
    /// end of stream should be reported as [`TransportError::Closed`]. The
    /// future is dropped (not polled further) when the session is closed.
    fn run(&self, request: ConnectRequest, sink: FrameSink) -> BoxFuture<'static, Result<(), TransportError>>;
}

/// Build the backend selected by configuration.
pub fn from_kind(kind: TransportKind) -> Arc<dyn Transport> {
    match kind {
        TransportKind::WebSocket => Arc::new(WebSocketTransport::new()),
        TransportKind::Sse => Arc::new(EventStreamTransport::new()),
    }
}

/// Low-level events reported by a session to the supervisor.
#[derive(Debug)]
pub(crate) enum SignalKind {
    Opened,
    Message(Envelope),
    Failed(TransportError),
}

#[derive(Debug)]
pub(crate) struct SessionSignal {
    pub session: u64,
    pub kind: SignalKind,
}

/// Handed to a backend; forwards its events to the owning supervisor.
///
/// Once the session is closed every call becomes a no-op, so frames that
/// arrive on a torn-down link are never dispatched.
#[derive(Clone)]
pub struct FrameSink {
    session: u64,
    closed: Arc<AtomicBool>,
    signals: mpsc::UnboundedSender<SessionSignal>,
    metrics: Arc<MetricsCollector>,
}

impl FrameSink {
    pub(crate) fn new(
        session: u64,
        closed: Arc<AtomicBool>,
        signals: mpsc::UnboundedSender<SessionSignal>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            session,
            closed,
            signals,
            metrics,
        }
    }

    /// Id of the session this sink belongs to.
    pub fn session_id(&self) -> u64 {
        self.session
    }

    /// Whether the owning session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Report that the link is established.
    pub fn opened(&self) {
        self.emit(SignalKind::Opened);
    }

    /// Hand over one raw text frame.
    ///
    /// Frames that do not decode are counted and dropped.
    pub fn frame(&self, raw: &str, fallback_type: Option<&str>) {
        if self.is_closed() {
            log::trace!("Session {}: frame after close ignored", self.session);
            return;
        }
        match Envelope::decode_with_fallback_type(raw, fallback_type) {
            Ok(envelope) => self.emit(SignalKind::Message(envelope)),
            Err(e) => {
                self.metrics.record_decode_failure();
                log::warn!("Session {}: dropping undecodable frame: {e}", self.session);
            }
        }
    }

    /// Count a frame that could not even be read as text.
    pub fn reject(&self, reason: &str) {
        if self.is_closed() {
            return;
        }
        self.metrics.record_decode_failure();
        log::warn!("Session {}: dropping frame: {reason}", self.session);
    }

    pub(crate) fn fail(&self, error: TransportError) {
        self.emit(SignalKind::Failed(error));
    }

    fn emit(&self, kind: SignalKind) {
        if self.is_closed() {
            return;
        }
        // Receiver gone means the supervisor has shut down.
        let _ = self.signals.send(SessionSignal {
            session: self.session,
            kind,
        });
    }
}
