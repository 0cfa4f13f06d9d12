//! One live transport connection.
//!
//! A [`TransportSession`] owns the task that drives a [`Transport`] backend.
//! Closing it first marks the sink closed (so nothing the backend still
//! produces reaches the supervisor) and then aborts the task, which drops
//! the socket. Close is idempotent and also runs on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::metrics::MetricsCollector;
use crate::transport::{ConnectRequest, FrameSink, SessionSignal, Transport, TransportError};

pub struct TransportSession {
    id: u64,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl TransportSession {
    /// Spawn the backend for one connection attempt.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn open(
        id: u64,
        transport: &Arc<dyn Transport>,
        request: ConnectRequest,
        signals: mpsc::UnboundedSender<SessionSignal>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let sink = FrameSink::new(id, closed.clone(), signals, metrics);

        log::info!("Session {id}: opening {} connection to {}", transport.name(), request.url);
        let link = transport.run(request, sink.clone());
        let task = tokio::spawn(async move {
            let error = match link.await {
                Ok(()) => TransportError::Closed("connection ended".into()),
                Err(e) => e,
            };
            // No-op when the session was closed in the meantime.
            sink.fail(error);
        });

        Self {
            id,
            closed,
            task: Some(task),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear the connection down. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        log::debug!("Session {}: closed", self.id);
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}
