//! Connection and delivery counters.
//!
//! All counters are atomics so the supervisor, transport tasks and the
//! public API can touch them without taking a lock. Read them through
//! [`MetricsCollector::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub messages_received: u64,
    /// Frames dropped because they did not decode to an envelope
    pub decode_failures: u64,
    /// Subscriber or observer callbacks that panicked
    pub callback_failures: u64,
    /// Wall-clock time of the most recent successful connection
    pub last_connection_time: Option<SystemTime>,
}

/// Lock-free metrics sink shared by every component of one client.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    connection_attempts: AtomicU64,
    successful_connections: AtomicU64,
    failed_connections: AtomicU64,
    messages_received: AtomicU64,
    decode_failures: AtomicU64,
    callback_failures: AtomicU64,
    /// Millis since the Unix epoch; 0 = never connected
    last_connection_ms: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_connections.fetch_add(1, Ordering::Relaxed);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        // Keep 0 reserved for "never".
        self.last_connection_ms.store(now_ms.max(1), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_failures(&self, count: u64) {
        if count > 0 {
            self.callback_failures.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_ms = self.last_connection_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            successful_connections: self.successful_connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            last_connection_time: (last_ms != 0)
                .then(|| UNIX_EPOCH + Duration::from_millis(last_ms)),
        }
    }
}
