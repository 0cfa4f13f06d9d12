//! # logos-realtime — Resilient realtime event client for Logos
//!
//! Keeps one auto-recovering push connection (WebSocket or Server-Sent
//! Events) to the server and fans received events out to local
//! subscribers, grouped by topic.
//!
//! ## Architecture
//!
//! ```text
//!  subscribe(topic, cb)        on_state_change(cb)
//!        │                            ▲
//!        ▼                            │
//! ┌──────────────────┐       ┌────────┴─────────┐
//! │ RealtimeClient   │       │ ConnectionState  │
//! │ (facade)         │       │ Store            │
//! └──────┬───────────┘       └────────▲─────────┘
//!        │ commands                   │ updates
//!        ▼                            │
//! ┌──────────────────┐ backoff ┌──────┴───────────┐
//! │ Supervisor task  │ ──────► │ BackoffPolicy    │
//! │ (state machine)  │         └──────────────────┘
//! └──────┬───────────┘
//!        │ open / close               ┌──────────────────┐
//!        ▼                  envelopes │ SubscriberRegistry│
//! ┌──────────────────┐ ─────────────► │ topic → [cb, ..] │
//! │ TransportSession │                └──────────────────┘
//! │  ├ WebSocket     │
//! │  └ SSE           │
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`backoff`] — Exponential backoff with jitter and ceiling
//! - [`state`] — Observable connection state
//! - [`registry`] — Topic → subscriber fan-out with panic isolation
//! - [`protocol`] — `{topic, type, payload}` envelope decoding
//! - [`transport`] — Transport trait plus WebSocket and SSE backends
//! - [`session`] — One live connection with idempotent teardown
//! - [`supervisor`] — Connect / retry / teardown state machine
//! - [`metrics`] — Connection and delivery counters
//! - [`client`] — Public [`RealtimeClient`] API
//!
//! ## Example
//!
//! ```no_run
//! use logos_realtime::{ClientConfig, RealtimeClient};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("wss://logos.example.com/events").with_auth_token("token");
//! let client = RealtimeClient::new(config)?;
//!
//! let _status = client.on_state_change(|state| println!("status: {:?}", state.status));
//! let _comments = client.subscribe("doc-42", |event| {
//!     println!("{} {}", event.event_type, event.payload);
//! });
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod environment;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod transport;

// Re-exports for convenience
pub use backoff::{BackoffPolicy, FixedJitter, JitterSource, RandomJitter};
pub use client::{ClientBuilder, ClientError, RealtimeClient, StateObserver, Subscription};
pub use config::{ClientConfig, ConfigError, TransportKind};
pub use environment::EnvironmentSignal;
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use protocol::{DecodeError, Envelope};
pub use registry::{DispatchOutcome, SubscriberRegistry};
pub use state::{ConnectionState, ConnectionStateStore, ConnectionStatus, StatePatch};
pub use supervisor::SupervisorPhase;
pub use transport::{
    ConnectRequest, EventStreamTransport, FrameSink, Transport, TransportError,
    WebSocketTransport,
};
