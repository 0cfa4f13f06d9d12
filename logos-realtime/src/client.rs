//! Public realtime client.
//!
//! Provides:
//! - Topic subscriptions over one shared push connection
//! - Connection state observation ("Live / Connecting / Offline")
//! - Metrics snapshot
//! - Environment hints, manual retry and credential updates
//! - Terminal `destroy()`
//!
//! Create one client per logical consumer scope (e.g. per authenticated
//! session) and share it; it is cheap to clone. Independent clients against
//! the same stream each hold their own connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backoff::{JitterSource, RandomJitter};
use crate::config::{ClientConfig, ConfigError};
use crate::environment::EnvironmentSignal;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::protocol::Envelope;
use crate::registry::{SubscriberId, SubscriberRegistry};
use crate::state::{ConnectionState, ConnectionStateStore, ObserverId};
use crate::supervisor::{Command, Supervisor, SupervisorParts, SupervisorPhase};
use crate::transport::{self, Transport};

/// Client construction errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("RealtimeClient must be created inside a tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct ClientInner {
    registry: Arc<SubscriberRegistry>,
    state: Arc<ConnectionStateStore>,
    metrics: Arc<MetricsCollector>,
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<SupervisorPhase>,
    runtime: Handle,
    destroyed: AtomicBool,
}

impl ClientInner {
    fn send(&self, command: Command) {
        // Fails only once the supervisor has shut down.
        let _ = self.commands.send(command);
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn release(&self, topic: &str, id: SubscriberId) {
        if self.registry.remove(topic, id) && !self.registry.has_any() && !self.is_destroyed() {
            self.send(Command::Release);
        }
    }
}

/// Builder for [`RealtimeClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    jitter: Option<Box<dyn JitterSource>>,
}

impl ClientBuilder {
    /// Use a custom transport instead of the one named in the config.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom jitter source (e.g. [`crate::backoff::FixedJitter`]).
    pub fn jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Some(Box::new(jitter));
        self
    }

    /// Validate the config and spawn the supervisor task.
    pub fn build(self) -> Result<RealtimeClient, ClientError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let registry = Arc::new(SubscriberRegistry::new());
        let state = Arc::new(ConnectionStateStore::new());
        let metrics = Arc::new(MetricsCollector::new());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SupervisorPhase::Idle);

        let transport = self
            .transport
            .unwrap_or_else(|| transport::from_kind(self.config.transport));
        let jitter = self.jitter.unwrap_or_else(|| Box::new(RandomJitter));

        log::info!(
            "Realtime client for {} using {} transport",
            self.config.url,
            transport.name()
        );

        let supervisor = Supervisor::new(
            SupervisorParts {
                config: self.config,
                transport,
                jitter,
                registry: registry.clone(),
                state: state.clone(),
                metrics: metrics.clone(),
                phase: phase_tx,
            },
            commands_rx,
        );
        runtime.spawn(supervisor.run());

        Ok(RealtimeClient {
            inner: Arc::new(ClientInner {
                registry,
                state,
                metrics,
                commands: commands_tx,
                phase: phase_rx,
                runtime,
                destroyed: AtomicBool::new(false),
            }),
        })
    }
}

/// Resilient realtime event client.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("phase", &self.phase())
            .field("topics", &self.topic_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl RealtimeClient {
    /// Client using the transport named in `config` and random jitter.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            jitter: None,
        }
    }

    /// Receive every envelope published on `topic`.
    ///
    /// The first subscriber starts the connection. Dropping or
    /// unsubscribing the last one releases it.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let topic = topic.into();
        if self.is_destroyed() {
            return Subscription::inert(topic);
        }
        let id = self.inner.registry.add(&topic, Arc::new(callback));
        self.inner.send(Command::Ensure);
        Subscription {
            client: Arc::downgrade(&self.inner),
            topic,
            id: Some(id),
            active: AtomicBool::new(true),
        }
    }

    /// Observe connection state. The current state is delivered before
    /// this returns.
    pub fn on_state_change<F>(&self, callback: F) -> StateObserver
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return StateObserver::inert();
        }
        let id = self.inner.state.on_change(Arc::new(callback));
        StateObserver {
            client: Arc::downgrade(&self.inner),
            id: Some(id),
            active: AtomicBool::new(true),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn phase(&self) -> SupervisorPhase {
        *self.inner.phase.borrow()
    }

    /// Wait until the supervisor enters `phase`.
    pub async fn wait_for_phase(&self, phase: SupervisorPhase) {
        let mut rx = self.inner.phase.clone();
        // Err means the supervisor is gone; nothing left to wait for.
        let _ = rx.wait_for(|current| *current == phase).await;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Whether `topic` currently has at least one subscriber.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.registry.contains_topic(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.inner.registry.topic_count()
    }

    /// Forward a host environment change (visibility / connectivity).
    pub fn notify_environment(&self, signal: EnvironmentSignal) {
        if !self.is_destroyed() {
            self.inner.send(Command::Environment(signal));
        }
    }

    /// Forward every signal from `signals` until it ends or the client is
    /// dropped.
    pub fn attach_environment<S>(&self, signals: S) -> JoinHandle<()>
    where
        S: Stream<Item = EnvironmentSignal> + Send + 'static,
    {
        let client = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            let mut signals = std::pin::pin!(signals);
            while let Some(signal) = signals.next().await {
                let Some(inner) = client.upgrade() else {
                    break;
                };
                if inner.is_destroyed() {
                    break;
                }
                inner.send(Command::Environment(signal));
            }
        })
    }

    /// Retry now, resetting the attempt counter. Used after retries were
    /// exhausted; a no-op while connected.
    pub fn reconnect(&self) {
        if !self.is_destroyed() {
            self.inner.send(Command::Reconnect);
        }
    }

    /// Replace the bearer credential. An active connection is closed and
    /// reopened with the new one.
    pub fn set_auth_token(&self, token: Option<String>) {
        if !self.is_destroyed() {
            self.inner.send(Command::Credentials(token));
        }
    }

    /// Tear everything down. Irreversible; repeated calls are no-ops.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.registry.clear();
        self.inner.state.clear_observers();
        self.inner.send(Command::Destroy);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }
}

/// Handle for one topic subscription. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    client: Weak<ClientInner>,
    topic: String,
    id: Option<SubscriberId>,
    active: AtomicBool,
}

impl Subscription {
    fn inert(topic: String) -> Self {
        Self {
            client: Weak::new(),
            topic,
            id: None,
            active: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop receiving events. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let (Some(inner), Some(id)) = (self.client.upgrade(), self.id) {
            inner.release(&self.topic, id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handle for one state observer. Unregisters on drop.
#[must_use = "dropping a StateObserver unregisters it immediately"]
pub struct StateObserver {
    client: Weak<ClientInner>,
    id: Option<ObserverId>,
    active: AtomicBool,
}

impl StateObserver {
    fn inert() -> Self {
        Self {
            client: Weak::new(),
            id: None,
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop receiving state updates. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let (Some(inner), Some(id)) = (self.client.upgrade(), self.id) {
            inner.state.remove(id);
        }
    }
}

impl Drop for StateObserver {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
