//! Connection lifecycle state machine.
//!
//! ```text
//!              first subscribe                open
//!   ┌──────┐ ───────────────► ┌────────────┐ ─────► ┌───────────┐
//!   │ Idle │                  │ Connecting │        │ Connected │
//!   └──────┘ ◄─── last ────── └────────────┘ ◄─┐    └─────┬─────┘
//!      ▲       unsubscribe      │ error/timeout │          │ error/close
//!      │                        ▼               │ timer    ▼
//!      │                   ┌──────────┐ ────────┘   ┌──────────┐
//!      └────────────────── │ Retrying │ ◄────────── │ (fail)   │
//!                          └────┬─────┘             └──────────┘
//!                               │ max attempts
//!                               ▼
//!                          ┌───────────┐   subscribe / online / visible /
//!                          │ Exhausted │   reconnect() / new credential
//!                          └───────────┘   ───────► Connecting
//! ```
//!
//! One supervisor task per client owns all of this state; the public API
//! and the transport sessions only talk to it through channels. The task
//! holds at most one [`TransportSession`] and a single timer slot, which
//! carries either the retry delay or the deadline of the attempt in
//! flight. Opening a new session always closes the previous one and
//! clears the timer first.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;

use crate::backoff::{BackoffPolicy, JitterSource};
use crate::config::ClientConfig;
use crate::environment::EnvironmentSignal;
use crate::metrics::MetricsCollector;
use crate::registry::SubscriberRegistry;
use crate::session::TransportSession;
use crate::state::{ConnectionStateStore, ConnectionStatus, StatePatch};
use crate::transport::{ConnectRequest, SessionSignal, SignalKind, Transport, TransportError};

/// Supervisor lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorPhase {
    /// No subscribers, no connection
    Idle,
    Connecting,
    Connected,
    /// Waiting for the retry timer
    Retrying,
    /// Gave up after `max_attempts`; waits for an external trigger
    Exhausted,
    /// Host reported offline; waits for online/visible
    Suspended,
    /// Terminal
    Destroyed,
}

/// Requests from the public API.
#[derive(Debug)]
pub(crate) enum Command {
    /// A subscriber was added; make sure a connection is wanted.
    Ensure,
    /// A subscriber was removed; tear down if none are left.
    Release,
    /// Manual retry.
    Reconnect,
    Environment(EnvironmentSignal),
    Credentials(Option<String>),
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Retry,
    ConnectDeadline,
}

struct PendingTimer {
    kind: TimerKind,
    sleep: Pin<Box<Sleep>>,
}

/// Shared pieces the supervisor works on.
pub(crate) struct SupervisorParts {
    pub config: ClientConfig,
    pub transport: Arc<dyn Transport>,
    pub jitter: Box<dyn JitterSource>,
    pub registry: Arc<SubscriberRegistry>,
    pub state: Arc<ConnectionStateStore>,
    pub metrics: Arc<MetricsCollector>,
    pub phase: watch::Sender<SupervisorPhase>,
}

pub(crate) struct Supervisor {
    config: ClientConfig,
    policy: BackoffPolicy,
    transport: Arc<dyn Transport>,
    jitter: Box<dyn JitterSource>,
    registry: Arc<SubscriberRegistry>,
    state: Arc<ConnectionStateStore>,
    metrics: Arc<MetricsCollector>,
    phase_tx: watch::Sender<SupervisorPhase>,

    phase: SupervisorPhase,
    auth_token: Option<String>,
    /// Consecutive failures since the last successful open
    attempt: u32,
    /// Host reported offline and has not come back yet; survives `Idle`
    offline: bool,
    session: Option<TransportSession>,
    last_session_id: u64,
    timer: Option<PendingTimer>,

    commands: mpsc::UnboundedReceiver<Command>,
    signals_tx: mpsc::UnboundedSender<SessionSignal>,
    signals_rx: mpsc::UnboundedReceiver<SessionSignal>,
}

impl Supervisor {
    pub(crate) fn new(parts: SupervisorParts, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            policy: parts.config.backoff_policy(),
            auth_token: parts.config.auth_token.clone(),
            config: parts.config,
            transport: parts.transport,
            jitter: parts.jitter,
            registry: parts.registry,
            state: parts.state,
            metrics: parts.metrics,
            phase_tx: parts.phase,
            phase: SupervisorPhase::Idle,
            attempt: 0,
            offline: false,
            session: None,
            last_session_id: 0,
            timer: None,
            commands,
            signals_tx,
            signals_rx,
        }
    }

    /// Event loop. Returns once destroyed or once every client handle is gone.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    // All senders dropped: the client is gone.
                    let command = command.unwrap_or(Command::Destroy);
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(signal) = self.signals_rx.recv() => self.handle_signal(signal),
                kind = expired(&mut self.timer) => {
                    self.timer = None;
                    self.handle_timer(kind);
                }
            }
        }
    }

    /// Returns `false` when the loop should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        log::trace!("Supervisor ({:?}) command {command:?}", self.phase);
        match command {
            Command::Ensure => {
                if self.registry.has_any()
                    && matches!(self.phase, SupervisorPhase::Idle | SupervisorPhase::Exhausted)
                {
                    self.attempt = 0;
                    if self.offline {
                        self.suspend();
                    } else {
                        self.connect();
                    }
                }
            }
            Command::Release => {
                if !self.registry.has_any() && self.phase != SupervisorPhase::Idle {
                    self.go_idle();
                }
            }
            Command::Reconnect => self.reconnect_now("manual reconnect"),
            Command::Environment(signal) => match signal {
                EnvironmentSignal::Visible | EnvironmentSignal::Online => {
                    self.reconnect_now(&format!("environment {signal}"));
                }
                EnvironmentSignal::Offline => {
                    self.offline = true;
                    self.suspend();
                }
                EnvironmentSignal::Hidden => log::debug!("Environment hidden, no action"),
            },
            Command::Credentials(token) => {
                self.auth_token = token;
                if self.registry.has_any()
                    && !matches!(self.phase, SupervisorPhase::Idle | SupervisorPhase::Suspended)
                {
                    log::info!("Credential changed, reconnecting");
                    self.attempt = 0;
                    self.connect();
                }
            }
            Command::Destroy => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn handle_signal(&mut self, signal: SessionSignal) {
        let current = self.session.as_ref().map(TransportSession::id);
        if current != Some(signal.session) {
            log::trace!("Ignoring signal from stale session {}", signal.session);
            return;
        }

        match signal.kind {
            SignalKind::Opened => {
                if self.phase != SupervisorPhase::Connecting {
                    return;
                }
                self.cancel_timer();
                self.attempt = 0;
                self.metrics.record_success();
                self.set_phase(SupervisorPhase::Connected);
                log::info!("Session {}: connected", signal.session);
                self.publish(
                    StatePatch::status(ConnectionStatus::Connected)
                        .with_error(None)
                        .with_attempt(0)
                        .with_retry_in(None)
                        .with_event("open"),
                );
            }
            SignalKind::Message(envelope) => {
                self.metrics.record_message();
                self.publish(StatePatch::default().with_event(envelope.event_type.clone()));
                let outcome = self.registry.dispatch(&envelope.topic, &envelope);
                self.metrics.record_callback_failures(outcome.failed as u64);
            }
            SignalKind::Failed(error) => self.fail(error.to_string()),
        }
    }

    fn handle_timer(&mut self, kind: TimerKind) {
        match (kind, self.phase) {
            (TimerKind::Retry, SupervisorPhase::Retrying) => {
                if self.registry.has_any() {
                    self.connect();
                } else {
                    self.go_idle();
                }
            }
            (TimerKind::ConnectDeadline, SupervisorPhase::Connecting) => {
                log::warn!("Connection attempt timed out");
                self.fail(TransportError::Timeout.to_string());
            }
            _ => {}
        }
    }

    /// Start a fresh attempt, replacing any session and pending timer.
    fn connect(&mut self) {
        self.cancel_timer();
        self.close_session();
        self.metrics.record_attempt();
        self.set_phase(SupervisorPhase::Connecting);
        self.publish(
            StatePatch::status(ConnectionStatus::Connecting)
                .with_attempt(self.attempt)
                .with_retry_in(None)
                .with_event("connecting"),
        );

        if self.config.require_auth && self.auth_token.is_none() {
            self.fail("missing auth token".to_string());
            return;
        }

        self.last_session_id += 1;
        let request = ConnectRequest {
            url: self.config.url.clone(),
            auth_token: self.auth_token.clone(),
        };
        self.session = Some(TransportSession::open(
            self.last_session_id,
            &self.transport,
            request,
            self.signals_tx.clone(),
            self.metrics.clone(),
        ));

        if let Some(deadline) = self.config.connect_timeout() {
            self.arm(TimerKind::ConnectDeadline, deadline);
        }
    }

    /// Route a failed attempt or dropped link to the retry path.
    fn fail(&mut self, reason: String) {
        self.cancel_timer();
        self.close_session();
        self.metrics.record_failure();
        self.attempt = self.attempt.saturating_add(1);

        if let Some(max) = self.config.max_attempts {
            if self.attempt >= max {
                log::warn!("Giving up after {} failed attempts: {reason}", self.attempt);
                // State first: waiters on the phase expect the final error to be visible.
                self.publish(
                    StatePatch::status(ConnectionStatus::Disconnected)
                        .with_error(Some(format!(
                            "gave up after {} attempts: {reason}",
                            self.attempt
                        )))
                        .with_attempt(self.attempt)
                        .with_retry_in(None)
                        .with_event("exhausted"),
                );
                self.set_phase(SupervisorPhase::Exhausted);
                return;
            }
        }

        let delay = self.policy.next_delay_with(self.attempt, self.jitter.as_mut());
        log::info!(
            "Connection failed ({reason}); retry {} in {} ms",
            self.attempt,
            delay.as_millis()
        );
        self.set_phase(SupervisorPhase::Retrying);
        self.arm(TimerKind::Retry, delay);
        self.publish(
            StatePatch::status(ConnectionStatus::Disconnected)
                .with_error(Some(reason))
                .with_attempt(self.attempt)
                .with_retry_in(Some(delay))
                .with_event("error"),
        );
    }

    /// Skip the backoff when connectivity looks plausible again.
    fn reconnect_now(&mut self, trigger: &str) {
        self.offline = false;
        if !self.registry.has_any()
            || matches!(
                self.phase,
                SupervisorPhase::Connected | SupervisorPhase::Connecting | SupervisorPhase::Destroyed
            )
        {
            return;
        }
        log::info!("Reconnecting immediately ({trigger})");
        self.attempt = 0;
        self.connect();
    }

    fn suspend(&mut self) {
        if !self.registry.has_any()
            || matches!(self.phase, SupervisorPhase::Suspended | SupervisorPhase::Destroyed)
        {
            return;
        }
        log::info!("Network offline, suspending reconnection");
        self.cancel_timer();
        self.close_session();
        self.set_phase(SupervisorPhase::Suspended);
        self.publish(
            StatePatch::status(ConnectionStatus::Disconnected)
                .with_error(Some("network offline".into()))
                .with_retry_in(None)
                .with_event("offline"),
        );
    }

    fn go_idle(&mut self) {
        self.cancel_timer();
        self.close_session();
        self.attempt = 0;
        self.set_phase(SupervisorPhase::Idle);
        log::info!("No subscribers left, connection released");
        self.publish(
            StatePatch::status(ConnectionStatus::Disconnected)
                .with_error(None)
                .with_attempt(0)
                .with_retry_in(None)
                .with_event("idle"),
        );
    }

    fn shutdown(&mut self) {
        // Timer before transport: nothing may schedule a new open once
        // teardown has started.
        self.cancel_timer();
        self.close_session();
        self.registry.clear();
        self.state.clear_observers();
        self.set_phase(SupervisorPhase::Destroyed);
        log::info!("Realtime client destroyed");
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.timer = Some(PendingTimer {
            kind,
            sleep: Box::pin(tokio::time::sleep(after)),
        });
    }

    fn cancel_timer(&mut self) {
        self.timer = None;
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    fn set_phase(&mut self, phase: SupervisorPhase) {
        self.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn publish(&self, patch: StatePatch) {
        let failed = self.state.update(patch);
        self.metrics.record_callback_failures(failed as u64);
    }
}

/// Resolves when the pending timer fires; never resolves without one.
fn expired(timer: &mut Option<PendingTimer>) -> impl Future<Output = TimerKind> + '_ {
    async move {
        match timer {
            Some(pending) => {
                pending.sleep.as_mut().await;
                pending.kind
            }
            None => std::future::pending().await,
        }
    }
}
