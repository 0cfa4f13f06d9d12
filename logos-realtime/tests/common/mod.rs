//! Shared helpers for integration tests.
//!
//! `MockTransport` records every connection attempt and hands the test a
//! `MockLink` per attempt to script it: open it, push frames, fail it or end
//! it. It also tracks how many sessions are live at once.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use logos_realtime::{ConnectRequest, FrameSink, Transport, TransportError};

enum Script {
    Open,
    Frame(String),
    Fail(TransportError),
    End,
}

struct Attempt {
    request: ConnectRequest,
    sink: FrameSink,
    script: mpsc::UnboundedSender<Script>,
}

#[derive(Default)]
struct MockState {
    attempts: Vec<Attempt>,
    max_live: usize,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    /// Sessions whose owner has not closed them yet.
    pub fn live_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|a| !a.sink.is_closed())
            .count()
    }

    /// Highest number of simultaneously live sessions ever observed.
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn request(&self, index: usize) -> ConnectRequest {
        self.state.lock().unwrap().attempts[index].request.clone()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.state.lock().unwrap().attempts[index].sink.is_closed()
    }

    pub fn link(&self, index: usize) -> MockLink {
        let state = self.state.lock().unwrap();
        MockLink {
            script: state.attempts[index].script.clone(),
        }
    }

    pub fn last_link(&self) -> MockLink {
        let count = self.connect_count();
        assert!(count > 0, "no connection attempt yet");
        self.link(count - 1)
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn run(&self, request: ConnectRequest, sink: FrameSink) -> BoxFuture<'static, Result<(), TransportError>> {
        let (script_tx, mut script_rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().unwrap();
            let live_before = state.attempts.iter().filter(|a| !a.sink.is_closed()).count();
            state.max_live = state.max_live.max(live_before + 1);
            state.attempts.push(Attempt {
                request,
                sink: sink.clone(),
                script: script_tx,
            });
        }

        Box::pin(async move {
            while let Some(step) = script_rx.recv().await {
                match step {
                    Script::Open => sink.opened(),
                    Script::Frame(raw) => sink.frame(&raw, None),
                    Script::Fail(error) => return Err(error),
                    Script::End => return Ok(()),
                }
            }
            std::future::pending().await
        })
    }
}

/// Script handle for one connection attempt.
#[derive(Clone)]
pub struct MockLink {
    script: mpsc::UnboundedSender<Script>,
}

impl MockLink {
    pub fn open(&self) {
        let _ = self.script.send(Script::Open);
    }

    pub fn frame(&self, raw: &str) {
        let _ = self.script.send(Script::Frame(raw.to_string()));
    }

    pub fn event(&self, topic: &str, event_type: &str, payload: serde_json::Value) {
        let raw = serde_json::json!({"topic": topic, "type": event_type, "payload": payload});
        self.frame(&raw.to_string());
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.script.send(Script::Fail(TransportError::Network(reason.to_string())));
    }

    pub fn fail_with(&self, error: TransportError) {
        let _ = self.script.send(Script::Fail(error));
    }

    pub fn end(&self) {
        let _ = self.script.send(Script::End);
    }
}

/// Let every task run to quiescence. Under a paused clock this advances
/// time by 1 ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Advance (paused) time by `ms` milliseconds.
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Collects envelopes / states delivered to a callback.
#[derive(Clone, Default)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<T> {
        self.items.lock().unwrap().last().cloned()
    }
}
