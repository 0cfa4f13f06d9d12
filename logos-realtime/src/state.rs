//! Observable connection state.
//!
//! The supervisor is the only writer. Every [`ConnectionStateStore::update`]
//! merges a [`StatePatch`] and then notifies every observer, synchronously
//! and in registration order, with the complete new state. There is no
//! debouncing: an update that changes nothing still produces a round.
//!
//! Notification rounds, including the first delivery to a new observer, are
//! serialized by a reentrant delivery lock. An observer therefore never sees
//! an older state after a newer one, and may call back into the store from
//! its callback.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use parking_lot::ReentrantMutex;
use serde::Serialize;

/// Link status as shown to the UI ("Live / Connecting / Offline").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Full connection state delivered to observers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Most recent failure, cleared on a successful connect
    pub error: Option<String>,
    /// Name of the most recent transport or envelope event
    pub last_event: Option<String>,
    pub last_event_at: Option<SystemTime>,
    /// Consecutive failed attempts since the last successful connect
    pub attempt: u32,
    /// Delay of the scheduled retry; `None` when nothing is scheduled
    pub retry_in: Option<Duration>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Partial update. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    status: Option<ConnectionStatus>,
    error: Option<Option<String>>,
    last_event: Option<String>,
    attempt: Option<u32>,
    retry_in: Option<Option<Duration>>,
}

impl StatePatch {
    pub fn status(status: ConnectionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    /// Stamp `last_event` (and `last_event_at` with the current time).
    pub fn with_event(mut self, name: impl Into<String>) -> Self {
        self.last_event = Some(name.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_retry_in(mut self, retry_in: Option<Duration>) -> Self {
        self.retry_in = Some(retry_in);
        self
    }

    fn apply(self, state: &mut ConnectionState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(error) = self.error {
            state.error = error;
        }
        if let Some(name) = self.last_event {
            state.last_event = Some(name);
            state.last_event_at = Some(SystemTime::now());
        }
        if let Some(attempt) = self.attempt {
            state.attempt = attempt;
        }
        if let Some(retry_in) = self.retry_in {
            state.retry_in = retry_in;
        }
    }
}

/// State observer callback.
pub type StateCallback = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

/// Store-unique observer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    observers: Vec<(ObserverId, StateCallback)>,
    next_id: u64,
}

/// Current state plus its observers.
#[derive(Default)]
pub struct ConnectionStateStore {
    inner: Mutex<Inner>,
    /// Held for the whole of a notification round; never while `inner` is.
    delivery: ReentrantMutex<()>,
}

impl ConnectionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> ConnectionState {
        self.inner().state.clone()
    }

    /// Merge `patch` and notify every observer. Returns how many observers
    /// panicked.
    pub fn update(&self, patch: StatePatch) -> usize {
        let _round = self.delivery.lock();
        let (state, observers) = {
            let mut inner = self.inner();
            patch.apply(&mut inner.state);
            let observers: Vec<StateCallback> =
                inner.observers.iter().map(|(_, cb)| cb.clone()).collect();
            (inner.state.clone(), observers)
        };

        observers
            .iter()
            .filter(|cb| !notify(cb, &state))
            .count()
    }

    /// Register an observer and immediately deliver the current state to it.
    pub fn on_change(&self, callback: StateCallback) -> ObserverId {
        let _round = self.delivery.lock();
        let (id, current) = {
            let mut inner = self.inner();
            inner.next_id += 1;
            let id = ObserverId(inner.next_id);
            inner.observers.push((id, callback.clone()));
            (id, inner.state.clone())
        };
        notify(&callback, &current);
        id
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut inner = self.inner();
        let before = inner.observers.len();
        inner.observers.retain(|(obs_id, _)| *obs_id != id);
        inner.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.inner().observers.len()
    }

    /// Drop every observer; the state itself is kept.
    pub fn clear_observers(&self) {
        self.inner().observers.clear();
    }
}

/// Invoke one observer, containing a panic. Returns `false` if it panicked.
fn notify(callback: &StateCallback, state: &ConnectionState) -> bool {
    let ok = panic::catch_unwind(AssertUnwindSafe(|| callback(state))).is_ok();
    if !ok {
        log::warn!("State observer panicked on {:?} update", state.status);
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<ConnectionState>>>, StateCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let callback: StateCallback = Arc::new(move |state: &ConnectionState| {
            s.lock().unwrap().push(state.clone());
        });
        (seen, callback)
    }

    #[test]
    fn test_initial_state() {
        let store = ConnectionStateStore::new();
        let state = store.get();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert!(state.error.is_none());
        assert!(state.last_event.is_none());
        assert!(!state.is_connected());
    }

    #[test]
    fn test_on_change_delivers_current_state() {
        let store = ConnectionStateStore::new();
        store.update(StatePatch::status(ConnectionStatus::Connecting));

        let (seen, cb) = recorder();
        store.on_change(cb);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, ConnectionStatus::Connecting);
    }

    #[test]
    fn test_update_merges() {
        let store = ConnectionStateStore::new();
        store.update(
            StatePatch::status(ConnectionStatus::Disconnected)
                .with_error(Some("refused".into()))
                .with_attempt(2),
        );
        store.update(StatePatch::default().with_event("open"));

        let state = store.get();
        assert_eq!(state.error.as_deref(), Some("refused"));
        assert_eq!(state.attempt, 2);
        assert_eq!(state.last_event.as_deref(), Some("open"));
        assert!(state.last_event_at.is_some());
    }

    #[test]
    fn test_error_can_be_cleared() {
        let store = ConnectionStateStore::new();
        store.update(StatePatch::default().with_error(Some("boom".into())));
        store.update(StatePatch::status(ConnectionStatus::Connected).with_error(None));
        assert!(store.get().error.is_none());
        assert!(store.get().is_connected());
    }

    #[test]
    fn test_no_debounce() {
        let store = ConnectionStateStore::new();
        let (seen, cb) = recorder();
        store.on_change(cb);

        store.update(StatePatch::status(ConnectionStatus::Disconnected));
        store.update(StatePatch::status(ConnectionStatus::Disconnected));

        // initial delivery + two identical updates
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_observers_notified_in_order() {
        let store = ConnectionStateStore::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            store.on_change(Arc::new(move |_: &ConnectionState| order.lock().unwrap().push(n)));
        }
        order.lock().unwrap().clear();

        store.update(StatePatch::status(ConnectionStatus::Connecting));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_observer_sees_full_new_state() {
        let store = ConnectionStateStore::new();
        let (seen, cb) = recorder();
        store.on_change(cb);

        store.update(
            StatePatch::status(ConnectionStatus::Connected)
                .with_error(None)
                .with_event("open"),
        );

        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert!(last.is_connected());
        assert_eq!(last.last_event.as_deref(), Some("open"));
    }

    #[test]
    fn test_remove_observer() {
        let store = ConnectionStateStore::new();
        let (seen, cb) = recorder();
        let id = store.on_change(cb);

        assert!(store.remove(id));
        assert!(!store.remove(id));

        store.update(StatePatch::status(ConnectionStatus::Connecting));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panicking_observer_isolated() {
        let store = ConnectionStateStore::new();
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        store.on_change(Arc::new(move |_: &ConnectionState| {
            let mut n = c.lock().unwrap();
            *n += 1;
            if *n > 1 {
                panic!("observer bug");
            }
        }));
        let (seen, cb) = recorder();
        store.on_change(cb);

        let failed = store.update(StatePatch::status(ConnectionStatus::Connecting));

        assert_eq!(failed, 1);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_late_observer_never_ends_on_stale_state() {
        for _ in 0..50 {
            let store = Arc::new(ConnectionStateStore::new());
            let writer = {
                let store = store.clone();
                std::thread::spawn(move || {
                    for attempt in 1..=200 {
                        store.update(StatePatch::default().with_attempt(attempt));
                    }
                })
            };

            let (seen, cb) = recorder();
            store.on_change(cb);
            writer.join().unwrap();

            let attempts: Vec<u32> = seen.lock().unwrap().iter().map(|s| s.attempt).collect();
            assert!(attempts.windows(2).all(|w| w[0] <= w[1]), "out of order: {attempts:?}");
            assert_eq!(attempts.last().copied(), Some(200));
        }
    }

    #[test]
    fn test_observer_may_reenter_store() {
        let store = Arc::new(ConnectionStateStore::new());
        let weak = Arc::downgrade(&store);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        store.on_change(Arc::new(move |state: &ConnectionState| {
            if let Some(store) = weak.upgrade() {
                s.lock().unwrap().push((state.status, store.get().status));
                if state.status == ConnectionStatus::Connecting {
                    store.update(StatePatch::status(ConnectionStatus::Connected));
                }
            }
        }));

        store.update(StatePatch::status(ConnectionStatus::Connecting));

        assert!(store.get().is_connected());
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_clear_observers_keeps_state() {
        let store = ConnectionStateStore::new();
        let (_, cb) = recorder();
        store.on_change(cb);
        store.update(StatePatch::status(ConnectionStatus::Connected));

        store.clear_observers();
        assert_eq!(store.observer_count(), 0);
        assert!(store.get().is_connected());
    }
}
