//! In-memory control plane with scripted state sequences.
//!
//! Holds a table of applications and records every call made against it.
//! State queries first drain the application's scripted sequence (if one
//! was set with [`InMemoryControlPlane::script_states`]) and then fall back
//! to the stored state, which `start_app`/`stop_app` update.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::debug;

use crate::{AppState, ControlError, ControlPlane, ControlResult};

/// Which control-plane operation a failure is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    State,
    Start,
    Stop,
    RecentLog,
    RecentEvent,
}

/// Number of calls observed per operation for one application.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub state: u32,
    pub start: u32,
    pub stop: u32,
    pub recent_log: u32,
    pub recent_event: u32,
}

struct AppRecord {
    state: AppState,
    scripted: VecDeque<AppState>,
    last_log: Option<SystemTime>,
    last_event: Option<SystemTime>,
}

#[derive(Default)]
struct Inner {
    apps: HashMap<String, AppRecord>,
    calls: HashMap<String, CallCounts>,
    failures: HashMap<Op, VecDeque<ControlError>>,
}

/// A [`ControlPlane`] backed by an in-process table.
#[derive(Default)]
pub struct InMemoryControlPlane {
    inner: Mutex<Inner>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application (builder form).
    pub fn with_app(self, app_id: &str, state: AppState) -> Self {
        self.set_state(app_id, state);
        self
    }

    /// Register or update an application's stored state.
    pub fn set_state(&self, app_id: &str, state: AppState) {
        let mut inner = self.inner.lock().expect("control plane lock");
        inner
            .apps
            .entry(app_id.to_string())
            .and_modify(|app| app.state = state)
            .or_insert_with(|| AppRecord {
                state,
                scripted: VecDeque::new(),
                last_log: None,
                last_event: None,
            });
    }

    /// Queue states returned by the next `app_state` calls, in order.
    pub fn script_states(&self, app_id: &str, states: impl IntoIterator<Item = AppState>) {
        let mut inner = self.inner.lock().expect("control plane lock");
        if let Some(app) = inner.apps.get_mut(app_id) {
            app.scripted.extend(states);
        }
    }

    /// Drop any queued states; later calls see the stored state.
    pub fn clear_script(&self, app_id: &str) {
        let mut inner = self.inner.lock().expect("control plane lock");
        if let Some(app) = inner.apps.get_mut(app_id) {
            app.scripted.clear();
        }
    }

    pub fn set_last_log(&self, app_id: &str, at: Option<SystemTime>) {
        let mut inner = self.inner.lock().expect("control plane lock");
        if let Some(app) = inner.apps.get_mut(app_id) {
            app.last_log = at;
        }
    }

    pub fn set_last_event(&self, app_id: &str, at: Option<SystemTime>) {
        let mut inner = self.inner.lock().expect("control plane lock");
        if let Some(app) = inner.apps.get_mut(app_id) {
            app.last_event = at;
        }
    }

    /// Forget an application; subsequent calls for it fail with `NotFound`.
    pub fn remove_app(&self, app_id: &str) {
        let mut inner = self.inner.lock().expect("control plane lock");
        inner.apps.remove(app_id);
    }

    /// Make the next call of `op` (for any application) fail with `error`.
    pub fn fail_next(&self, op: Op, error: ControlError) {
        let mut inner = self.inner.lock().expect("control plane lock");
        inner.failures.entry(op).or_default().push_back(error);
    }

    /// Calls recorded for an application so far.
    pub fn calls(&self, app_id: &str) -> CallCounts {
        let inner = self.inner.lock().expect("control plane lock");
        inner.calls.get(app_id).copied().unwrap_or_default()
    }

    /// Current stored state, ignoring any scripted sequence.
    pub fn state_of(&self, app_id: &str) -> Option<AppState> {
        let inner = self.inner.lock().expect("control plane lock");
        inner.apps.get(app_id).map(|app| app.state)
    }

    /// Record the call, then apply an injected failure or look up the app.
    fn enter<T>(
        &self,
        op: Op,
        app_id: &str,
        f: impl FnOnce(&mut AppRecord) -> T,
    ) -> ControlResult<T> {
        let mut inner = self.inner.lock().expect("control plane lock");
        let counts = inner.calls.entry(app_id.to_string()).or_default();
        match op {
            Op::State => counts.state += 1,
            Op::Start => counts.start += 1,
            Op::Stop => counts.stop += 1,
            Op::RecentLog => counts.recent_log += 1,
            Op::RecentEvent => counts.recent_event += 1,
        }

        if let Some(error) = inner.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            debug!(?op, %app_id, %error, "injected control plane failure");
            return Err(error);
        }

        match inner.apps.get_mut(app_id) {
            Some(app) => Ok(f(app)),
            None => Err(ControlError::NotFound(app_id.to_string())),
        }
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn app_state(&self, app_id: &str) -> ControlResult<AppState> {
        self.enter(Op::State, app_id, |app| {
            app.scripted.pop_front().unwrap_or(app.state)
        })
    }

    async fn start_app(&self, app_id: &str) -> ControlResult<()> {
        self.enter(Op::Start, app_id, |app| app.state = AppState::Started)
    }

    async fn stop_app(&self, app_id: &str) -> ControlResult<()> {
        self.enter(Op::Stop, app_id, |app| app.state = AppState::Stopped)
    }

    async fn recent_log_timestamp(&self, app_id: &str) -> ControlResult<Option<SystemTime>> {
        self.enter(Op::RecentLog, app_id, |app| app.last_log)
    }

    async fn recent_event_timestamp(&self, app_id: &str) -> ControlResult<Option<SystemTime>> {
        self.enter(Op::RecentEvent, app_id, |app| app.last_event)
    }
}
