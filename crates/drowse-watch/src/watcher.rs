//! Idle watcher — the periodic check for a single binding.
//!
//! ```text
//! Scheduled ──tick──▶ Checking ──▶ Rescheduled
//!                         │    ──▶ Stopped & Rescheduled
//!                         └──────▶ Ended (app gone / unbound / lease lost)
//! ```
//!
//! Watching continues after a stop: the binding outlives the sleep, and
//! the next idle window starts once the application is woken again.
//! A watch that ends because the application was deleted flags its
//! binding, so no later sweep revives it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use drowse_control::{AppState, ControlPlane};
use drowse_state::{LeaseOutcome, StateStore};
use tracing::{debug, info, warn};

use crate::activity::{ActivityEvaluator, ActivityInfo};
use crate::clock::Clock;
use crate::error::WatchError;
use crate::lease::LeaseKeeper;
use crate::timer::{TimerRegistry, TimerTicket};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still active; `idle_for` is below the interval.
    Active { idle_for: Duration },
    /// A stop request was issued.
    Stopped,
    /// The application was not started; nothing to do.
    NotRunning,
    /// A transient failure abandoned this tick.
    Retry,
    /// The application no longer exists.
    Gone,
    /// The binding was deleted, possibly by another process.
    Unbound,
    /// Another process now owns this binding's watch.
    LeaseLost,
}

impl TickOutcome {
    /// Whether the watcher arms another tick after this one.
    pub fn reschedules(&self) -> bool {
        !matches!(
            self,
            TickOutcome::Gone | TickOutcome::Unbound | TickOutcome::LeaseLost
        )
    }
}

/// Whether an application in this state should be stopped now.
///
/// An application with no observed activity at all counts as idle.
pub fn is_idle(info: &ActivityInfo, now: std::time::SystemTime, interval: Duration) -> bool {
    info.state == AppState::Started && info.idle_for(now).is_none_or(|idle| idle >= interval)
}

/// Watches one binding's application and stops it when idle.
pub struct IdleWatcher {
    binding_id: String,
    app_id: String,
    interval: Duration,
    evaluator: ActivityEvaluator,
    control: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
    lease: Option<LeaseKeeper>,
    bindings: Option<StateStore>,
}

impl IdleWatcher {
    pub fn new(
        binding_id: &str,
        app_id: &str,
        interval: Duration,
        control: Arc<dyn ControlPlane>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            binding_id: binding_id.to_string(),
            app_id: app_id.to_string(),
            interval,
            evaluator: ActivityEvaluator::new(control.clone()),
            control,
            clock,
            lease: None,
            bindings: None,
        }
    }

    /// Check the persisted binding on every tick.
    pub fn with_store(mut self, state: StateStore) -> Self {
        self.bindings = Some(state);
        self
    }

    /// Renew this binding's lease on every tick.
    pub fn with_lease(mut self, lease: LeaseKeeper) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn binding_id(&self) -> &str {
        &self.binding_id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arm the first tick, one interval from now.
    pub fn start(self: Arc<Self>, timers: &TimerRegistry) {
        let key = self.binding_id.clone();
        let interval = self.interval;
        debug!(binding_id = %key, app_id = %self.app_id, ?interval, "watch armed");
        timers.schedule(&key, interval, move |ticket| self.run(ticket));
    }

    fn run(self: Arc<Self>, ticket: TimerTicket) -> BoxFuture {
        Box::pin(async move {
            let outcome = self.tick().await;
            if !outcome.reschedules() {
                info!(binding_id = %self.binding_id, ?outcome, "watch ended");
                match outcome {
                    TickOutcome::Gone => {
                        self.mark_gone();
                        self.release_lease();
                    }
                    TickOutcome::Unbound => self.release_lease(),
                    _ => {}
                }
                return;
            }

            let interval = self.interval;
            let next = self.clone();
            if !ticket.reschedule(interval, move |t| next.run(t)) {
                debug!(binding_id = %self.binding_id, "watch cancelled during tick");
            }
        })
    }

    fn mark_gone(&self) {
        if let Some(state) = &self.bindings {
            if let Err(e) = state.mark_binding_gone(&self.binding_id) {
                warn!(binding_id = %self.binding_id, error = %e, "failed to flag binding as gone");
            }
        }
    }

    fn release_lease(&self) {
        if let Some(lease) = &self.lease {
            if let Err(e) = lease.release(&self.binding_id) {
                warn!(binding_id = %self.binding_id, error = %e, "failed to release watch lease");
            }
        }
    }

    /// Evaluate the application once and stop it if idle.
    pub async fn tick(&self) -> TickOutcome {
        if let Some(state) = &self.bindings {
            match state.get_binding(&self.binding_id) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!(binding_id = %self.binding_id, "binding deleted");
                    return TickOutcome::Unbound;
                }
                Err(e) => {
                    warn!(binding_id = %self.binding_id, error = %e, "failed to read binding");
                }
            }
        }

        if let Some(lease) = &self.lease {
            match lease.acquire(&self.binding_id, self.interval, self.clock.now()) {
                Ok(LeaseOutcome::Acquired(_)) => {}
                Ok(LeaseOutcome::HeldElsewhere(held)) => {
                    warn!(binding_id = %self.binding_id, owner = %held.owner, "watch lease taken over");
                    return TickOutcome::LeaseLost;
                }
                Err(e) => {
                    warn!(binding_id = %self.binding_id, error = %e, "failed to renew watch lease");
                }
            }
        }

        let info = match self.evaluator.evaluate(&self.app_id).await {
            Ok(info) => info,
            Err(WatchError::AppNotFound(_)) => {
                info!(binding_id = %self.binding_id, app_id = %self.app_id, "application not found");
                return TickOutcome::Gone;
            }
            Err(e) => {
                warn!(app_id = %self.app_id, error = %e, "activity check failed, retrying next tick");
                return TickOutcome::Retry;
            }
        };

        if info.state != AppState::Started {
            debug!(app_id = %self.app_id, state = ?info.state, "application not running");
            return TickOutcome::NotRunning;
        }

        let now = self.clock.now();
        if !is_idle(&info, now, self.interval) {
            let idle_for = info.idle_for(now).unwrap_or_default();
            debug!(app_id = %self.app_id, ?idle_for, "application active");
            return TickOutcome::Active { idle_for };
        }

        match self.control.stop_app(&self.app_id).await {
            Ok(()) => {
                info!(
                    binding_id = %self.binding_id,
                    app_id = %self.app_id,
                    idle_for = ?info.idle_for(now),
                    "idle application stopped"
                );
                TickOutcome::Stopped
            }
            Err(e) if e.is_not_found() => TickOutcome::Gone,
            Err(e) => {
                warn!(app_id = %self.app_id, error = %e, "stop request failed, retrying next tick");
                TickOutcome::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use drowse_control::memory::Op;
    use drowse_control::{ControlError, InMemoryControlPlane};
    use std::time::{SystemTime, UNIX_EPOCH};

    const T: u64 = 1_000_000;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn setup(log: u64, event: u64) -> (Arc<InMemoryControlPlane>, Arc<ManualClock>, IdleWatcher) {
        let cp = Arc::new(InMemoryControlPlane::new().with_app("app-x", AppState::Started));
        cp.set_last_log("app-x", Some(at(log)));
        cp.set_last_event("app-x", Some(at(event)));
        let clock = Arc::new(ManualClock::new(at(T)));
        let watcher = IdleWatcher::new(
            "b1",
            "app-x",
            Duration::from_secs(60),
            cp.clone(),
            clock.clone(),
        );
        (cp, clock, watcher)
    }

    #[tokio::test]
    async fn recent_log_keeps_app_running() {
        let (cp, _clock, watcher) = setup(T - 10, T - 70);

        let outcome = watcher.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Active {
                idle_for: Duration::from_secs(10)
            }
        );
        assert_eq!(cp.calls("app-x").stop, 0);
    }

    #[tokio::test]
    async fn idle_past_interval_stops_once() {
        let (cp, _clock, watcher) = setup(T - 120, T - 90);

        assert_eq!(watcher.tick().await, TickOutcome::Stopped);
        assert_eq!(cp.calls("app-x").stop, 1);
        assert_eq!(cp.state_of("app-x"), Some(AppState::Stopped));

        // Already stopped: the next tick issues nothing.
        assert_eq!(watcher.tick().await, TickOutcome::NotRunning);
        assert_eq!(cp.calls("app-x").stop, 1);
    }

    #[tokio::test]
    async fn idle_exactly_interval_stops() {
        let (cp, _clock, watcher) = setup(T - 60, T - 600);
        assert_eq!(watcher.tick().await, TickOutcome::Stopped);
        assert_eq!(cp.calls("app-x").stop, 1);
    }

    #[tokio::test]
    async fn no_activity_observed_counts_as_idle() {
        let (cp, _clock, watcher) = setup(0, 0);
        cp.set_last_log("app-x", None);
        cp.set_last_event("app-x", None);

        assert_eq!(watcher.tick().await, TickOutcome::Stopped);
    }

    #[tokio::test]
    async fn missing_app_ends_watch() {
        let (cp, _clock, watcher) = setup(T, T);
        cp.remove_app("app-x");

        let outcome = watcher.tick().await;
        assert_eq!(outcome, TickOutcome::Gone);
        assert!(!outcome.reschedules());
    }

    #[tokio::test]
    async fn transient_failure_retries() {
        let (cp, _clock, watcher) = setup(T - 120, T - 90);
        cp.fail_next(Op::State, ControlError::Transport("timeout".into()));

        let outcome = watcher.tick().await;
        assert_eq!(outcome, TickOutcome::Retry);
        assert!(outcome.reschedules());
        assert_eq!(cp.calls("app-x").stop, 0);
    }

    #[tokio::test]
    async fn failed_stop_retries() {
        let (cp, _clock, watcher) = setup(T - 120, T - 90);
        cp.fail_next(Op::Stop, ControlError::Api { status: 500, message: "nope".into() });

        assert_eq!(watcher.tick().await, TickOutcome::Retry);
        assert_eq!(cp.state_of("app-x"), Some(AppState::Started));
    }

    #[tokio::test]
    async fn lease_taken_over_ends_watch_without_stopping() {
        let (cp, clock, watcher) = setup(T - 120, T - 90);
        let state = drowse_state::StateStore::open_in_memory().unwrap();
        state
            .acquire_watch_lease(
                "b1",
                "node-b",
                crate::clock::epoch_millis(clock.now()),
                Duration::from_secs(90),
            )
            .unwrap();
        let lease = LeaseKeeper::new(state, "node-a", Duration::from_secs(30));
        let watcher = watcher.with_lease(lease);

        let outcome = watcher.tick().await;
        assert_eq!(outcome, TickOutcome::LeaseLost);
        assert!(!outcome.reschedules());
        assert_eq!(cp.calls("app-x").state, 0);
        assert_eq!(cp.calls("app-x").stop, 0);
    }

    #[tokio::test]
    async fn deleted_binding_ends_watch_before_any_query() {
        let (cp, _clock, watcher) = setup(T - 120, T - 90);
        let state = drowse_state::StateStore::open_in_memory().unwrap();
        state
            .put_binding(&drowse_state::Binding::new("b1", "app-x", "si-1", 0))
            .unwrap();
        let watcher = watcher.with_store(state.clone());

        state.delete_binding("b1").unwrap();
        let outcome = watcher.tick().await;

        assert_eq!(outcome, TickOutcome::Unbound);
        assert!(!outcome.reschedules());
        assert_eq!(cp.calls("app-x").state, 0);
        assert_eq!(cp.calls("app-x").stop, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_app_flags_binding_when_watch_ends() {
        let (cp, _clock, watcher) = setup(T, T);
        let state = drowse_state::StateStore::open_in_memory().unwrap();
        state
            .put_binding(&drowse_state::Binding::new("b1", "app-x", "si-1", 0))
            .unwrap();
        let timers = TimerRegistry::new();
        Arc::new(watcher.with_store(state.clone())).start(&timers);
        cp.remove_app("app-x");

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!timers.is_scheduled("b1"));
        assert!(state.get_binding("b1").unwrap().unwrap().app_gone);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_ticks_continue_after_stop() {
        let (cp, clock, watcher) = setup(T - 10, T - 70);
        let timers = TimerRegistry::new();
        Arc::new(watcher).start(&timers);

        // First tick at +60s: activity 70s old in wall-clock terms.
        clock.advance(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cp.calls("app-x").stop, 1);
        assert!(timers.is_scheduled("b1"));

        // Second tick at +120s: app already stopped, still watching.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(cp.calls("app-x").stop, 1);
        assert_eq!(cp.calls("app-x").state, 2);
        assert!(timers.is_scheduled("b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_watch_ends_when_app_disappears() {
        let (cp, _clock, watcher) = setup(T, T);
        let timers = TimerRegistry::new();
        Arc::new(watcher).start(&timers);
        cp.remove_app("app-x");

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!timers.is_scheduled("b1"));
    }
}
