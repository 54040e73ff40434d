//! Watch manager — owns the lifecycle of every idle watcher.
//!
//! Watchers are created at startup for each persisted binding and on new
//! bindings, and cancelled on unbind or shutdown. A binding is only
//! watched after its lease has been acquired, so two processes sharing a
//! store never watch the same binding at once.

use std::sync::Arc;
use std::time::Duration;

use drowse_control::ControlPlane;
use drowse_state::{Binding, LeaseOutcome, StateStore};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{WatchError, WatchResult};
use crate::lease::LeaseKeeper;
use crate::timer::TimerRegistry;
use crate::watcher::IdleWatcher;

/// Tally of one acquisition sweep over the persisted bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub started: usize,
    pub already_watching: usize,
    pub owned_elsewhere: usize,
    /// Bindings whose application was found deleted.
    pub app_gone: usize,
    pub failed: usize,
}

pub struct WatchManager {
    state: StateStore,
    control: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
    leases: LeaseKeeper,
    timers: TimerRegistry,
}

impl WatchManager {
    pub fn new(
        state: StateStore,
        control: Arc<dyn ControlPlane>,
        clock: Arc<dyn Clock>,
        owner: &str,
        lease_grace: Duration,
    ) -> Self {
        Self {
            leases: LeaseKeeper::new(state.clone(), owner, lease_grace),
            state,
            control,
            clock,
            timers: TimerRegistry::new(),
        }
    }

    pub fn owner(&self) -> &str {
        self.leases.owner()
    }

    /// Start a watcher for every persisted binding not owned elsewhere.
    pub fn initialize(&self) -> WatchResult<InitReport> {
        let report = self.sweep()?;
        info!(
            owner = %self.owner(),
            started = report.started,
            owned_elsewhere = report.owned_elsewhere,
            app_gone = report.app_gone,
            failed = report.failed,
            "watch manager initialized"
        );
        Ok(report)
    }

    /// Pick up bindings whose previous owner's lease has expired.
    pub fn adopt_orphans(&self) -> WatchResult<InitReport> {
        let report = self.sweep()?;
        if report.started > 0 {
            info!(adopted = report.started, "adopted orphaned bindings");
        }
        Ok(report)
    }

    /// Re-run the acquisition sweep every `interval` until shutdown.
    pub async fn run_adoption(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "orphan adoption started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.adopt_orphans() {
                        warn!(error = %e, "orphan adoption sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("orphan adoption shutting down");
                    break;
                }
            }
        }
    }

    fn sweep(&self) -> WatchResult<InitReport> {
        let mut report = InitReport::default();

        for binding in self.state.list_bindings()? {
            if self.timers.is_scheduled(&binding.id) {
                report.already_watching += 1;
                continue;
            }
            if binding.app_gone {
                report.app_gone += 1;
                continue;
            }

            match self.watch(&binding) {
                Ok(()) => report.started += 1,
                Err(WatchError::OwnedElsewhere { owner, .. }) => {
                    debug!(binding_id = %binding.id, %owner, "binding watched elsewhere");
                    report.owned_elsewhere += 1;
                }
                Err(e) => {
                    warn!(binding_id = %binding.id, error = %e, "failed to start watch");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Watch a new binding and persist it.
    pub fn on_bind(&self, binding: &Binding) -> WatchResult<()> {
        self.watch(binding)?;

        if let Err(e) = self.state.put_binding(binding) {
            self.timers.cancel(&binding.id);
            if let Err(release) = self.leases.release(&binding.id) {
                warn!(binding_id = %binding.id, error = %release, "failed to release watch lease");
            }
            return Err(e.into());
        }

        info!(binding_id = %binding.id, app_id = %binding.app_id, "binding watched");
        Ok(())
    }

    /// Stop watching a binding and forget it.
    ///
    /// Unknown bindings are a no-op. A binding without an id is a caller
    /// bug: it is logged and ignored.
    pub fn on_unbind(&self, binding: &Binding) -> WatchResult<()> {
        if !binding.has_id() {
            error!(
                app_id = %binding.app_id,
                service_instance_id = %binding.service_instance_id,
                "PROBABLE BUG: unbind called with a binding that has no id"
            );
            return Ok(());
        }

        let cancelled = self.timers.cancel(&binding.id);
        self.leases.release(&binding.id)?;
        let deleted = self.state.delete_binding(&binding.id)?;

        info!(binding_id = %binding.id, cancelled, deleted, "binding unwatched");
        Ok(())
    }

    /// Cancel every watcher and release its lease. Bindings stay persisted
    /// so another process, or this one after a restart, resumes them.
    pub fn shutdown(&self) -> usize {
        let keys = self.timers.keys();
        let cancelled = self.timers.cancel_all();

        for binding_id in &keys {
            if let Err(e) = self.leases.release(binding_id) {
                warn!(%binding_id, error = %e, "failed to release watch lease");
            }
        }

        info!(cancelled, "watch manager shut down");
        cancelled
    }

    pub fn is_watching(&self, binding_id: &str) -> bool {
        self.timers.is_scheduled(binding_id)
    }

    /// Binding ids with a pending tick, sorted.
    pub fn watched(&self) -> Vec<String> {
        let mut keys = self.timers.keys();
        keys.sort();
        keys
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    fn interval_for(&self, binding: &Binding) -> WatchResult<Duration> {
        let instance = self
            .state
            .get_service_instance(&binding.service_instance_id)?
            .ok_or_else(|| {
                WatchError::ServiceInstanceNotFound(binding.service_instance_id.clone())
            })?;

        let interval = instance.idle_interval();
        if interval.is_zero() {
            return Err(WatchError::InvalidInterval(instance.id));
        }
        Ok(interval)
    }

    /// Acquire the lease and arm the first tick.
    fn watch(&self, binding: &Binding) -> WatchResult<()> {
        let interval = self.interval_for(binding)?;

        match self.leases.acquire(&binding.id, interval, self.clock.now())? {
            LeaseOutcome::Acquired(_) => {}
            LeaseOutcome::HeldElsewhere(lease) => {
                return Err(WatchError::OwnedElsewhere {
                    binding_id: binding.id.clone(),
                    owner: lease.owner,
                });
            }
        }

        let watcher = IdleWatcher::new(
            &binding.id,
            &binding.app_id,
            interval,
            self.control.clone(),
            self.clock.clone(),
        )
        .with_store(self.state.clone())
        .with_lease(self.leases.clone());
        Arc::new(watcher).start(&self.timers);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use drowse_control::{AppState, InMemoryControlPlane};
    use drowse_state::ServiceInstance;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn binding(id: &str, app: &str) -> Binding {
        Binding::new(id, app, "si-1", 0)
    }

    fn setup() -> (StateStore, Arc<InMemoryControlPlane>, Arc<ManualClock>) {
        let state = StateStore::open_in_memory().unwrap();
        state
            .put_service_instance(&ServiceInstance {
                id: "si-1".into(),
                idle_interval_secs: 60,
                created_at: 0,
            })
            .unwrap();
        let cp = Arc::new(
            InMemoryControlPlane::new()
                .with_app("app-1", AppState::Started)
                .with_app("app-2", AppState::Started),
        );
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_000_000)));
        (state, cp, clock)
    }

    fn manager(
        state: &StateStore,
        cp: &Arc<InMemoryControlPlane>,
        clock: &Arc<ManualClock>,
        owner: &str,
    ) -> WatchManager {
        WatchManager::new(
            state.clone(),
            cp.clone(),
            clock.clone(),
            owner,
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn bind_persists_and_watches() {
        let (state, cp, clock) = setup();
        let mgr = manager(&state, &cp, &clock, "node-a");

        mgr.on_bind(&binding("b1", "app-1")).unwrap();

        assert!(mgr.is_watching("b1"));
        assert!(state.get_binding("b1").unwrap().is_some());
        assert_eq!(state.get_watch_lease("b1").unwrap().unwrap().owner, "node-a");
    }

    #[tokio::test]
    async fn bind_with_unknown_instance_fails_without_persisting() {
        let (state, cp, clock) = setup();
        let mgr = manager(&state, &cp, &clock, "node-a");
        let mut b = binding("b1", "app-1");
        b.service_instance_id = "missing".into();

        let err = mgr.on_bind(&b).unwrap_err();
        assert!(matches!(err, WatchError::ServiceInstanceNotFound(_)));
        assert!(!mgr.is_watching("b1"));
        assert!(state.get_binding("b1").unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (state, cp, clock) = setup();
        state
            .put_service_instance(&ServiceInstance {
                id: "si-0".into(),
                idle_interval_secs: 0,
                created_at: 0,
            })
            .unwrap();
        let mgr = manager(&state, &cp, &clock, "node-a");
        let mut b = binding("b1", "app-1");
        b.service_instance_id = "si-0".into();

        assert!(matches!(mgr.on_bind(&b), Err(WatchError::InvalidInterval(_))));
    }

    #[tokio::test]
    async fn unbind_cancels_and_deletes() {
        let (state, cp, clock) = setup();
        let mgr = manager(&state, &cp, &clock, "node-a");
        let b = binding("b1", "app-1");
        mgr.on_bind(&b).unwrap();

        mgr.on_unbind(&b).unwrap();

        assert!(!mgr.is_watching("b1"));
        assert!(state.get_binding("b1").unwrap().is_none());
        assert!(state.get_watch_lease("b1").unwrap().is_none());
        // Idempotent.
        mgr.on_unbind(&b).unwrap();
    }

    #[tokio::test]
    async fn unbind_without_id_is_ignored() {
        let (state, cp, clock) = setup();
        let mgr = manager(&state, &cp, &clock, "node-a");
        mgr.on_bind(&binding("b1", "app-1")).unwrap();

        mgr.on_unbind(&binding("  ", "app-1")).unwrap();
        assert!(mgr.is_watching("b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn unbind_before_tick_prevents_stop() {
        let (state, cp, clock) = setup();
        let mgr = manager(&state, &cp, &clock, "node-a");
        let b = binding("b1", "app-1");
        mgr.on_bind(&b).unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        mgr.on_unbind(&b).unwrap();
        clock.advance(Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(cp.calls("app-1").state, 0);
        assert_eq!(cp.calls("app-1").stop, 0);
    }

    #[tokio::test]
    async fn initialize_skips_bindings_owned_elsewhere() {
        let (state, cp, clock) = setup();
        state.put_binding(&binding("b1", "app-1")).unwrap();
        state.put_binding(&binding("b2", "app-2")).unwrap();

        let a = manager(&state, &cp, &clock, "node-a");
        let b = manager(&state, &cp, &clock, "node-b");

        let report_a = a.initialize().unwrap();
        assert_eq!(report_a.started, 2);

        let report_b = b.initialize().unwrap();
        assert_eq!(report_b.started, 0);
        assert_eq!(report_b.owned_elsewhere, 2);
        assert!(b.watched().is_empty());

        // Second sweep on the owner is a no-op.
        let again = a.adopt_orphans().unwrap();
        assert_eq!(again.already_watching, 2);
    }

    #[tokio::test]
    async fn shutdown_releases_leases_and_keeps_bindings() {
        let (state, cp, clock) = setup();
        state.put_binding(&binding("b1", "app-1")).unwrap();
        state.put_binding(&binding("b2", "app-2")).unwrap();
        let a = manager(&state, &cp, &clock, "node-a");
        a.initialize().unwrap();

        assert_eq!(a.shutdown(), 2);
        assert!(a.watched().is_empty());
        assert_eq!(state.list_bindings().unwrap().len(), 2);
        assert!(state.list_watch_leases().unwrap().is_empty());

        // Another node resumes immediately.
        let b = manager(&state, &cp, &clock, "node-b");
        assert_eq!(b.initialize().unwrap().started, 2);
        assert_eq!(b.watched(), vec!["b1".to_string(), "b2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn adoption_loop_sweeps_until_shutdown() {
        let (state, cp, clock) = setup();
        state.put_binding(&binding("b1", "app-1")).unwrap();
        let mgr = Arc::new(manager(&state, &cp, &clock, "node-a"));
        let (tx, rx) = watch::channel(false);

        let looping = mgr.clone();
        let handle = tokio::spawn(async move {
            looping.run_adoption(Duration::from_secs(10), rx).await;
        });

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(mgr.is_watching("b1"));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn watch_ended_by_missing_app_is_not_adopted_again() {
        let (state, cp, clock) = setup();
        let mgr = manager(&state, &cp, &clock, "node-a");
        mgr.on_bind(&binding("b1", "app-1")).unwrap();
        cp.remove_app("app-1");

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!mgr.is_watching("b1"));
        assert!(state.get_watch_lease("b1").unwrap().is_none());
        let queries = cp.calls("app-1").state;

        let report = mgr.adopt_orphans().unwrap();
        assert_eq!(report.started, 0);
        assert_eq!(report.app_gone, 1);
        assert!(!mgr.is_watching("b1"));

        // Nor by another node.
        let other = manager(&state, &cp, &clock, "node-b");
        assert_eq!(other.initialize().unwrap().started, 0);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(cp.calls("app-1").state, queries);

        // Re-binding starts a fresh watch.
        mgr.on_bind(&binding("b1", "app-1")).unwrap();
        assert!(mgr.is_watching("b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn unbind_from_other_node_ends_owner_watch() {
        let (state, cp, clock) = setup();
        let a = manager(&state, &cp, &clock, "node-a");
        let b = manager(&state, &cp, &clock, "node-b");
        let bound = binding("b1", "app-1");
        a.on_bind(&bound).unwrap();

        b.on_unbind(&bound).unwrap();
        assert!(state.get_binding("b1").unwrap().is_none());

        // App has no activity at all, so a live watch would stop it.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cp.calls("app-1").state, 0);
        assert_eq!(cp.calls("app-1").stop, 0);
        assert!(!a.is_watching("b1"));
        assert!(state.get_watch_lease("b1").unwrap().is_none());
    }

    #[tokio::test]
    async fn orphans_adopted_after_lease_expiry() {
        let (state, cp, clock) = setup();
        state.put_binding(&binding("b1", "app-1")).unwrap();
        let a = manager(&state, &cp, &clock, "node-a");
        a.initialize().unwrap();
        // node-a dies without shutting down.
        a.timers().cancel_all();

        let b = manager(&state, &cp, &clock, "node-b");
        assert_eq!(b.adopt_orphans().unwrap().owned_elsewhere, 1);

        // Interval (60s) plus grace (30s) elapsed.
        clock.set(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + 91));
        assert_eq!(b.adopt_orphans().unwrap().started, 1);
        assert_eq!(state.get_watch_lease("b1").unwrap().unwrap().owner, "node-b");
    }
}
