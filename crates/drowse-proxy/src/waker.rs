//! App waker — one restart per sleep cycle.
//!
//! ```text
//! claim ─▶ NotMapped / InProgress        (nothing to do)
//!   └────▶ Claimed ─▶ start if needed ─▶ poll with backoff
//!                                          ├─ STARTED  ─▶ delete entry
//!                                          └─ deadline ─▶ release claim
//! ```
//!
//! The claim is an atomic compare-and-set in the state store, so of any
//! number of concurrent requests, across processes sharing the store,
//! exactly one drives the restart. The rest see `InProgress`.

use std::sync::Arc;
use std::time::Duration;

use drowse_control::{AppState, ControlPlane};
use drowse_state::{ClaimOutcome, ProxyMapEntry, StateStore};
use drowse_watch::{Clock, epoch_millis};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RestartPolicy;
use crate::error::{ProxyError, ProxyResult};

/// What a wake attempt found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeOutcome {
    /// This call restarted the application and removed its mapping.
    Woken { app_id: String, waited: Duration },
    /// Another claimant is restarting it.
    InProgress,
    /// The hostname has no mapping; the application is presumed awake.
    NotMapped,
}

/// Poll delay that doubles after every unsuccessful poll, up to a cap.
#[derive(Debug, Clone)]
struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    fn new(policy: &RestartPolicy) -> Self {
        Self {
            current: policy.initial_poll,
            max: policy.max_poll,
        }
    }

    /// The delay to wait now; advances the next one.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Claims mapping entries and restarts their applications.
pub struct AppWaker {
    state: StateStore,
    control: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
    owner: String,
    policy: RestartPolicy,
    claim_ttl: Duration,
}

impl AppWaker {
    pub fn new(
        state: StateStore,
        control: Arc<dyn ControlPlane>,
        clock: Arc<dyn Clock>,
        owner: &str,
        policy: RestartPolicy,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            state,
            control,
            clock,
            owner: owner.to_string(),
            policy,
            claim_ttl,
        }
    }

    /// Wake the application mapped to `hostname`, if this call wins the claim.
    pub async fn wake(&self, hostname: &str) -> ProxyResult<WakeOutcome> {
        let now_ms = epoch_millis(self.clock.now());
        let entry = match self
            .state
            .claim_proxy_entry(hostname, &self.owner, now_ms, self.claim_ttl)?
        {
            ClaimOutcome::Claimed(entry) => entry,
            ClaimOutcome::InProgress => return Ok(WakeOutcome::InProgress),
            ClaimOutcome::NotMapped => return Ok(WakeOutcome::NotMapped),
        };

        info!(%hostname, app_id = %entry.app_id, "waking application");
        let started_at = Instant::now();

        match self.start_and_wait(&entry.app_id).await {
            Ok(()) => {
                self.state.delete_proxy_entry(&entry.hostname)?;
                let waited = started_at.elapsed();
                info!(%hostname, app_id = %entry.app_id, ?waited, "application awake");
                Ok(WakeOutcome::Woken {
                    app_id: entry.app_id,
                    waited,
                })
            }
            Err(e) => {
                error!(%hostname, app_id = %entry.app_id, error = %e, "wake failed, releasing claim");
                self.release(&entry);
                Err(e)
            }
        }
    }

    fn release(&self, entry: &ProxyMapEntry) {
        match self.state.release_proxy_claim(&entry.hostname, &self.owner) {
            Ok(true) => {}
            Ok(false) => warn!(hostname = %entry.hostname, "claim no longer held at release"),
            Err(e) => warn!(hostname = %entry.hostname, error = %e, "failed to release claim"),
        }
    }

    async fn start_and_wait(&self, app_id: &str) -> ProxyResult<()> {
        match self.control.app_state(app_id).await {
            Ok(AppState::Started) => return Ok(()),
            Ok(state) => debug!(%app_id, ?state, "starting application"),
            Err(e) if e.is_not_found() => {
                return Err(ProxyError::StartFailed {
                    app_id: app_id.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(%app_id, error = %e, "state query failed, starting anyway"),
        }

        self.control
            .start_app(app_id)
            .await
            .map_err(|e| ProxyError::StartFailed {
                app_id: app_id.to_string(),
                reason: e.to_string(),
            })?;

        self.wait_started(app_id).await
    }

    async fn wait_started(&self, app_id: &str) -> ProxyResult<()> {
        let deadline = Instant::now() + self.policy.timeout;
        let mut backoff = Backoff::new(&self.policy);

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ProxyError::RestartTimeout {
                    app_id: app_id.to_string(),
                    waited: self.policy.timeout,
                });
            }
            tokio::time::sleep(backoff.next_delay().min(deadline - now)).await;

            match self.control.app_state(app_id).await {
                Ok(AppState::Started) => return Ok(()),
                Ok(state) => debug!(%app_id, ?state, "waiting for application restart"),
                Err(e) => warn!(%app_id, error = %e, "state poll failed, retrying"),
            }
        }
    }
}
