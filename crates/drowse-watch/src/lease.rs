//! Per-binding watch leases.
//!
//! A binding is watched by at most one live process. The lease lasts one
//! idle interval plus a grace period and is renewed on every tick, so a
//! lease outlives its owner by at most that long.

use std::time::{Duration, SystemTime};

use drowse_state::{LeaseOutcome, StateResult, StateStore};

use crate::clock::epoch_millis;

#[derive(Clone)]
pub struct LeaseKeeper {
    state: StateStore,
    owner: String,
    grace: Duration,
}

impl LeaseKeeper {
    pub fn new(state: StateStore, owner: &str, grace: Duration) -> Self {
        Self {
            state,
            owner: owner.to_string(),
            grace,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Acquire or renew the lease for a binding watched every `interval`.
    pub fn acquire(
        &self,
        binding_id: &str,
        interval: Duration,
        now: SystemTime,
    ) -> StateResult<LeaseOutcome> {
        self.state.acquire_watch_lease(
            binding_id,
            &self.owner,
            epoch_millis(now),
            interval + self.grace,
        )
    }

    pub fn release(&self, binding_id: &str) -> StateResult<bool> {
        self.state.release_watch_lease(binding_id, &self.owner)
    }
}
