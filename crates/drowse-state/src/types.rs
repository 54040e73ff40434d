//! Domain types for the drowse state store.
//!
//! These types represent the persisted state of bindings, service
//! instances, proxy map entries, and watch leases. All types are
//! serializable to/from JSON for storage in redb tables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a binding.
pub type BindingId = String;

/// Control-plane identifier of a monitored application.
pub type AppId = String;

/// Unique identifier for a service instance.
pub type ServiceInstanceId = String;

// ── Binding ───────────────────────────────────────────────────────

/// A monitored relationship between a service instance and an application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    pub id: BindingId,
    pub app_id: AppId,
    pub service_instance_id: ServiceInstanceId,
    /// Unix timestamp (seconds) when the binding was created.
    pub created_at: u64,
    /// Set once the watched application was found deleted. Such a binding
    /// is never watched again until it is re-bound.
    #[serde(default)]
    pub app_gone: bool,
}

impl Binding {
    pub fn new(id: &str, app_id: &str, service_instance_id: &str, created_at: u64) -> Self {
        Self {
            id: id.to_string(),
            app_id: app_id.to_string(),
            service_instance_id: service_instance_id.to_string(),
            created_at,
            app_gone: false,
        }
    }

    /// Whether the binding carries a usable identifier.
    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

// ── Service instance ──────────────────────────────────────────────

/// Holds the idle interval shared by one or more bindings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    pub id: ServiceInstanceId,
    /// Inactivity (seconds) after which a started application is stopped.
    pub idle_interval_secs: u64,
    pub created_at: u64,
}

impl ServiceInstance {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }
}

// ── Proxy map ─────────────────────────────────────────────────────

/// Links an external hostname to a sleeping application.
///
/// `restarting` only moves from `false` to `true`; the entry is then
/// deleted once the application is confirmed started. The claim fields
/// record who holds the wake attempt and until when, so a claimant that
/// dies mid-restart can be taken over once its claim expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyMapEntry {
    pub hostname: String,
    pub app_id: AppId,
    pub restarting: bool,
    #[serde(default)]
    pub claimed_by: Option<String>,
    /// Unix timestamp (milliseconds) after which the claim is stale.
    #[serde(default)]
    pub claim_expires_at_ms: Option<u64>,
}

impl ProxyMapEntry {
    /// A fresh, unclaimed entry.
    pub fn new(hostname: &str, app_id: &str) -> Self {
        Self {
            hostname: hostname.trim().to_string(),
            app_id: app_id.to_string(),
            restarting: false,
            claimed_by: None,
            claim_expires_at_ms: None,
        }
    }

    /// Build the key for the proxy map table.
    pub fn table_key(&self) -> String {
        hostname_key(&self.hostname)
    }

    /// Whether a restart is in progress and its claim is still live at `now_ms`.
    pub fn claim_is_live(&self, now_ms: u64) -> bool {
        self.restarting && self.claim_expires_at_ms.is_none_or(|exp| now_ms < exp)
    }
}

/// Normalize a hostname into its proxy map key.
pub fn hostname_key(hostname: &str) -> String {
    hostname.trim().to_ascii_lowercase()
}

/// Result of recording a sleeping application's hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    Created,
    Replaced,
    /// The existing entry is mid-restart and was left untouched.
    Restarting,
}

/// Result of an attempt to claim a proxy map entry for a wake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now owns the wake attempt.
    Claimed(ProxyMapEntry),
    /// Another claimant holds a live claim.
    InProgress,
    /// No entry exists for the hostname.
    NotMapped,
}

// ── Watch lease ───────────────────────────────────────────────────

/// Records which process instance watches a binding, and until when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchLease {
    pub binding_id: BindingId,
    pub owner: String,
    /// Unix timestamp (milliseconds) after which the lease may be taken.
    pub expires_at_ms: u64,
}

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired(WatchLease),
    /// A different owner holds an unexpired lease.
    HeldElsewhere(WatchLease),
}

impl LeaseOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LeaseOutcome::Acquired(_))
    }
}
