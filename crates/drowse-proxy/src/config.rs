//! Proxy settings and the explicit policies for edge traffic.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};

/// Whether startup must establish a loop signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopProtectionMode {
    /// Refuse to serve without a hostname and secret.
    #[default]
    Required,
    /// Serve without loop detection, logging a warning at startup.
    Disabled,
}

/// What to do with a request addressed to the proxy's own hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfTrafficPolicy {
    /// Log it and continue with normal processing.
    #[default]
    Proceed,
    /// Answer 421 Misdirected Request.
    Reject,
}

/// What to do with a hostname that has no mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    #[default]
    NotFound,
    /// Forward as if the application were awake.
    PassThrough,
}

/// Bounds on the wait for a restarting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Delay before the first state poll.
    pub initial_poll: Duration,
    /// Ceiling for the doubling poll delay.
    pub max_poll: Duration,
    /// Total wait before the claim is released.
    pub timeout: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_poll: Duration::from_millis(500),
            max_poll: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Overrides the detected hostname.
    pub hostname: Option<String>,
    /// Shared secret mixed into the loop signature.
    pub secret: Option<String>,
    pub loop_protection: LoopProtectionMode,
    pub self_traffic: SelfTrafficPolicy,
    pub unmapped: UnmappedPolicy,
    pub restart: RestartPolicy,
    /// Lifetime of a wake claim. Must outlast the restart timeout.
    pub claim_ttl: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            secret: None,
            loop_protection: LoopProtectionMode::default(),
            self_traffic: SelfTrafficPolicy::default(),
            unmapped: UnmappedPolicy::default(),
            restart: RestartPolicy::default(),
            claim_ttl: Duration::from_secs(150),
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> ProxyResult<()> {
        let restart = &self.restart;
        if restart.initial_poll.is_zero() {
            return Err(ProxyError::Configuration(
                "restart.initial_poll must be greater than zero".into(),
            ));
        }
        if restart.max_poll < restart.initial_poll {
            return Err(ProxyError::Configuration(
                "restart.max_poll must not be below restart.initial_poll".into(),
            ));
        }
        if restart.timeout.is_zero() {
            return Err(ProxyError::Configuration(
                "restart.timeout must be greater than zero".into(),
            ));
        }
        // A live claimant must never look stale to another process.
        if self.claim_ttl <= restart.timeout {
            return Err(ProxyError::Configuration(format!(
                "claim_ttl ({:?}) must exceed restart.timeout ({:?})",
                self.claim_ttl, restart.timeout
            )));
        }
        Ok(())
    }
}
