//! Loop signature — marks traffic this proxy has already forwarded.
//!
//! The signature is a SHA-256 digest of the proxy's hostname and a shared
//! secret, computed once at startup. Every forwarded request carries it;
//! an inbound request carrying it has looped back.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::{LoopProtectionMode, ProxyConfig};
use crate::error::{ProxyError, ProxyResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSignature(String);

impl LoopSignature {
    pub fn compute(hostname: &str, secret: &str) -> Self {
        let digest = Sha256::digest(format!("{hostname}:{secret}").as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Immutable loop-protection state handed to the proxy at startup.
#[derive(Debug, Clone)]
pub enum LoopProtection {
    Enforced {
        hostname: String,
        signature: LoopSignature,
    },
    /// Explicitly disabled. The hostname is still used for self-traffic
    /// detection when known.
    Disabled { hostname: Option<String> },
}

impl LoopProtection {
    /// Build from config, falling back to the machine hostname.
    ///
    /// Fails when protection is required and either the hostname or the
    /// secret is unavailable.
    pub fn from_config(config: &ProxyConfig) -> ProxyResult<Self> {
        let hostname = config
            .hostname
            .clone()
            .or_else(detect_hostname)
            .filter(|h| !h.trim().is_empty());
        let secret = config.secret.as_deref().filter(|s| !s.is_empty());

        match config.loop_protection {
            LoopProtectionMode::Required => {
                let hostname = hostname.ok_or_else(|| {
                    ProxyError::Configuration("cannot determine proxy hostname".into())
                })?;
                let secret = secret.ok_or_else(|| {
                    ProxyError::Configuration("proxy.secret is required for loop protection".into())
                })?;
                Ok(Self::enforced(&hostname, secret))
            }
            LoopProtectionMode::Disabled => {
                warn!(
                    hostname = hostname.as_deref().unwrap_or("<unknown>"),
                    "loop protection disabled, forwarded traffic will not be checked for loops"
                );
                Ok(LoopProtection::Disabled { hostname })
            }
        }
    }

    pub fn enforced(hostname: &str, secret: &str) -> Self {
        LoopProtection::Enforced {
            hostname: hostname.to_string(),
            signature: LoopSignature::compute(hostname, secret),
        }
    }

    pub fn hostname(&self) -> Option<&str> {
        match self {
            LoopProtection::Enforced { hostname, .. } => Some(hostname),
            LoopProtection::Disabled { hostname } => hostname.as_deref(),
        }
    }

    pub fn signature(&self) -> Option<&LoopSignature> {
        match self {
            LoopProtection::Enforced { signature, .. } => Some(signature),
            LoopProtection::Disabled { .. } => None,
        }
    }

    /// Whether an inbound signature header proves the request looped.
    pub fn is_loop(&self, header: Option<&str>) -> bool {
        match (self.signature(), header) {
            (Some(own), Some(seen)) => own.as_str() == seen.trim(),
            _ => false,
        }
    }

    /// Whether `target` names this proxy.
    pub fn is_self(&self, target: &str) -> bool {
        self.hostname()
            .is_some_and(|own| own.eq_ignore_ascii_case(target.trim()))
    }
}

fn detect_hostname() -> Option<String> {
    gethostname::gethostname().into_string().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_keyed() {
        let a = LoopSignature::compute("proxy-1", "s3cret");
        assert_eq!(a, LoopSignature::compute("proxy-1", "s3cret"));
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, LoopSignature::compute("proxy-1", "other"));
        assert_ne!(a, LoopSignature::compute("proxy-2", "s3cret"));
    }

    #[test]
    fn own_signature_is_a_loop() {
        let protection = LoopProtection::enforced("proxy-1", "s3cret");
        let own = LoopSignature::compute("proxy-1", "s3cret");

        assert!(protection.is_loop(Some(own.as_str())));
        assert!(!protection.is_loop(Some("someone-else")));
        assert!(!protection.is_loop(None));
    }

    #[test]
    fn disabled_never_detects_loops() {
        let protection = LoopProtection::Disabled {
            hostname: Some("proxy-1".into()),
        };
        let own = LoopSignature::compute("proxy-1", "s3cret");
        assert!(!protection.is_loop(Some(own.as_str())));
        assert!(protection.is_self("PROXY-1"));
    }

    #[test]
    fn required_without_secret_fails_closed() {
        let config = ProxyConfig {
            hostname: Some("proxy-1".into()),
            secret: None,
            ..Default::default()
        };
        assert!(matches!(
            LoopProtection::from_config(&config),
            Err(ProxyError::Configuration(_))
        ));
    }

    #[test]
    fn required_with_hostname_and_secret() {
        let config = ProxyConfig {
            hostname: Some("proxy-1".into()),
            secret: Some("s3cret".into()),
            ..Default::default()
        };
        let protection = LoopProtection::from_config(&config).unwrap();
        assert_eq!(protection.hostname(), Some("proxy-1"));
        assert_eq!(
            protection.signature(),
            Some(&LoopSignature::compute("proxy-1", "s3cret"))
        );
    }

    #[test]
    fn explicitly_disabled_serves_without_signature() {
        let config = ProxyConfig {
            hostname: Some("proxy-1".into()),
            loop_protection: LoopProtectionMode::Disabled,
            ..Default::default()
        };
        let protection = LoopProtection::from_config(&config).unwrap();
        assert!(protection.signature().is_none());
    }
}
