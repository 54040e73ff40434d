//! drowse.toml configuration.
//!
//! Every field has a default, so an empty file is a valid config.
//! Durations are written as `"500ms"`, `"30s"`, `"2m"` or bare seconds.
//!
//! ```toml
//! proxy_port = 8080
//! admin_port = 8081
//! data_dir = "/var/lib/drowse"
//! log_format = "json"
//!
//! [control_plane]
//! base_url = "http://127.0.0.1:9000"
//! timeout = "10s"
//!
//! [proxy]
//! secret = "change-me"
//! self_traffic = "reject"
//!
//! [proxy.restart]
//! initial_poll = "500ms"
//! max_poll = "5s"
//! timeout = "2m"
//!
//! [watch]
//! lease_grace = "30s"
//! adopt_interval = "1m"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use drowse_proxy::{
    LoopProtectionMode, ProxyConfig, RestartPolicy, SelfTrafficPolicy, UnmappedPolicy,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub proxy_port: u16,
    pub admin_port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub control_plane: ControlPlaneConfig,
    pub proxy: ProxySection,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub hostname: Option<String>,
    pub secret: Option<String>,
    pub loop_protection: LoopProtectionMode,
    pub self_traffic: SelfTrafficPolicy,
    pub unmapped: UnmappedPolicy,
    pub claim_ttl: String,
    pub upstream_timeout: String,
    pub restart: RestartConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub initial_poll: String,
    pub max_poll: String,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub lease_grace: String,
    pub adopt_interval: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            proxy_port: 8080,
            admin_port: 8081,
            data_dir: PathBuf::from("/var/lib/drowse"),
            log_format: LogFormat::Text,
            control_plane: ControlPlaneConfig::default(),
            proxy: ProxySection::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            timeout: "10s".to_string(),
        }
    }
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            hostname: None,
            secret: None,
            loop_protection: LoopProtectionMode::default(),
            self_traffic: SelfTrafficPolicy::default(),
            unmapped: UnmappedPolicy::default(),
            claim_ttl: "150s".to_string(),
            upstream_timeout: "30s".to_string(),
            restart: RestartConfig::default(),
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_poll: "500ms".to_string(),
            max_poll: "5s".to_string(),
            timeout: "2m".to_string(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            lease_grace: "30s".to_string(),
            adopt_interval: "1m".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every duration parses and the proxy settings are coherent.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.control_plane_timeout()?;
        self.upstream_timeout()?;
        self.lease_grace()?;
        if self.adopt_interval()?.is_zero() {
            return Err(anyhow!("watch.adopt_interval must be greater than zero"));
        }
        self.proxy_config()?.validate()?;
        Ok(())
    }

    /// A copy safe to print: the loop-protection secret is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.proxy.secret.is_some() {
            copy.proxy.secret = Some("<redacted>".to_string());
        }
        copy
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("drowse.redb")
    }

    pub fn control_plane_timeout(&self) -> anyhow::Result<Duration> {
        duration("control_plane.timeout", &self.control_plane.timeout)
    }

    pub fn upstream_timeout(&self) -> anyhow::Result<Duration> {
        duration("proxy.upstream_timeout", &self.proxy.upstream_timeout)
    }

    pub fn lease_grace(&self) -> anyhow::Result<Duration> {
        duration("watch.lease_grace", &self.watch.lease_grace)
    }

    pub fn adopt_interval(&self) -> anyhow::Result<Duration> {
        duration("watch.adopt_interval", &self.watch.adopt_interval)
    }

    pub fn proxy_config(&self) -> anyhow::Result<ProxyConfig> {
        let section = &self.proxy;
        let restart = &section.restart;
        Ok(ProxyConfig {
            hostname: section.hostname.clone(),
            secret: section.secret.clone(),
            loop_protection: section.loop_protection,
            self_traffic: section.self_traffic,
            unmapped: section.unmapped,
            restart: RestartPolicy {
                initial_poll: duration("proxy.restart.initial_poll", &restart.initial_poll)?,
                max_poll: duration("proxy.restart.max_poll", &restart.max_poll)?,
                timeout: duration("proxy.restart.timeout", &restart.timeout)?,
            },
            claim_ttl: duration("proxy.claim_ttl", &section.claim_ttl)?,
        })
    }
}

fn duration(field: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).ok_or_else(|| anyhow!("invalid duration for {field}: {value:?}"))
}

/// Parse `"500ms"`, `"30s"`, `"2m"`, or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
