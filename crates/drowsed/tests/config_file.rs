//! Config file loading.

use std::io::Write;
use std::time::Duration;

use drowse_proxy::{LoopProtectionMode, SelfTrafficPolicy, UnmappedPolicy};
use drowsed::{DaemonConfig, LogFormat};

#[test]
fn full_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
proxy_port = 9080
data_dir = "/tmp/drowse"
log_format = "json"

[control_plane]
base_url = "http://cp.internal:9000"
timeout = "3s"

[proxy]
hostname = "drowse-1"
secret = "s3cret"
loop_protection = "disabled"
self_traffic = "reject"
unmapped = "pass_through"
claim_ttl = "3m"

[proxy.restart]
initial_poll = "250ms"
max_poll = "2s"
timeout = "90s"

[watch]
lease_grace = "15s"
adopt_interval = "45s"
"#
    )
    .unwrap();

    let config = DaemonConfig::from_file(file.path()).unwrap();
    assert_eq!(config.proxy_port, 9080);
    assert_eq!(config.admin_port, 8081);
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.db_path(), std::path::Path::new("/tmp/drowse/drowse.redb"));
    assert_eq!(config.control_plane_timeout().unwrap(), Duration::from_secs(3));
    assert_eq!(config.lease_grace().unwrap(), Duration::from_secs(15));
    assert_eq!(config.adopt_interval().unwrap(), Duration::from_secs(45));

    let proxy = config.proxy_config().unwrap();
    assert_eq!(proxy.hostname.as_deref(), Some("drowse-1"));
    assert_eq!(proxy.loop_protection, LoopProtectionMode::Disabled);
    assert_eq!(proxy.self_traffic, SelfTrafficPolicy::Reject);
    assert_eq!(proxy.unmapped, UnmappedPolicy::PassThrough);
    assert_eq!(proxy.claim_ttl, Duration::from_secs(180));
    assert_eq!(proxy.restart.initial_poll, Duration::from_millis(250));
    assert_eq!(proxy.restart.timeout, Duration::from_secs(90));
}

#[test]
fn bad_duration_is_rejected() {
    let err = DaemonConfig::from_toml("[watch]\nlease_grace = \"a while\"\n").unwrap_err();
    assert!(err.to_string().contains("watch.lease_grace"));
}

#[test]
fn claim_ttl_shorter_than_restart_timeout_is_rejected() {
    let toml = "[proxy]\nclaim_ttl = \"30s\"\n[proxy.restart]\ntimeout = \"1m\"\n";
    assert!(DaemonConfig::from_toml(toml).is_err());
}

#[test]
fn unknown_policy_value_is_rejected() {
    assert!(DaemonConfig::from_toml("[proxy]\nself_traffic = \"ignore\"\n").is_err());
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DaemonConfig::from_file(&dir.path().join("absent.toml")).is_err());
}
