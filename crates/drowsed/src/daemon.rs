//! Process wiring: store, control plane, watchers, proxy, admin API.

use std::net::SocketAddr;
use std::sync::Arc;

use drowse_control::{ControlPlane, HttpControlPlane};
use drowse_proxy::{AppWaker, HttpUpstream, LoopProtection, WakeProxy, proxy_router};
use drowse_state::StateStore;
use drowse_watch::{Clock, SystemClock, WatchManager};
use tokio::sync::watch;
use tracing::info;

use crate::admin::{AdminState, admin_router};
use crate::config::DaemonConfig;

/// Identity used for watch leases and wake claims.
pub fn owner_id(hostname: Option<&str>) -> String {
    format!("{}-{}", hostname.unwrap_or("drowsed"), std::process::id())
}

pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("drowse daemon starting");
    config.validate()?;

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let control: Arc<dyn ControlPlane> = Arc::new(HttpControlPlane::new(
        &config.control_plane.base_url,
        config.control_plane_timeout()?,
    )?);
    info!(base_url = %config.control_plane.base_url, "control plane client ready");

    let proxy_config = config.proxy_config()?;
    let protection = LoopProtection::from_config(&proxy_config)?;
    let owner = owner_id(protection.hostname());
    info!(%owner, loop_protection = protection.signature().is_some(), "loop protection configured");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let watches = Arc::new(WatchManager::new(
        state.clone(),
        control.clone(),
        clock.clone(),
        &owner,
        config.lease_grace()?,
    ));
    watches.initialize()?;

    let waker = AppWaker::new(
        state.clone(),
        control,
        clock,
        &owner,
        proxy_config.restart,
        proxy_config.claim_ttl,
    );
    let upstream = Arc::new(HttpUpstream::new(config.upstream_timeout()?)?);
    let proxy = Arc::new(WakeProxy::new(&proxy_config, protection, waker, upstream));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let adopt_interval = config.adopt_interval()?;
    let adopter = watches.clone();
    let adopt_shutdown = shutdown_rx.clone();
    let adopt_handle = tokio::spawn(async move {
        adopter.run_adoption(adopt_interval, adopt_shutdown).await;
    });

    // ── Start servers ──────────────────────────────────────────

    let proxy_addr = SocketAddr::from(([0, 0, 0, 0], config.proxy_port));
    let admin_addr = SocketAddr::from(([0, 0, 0, 0], config.admin_port));
    let proxy_listener = tokio::net::TcpListener::bind(proxy_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;
    info!(%proxy_addr, %admin_addr, "servers listening");

    let mut proxy_shutdown = shutdown_rx.clone();
    let proxy_server = axum::serve(proxy_listener, proxy_router(proxy))
        .with_graceful_shutdown(async move {
            let _ = proxy_shutdown.changed().await;
        });

    let mut admin_shutdown = shutdown_rx;
    let admin_server = axum::serve(
        admin_listener,
        admin_router(AdminState {
            store: state,
            watches: watches.clone(),
        }),
    )
    .with_graceful_shutdown(async move {
        let _ = admin_shutdown.changed().await;
    });

    // Graceful shutdown on Ctrl-C.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let (proxy_result, admin_result) =
        tokio::join!(async { proxy_server.await }, async { admin_server.await });
    proxy_result?;
    admin_result?;

    // Bindings stay persisted; their leases are released for the next owner.
    watches.shutdown();
    let _ = adopt_handle.await;

    info!("drowse daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_id_includes_hostname_and_pid() {
        let owner = owner_id(Some("node-7"));
        assert!(owner.starts_with("node-7-"));
        assert!(owner.ends_with(&std::process::id().to_string()));
        assert!(owner_id(None).starts_with("drowsed-"));
    }
}
