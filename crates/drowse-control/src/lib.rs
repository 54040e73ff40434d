//! drowse-control — the control-plane seam.
//!
//! Everything drowse knows about a platform is expressed through the
//! [`ControlPlane`] trait: query an application's state, start or stop it,
//! and fetch the timestamps of its most recent log line and platform event.
//!
//! # Implementations
//!
//! - **`http`** — [`HttpControlPlane`], a JSON-over-HTTP adapter
//! - **`memory`** — [`InMemoryControlPlane`], a scriptable implementation
//!   with call counters, used by tests and local runs

pub mod error;
pub mod http;
pub mod memory;

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{ControlError, ControlResult};
pub use http::HttpControlPlane;
pub use memory::InMemoryControlPlane;

/// Lifecycle state of an application as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Started,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// Operations drowse consumes from the platform.
///
/// Every query on an unknown application id fails with
/// [`ControlError::NotFound`], distinguishable from transport failures.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn app_state(&self, app_id: &str) -> ControlResult<AppState>;

    async fn start_app(&self, app_id: &str) -> ControlResult<()>;

    async fn stop_app(&self, app_id: &str) -> ControlResult<()>;

    /// Timestamp of the most recent log line, if the application ever logged.
    async fn recent_log_timestamp(&self, app_id: &str) -> ControlResult<Option<SystemTime>>;

    /// Timestamp of the most recent platform event, if any.
    async fn recent_event_timestamp(&self, app_id: &str) -> ControlResult<Option<SystemTime>>;
}
