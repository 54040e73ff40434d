//! Watch error types.

use drowse_control::ControlError;
use thiserror::Error;

/// Errors that can occur while watching bindings.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The application no longer exists; its watch should end.
    #[error("application not found: {0}")]
    AppNotFound(String),

    /// Transient control-plane failure; the next tick retries.
    #[error("control plane error: {0}")]
    ControlPlane(ControlError),

    #[error("service instance not found: {0}")]
    ServiceInstanceNotFound(String),

    #[error("service instance {0} has a zero idle interval")]
    InvalidInterval(String),

    #[error("binding {binding_id} is watched by {owner}")]
    OwnedElsewhere { binding_id: String, owner: String },

    #[error("state store error: {0}")]
    State(#[from] drowse_state::StateError),
}

impl From<ControlError> for WatchError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::NotFound(app_id) => WatchError::AppNotFound(app_id),
            other => WatchError::ControlPlane(other),
        }
    }
}

impl WatchError {
    /// Whether retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WatchError::ControlPlane(_))
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
