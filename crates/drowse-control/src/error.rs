//! Control-plane error types.

use thiserror::Error;

pub type ControlResult<T> = Result<T, ControlError>;

/// Errors returned by a [`ControlPlane`](crate::ControlPlane).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The application does not exist (any more).
    #[error("application not found: {0}")]
    NotFound(String),

    /// The control plane could not be reached.
    #[error("control plane transport error: {0}")]
    Transport(String),

    /// The control plane answered with an unexpected status.
    #[error("control plane returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl ControlError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlError::NotFound(_))
    }
}
