//! Proxy error types.

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Errors that can occur while handling a proxied request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Startup could not establish loop protection.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid forwarding target: {0}")]
    InvalidTarget(String),

    /// The request already passed through this proxy once.
    #[error("infinite loop forwarding error")]
    LoopDetected,

    #[error("self traffic for {0} rejected")]
    SelfTraffic(String),

    #[error("no route for {0}")]
    UnknownRoute(String),

    #[error("{0} is restarting, please retry in a few seconds")]
    RestartInProgress(String),

    #[error("application {app_id} not started after {waited:?}")]
    RestartTimeout { app_id: String, waited: Duration },

    #[error("failed to start application {app_id}: {reason}")]
    StartFailed { app_id: String, reason: String },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("state store error: {0}")]
    State(#[from] drowse_state::StateError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingHeader(_) | ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            ProxyError::SelfTraffic(_) => StatusCode::MISDIRECTED_REQUEST,
            ProxyError::RestartInProgress(_)
            | ProxyError::RestartTimeout { .. }
            | ProxyError::StartFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Configuration(_)
            | ProxyError::LoopDetected
            | ProxyError::State(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller should retry the same request later.
    pub fn is_retryable(&self) -> bool {
        self.status() == StatusCode::SERVICE_UNAVAILABLE
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
