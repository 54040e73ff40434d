//! JSON-over-HTTP control-plane adapter.
//!
//! Contract (relative to the configured base URL):
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/apps/{id}` | `{"state": "STARTED" \| "STOPPED" \| ...}` |
//! | POST | `/apps/{id}/start` | — |
//! | POST | `/apps/{id}/stop` | — |
//! | GET | `/apps/{id}/logs/latest` | `{"timestamp_ms": 1700000000000}`, `null` when absent |
//! | GET | `/apps/{id}/events/latest` | same as logs |
//!
//! `{id}` is percent-encoded as a single path segment. A 404 on any route
//! means the application is unknown.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{AppState, ControlError, ControlPlane, ControlResult};

/// Everything but RFC 3986 unreserved characters is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Deserialize)]
struct StateBody {
    state: AppState,
}

#[derive(Deserialize)]
struct TimestampBody {
    timestamp_ms: Option<u64>,
}

/// Control-plane client speaking the JSON contract above.
#[derive(Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, timeout: Duration) -> ControlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("drowse/0.1")
            .build()
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn app_url(&self, app_id: &str, suffix: &str) -> String {
        let id = utf8_percent_encode(app_id, PATH_SEGMENT);
        format!("{}/apps/{id}{suffix}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, app_id: &str, suffix: &str) -> ControlResult<T> {
        let url = self.app_url(app_id, suffix);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        let resp = check_status(app_id, resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ControlError::Transport(format!("invalid body from {url}: {e}")))
    }

    async fn post(&self, app_id: &str, suffix: &str) -> ControlResult<()> {
        let url = self.app_url(app_id, suffix);
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        check_status(app_id, resp).await?;
        debug!(%url, "control plane action accepted");
        Ok(())
    }
}

async fn check_status(app_id: &str, resp: reqwest::Response) -> ControlResult<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ControlError::NotFound(app_id.to_string()));
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(ControlError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp)
}

fn from_epoch_millis(ms: Option<u64>) -> Option<SystemTime> {
    ms.map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn app_state(&self, app_id: &str) -> ControlResult<AppState> {
        let body: StateBody = self.get_json(app_id, "").await?;
        Ok(body.state)
    }

    async fn start_app(&self, app_id: &str) -> ControlResult<()> {
        self.post(app_id, "/start").await
    }

    async fn stop_app(&self, app_id: &str) -> ControlResult<()> {
        self.post(app_id, "/stop").await
    }

    async fn recent_log_timestamp(&self, app_id: &str) -> ControlResult<Option<SystemTime>> {
        let body: TimestampBody = self.get_json(app_id, "/logs/latest").await?;
        Ok(from_epoch_millis(body.timestamp_ms))
    }

    async fn recent_event_timestamp(&self, app_id: &str) -> ControlResult<Option<SystemTime>> {
        let body: TimestampBody = self.get_json(app_id, "/events/latest").await?;
        Ok(from_epoch_millis(body.timestamp_ms))
    }
}
