//! The wake proxy request path and its axum wiring.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use bytes::Bytes;
use tracing::{error, info, warn};

use crate::config::{ProxyConfig, SelfTrafficPolicy, UnmappedPolicy};
use crate::error::{ProxyError, ProxyResult};
use crate::forward::{Outgoing, Routing, SIGNATURE_HEADER, Upstream};
use crate::signature::LoopProtection;
use crate::waker::{AppWaker, WakeOutcome};

/// Seconds a caller is told to wait on a retryable failure.
const RETRY_AFTER_SECS: u64 = 5;

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let mut response = (status, self.to_string()).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

/// Intercepts requests for sleeping applications.
pub struct WakeProxy {
    protection: LoopProtection,
    waker: Arc<AppWaker>,
    upstream: Arc<dyn Upstream>,
    self_traffic: SelfTrafficPolicy,
    unmapped: UnmappedPolicy,
}

impl WakeProxy {
    pub fn new(
        config: &ProxyConfig,
        protection: LoopProtection,
        waker: AppWaker,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            protection,
            waker: Arc::new(waker),
            upstream,
            self_traffic: config.self_traffic,
            unmapped: config.unmapped,
        }
    }

    pub fn protection(&self) -> &LoopProtection {
        &self.protection
    }

    /// Handle one intercepted request end to end.
    pub async fn handle(&self, request: Request<Bytes>) -> ProxyResult<Response<Bytes>> {
        let routing = Routing::from_headers(request.headers())?;
        let hostname = routing.hostname.as_str();
        info!(%hostname, method = %request.method(), "incoming request");

        let seen = request
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if self.protection.is_loop(seen) {
            error!(%hostname, "request already forwarded by this proxy");
            return Err(ProxyError::LoopDetected);
        }

        if self.protection.is_self(hostname) {
            match self.self_traffic {
                SelfTrafficPolicy::Proceed => warn!(%hostname, "self traffic, proceeding"),
                SelfTrafficPolicy::Reject => {
                    warn!(%hostname, "self traffic rejected");
                    return Err(ProxyError::SelfTraffic(hostname.to_string()));
                }
            }
        }

        match self.wake_detached(hostname).await? {
            WakeOutcome::Woken { .. } => {}
            WakeOutcome::InProgress => {
                return Err(ProxyError::RestartInProgress(hostname.to_string()));
            }
            WakeOutcome::NotMapped => match self.unmapped {
                UnmappedPolicy::NotFound => {
                    return Err(ProxyError::UnknownRoute(hostname.to_string()));
                }
                UnmappedPolicy::PassThrough => {}
            },
        }

        let outgoing = Outgoing::from_request(request, &routing, self.protection.signature())?;
        info!(%hostname, uri = %outgoing.uri, "forwarding request");
        self.upstream.send(outgoing).await
    }

    /// Run the wake on its own task so a dropped request still deletes
    /// or releases the claim.
    async fn wake_detached(&self, hostname: &str) -> ProxyResult<WakeOutcome> {
        let waker = self.waker.clone();
        let hostname = hostname.to_string();
        tokio::spawn(async move { waker.wake(&hostname).await })
            .await
            .map_err(|e| ProxyError::Internal(format!("wake task failed: {e}")))?
    }
}

/// Router sending every request, whatever its path, through the proxy.
pub fn proxy_router(proxy: Arc<WakeProxy>) -> Router {
    Router::new().fallback(proxy_handler).with_state(proxy)
}

async fn proxy_handler(
    State(proxy): State<Arc<WakeProxy>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let mut request = Request::new(body);
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.headers_mut() = headers;

    match proxy.handle(request).await {
        Ok(response) => response.map(Body::from).into_response(),
        Err(e) => e.into_response(),
    }
}
