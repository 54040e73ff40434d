//! Outgoing request construction and the upstream transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AsHeaderName, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri};
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::signature::LoopSignature;

/// Carries this proxy's loop signature on forwarded requests.
pub const SIGNATURE_HEADER: &str = "x-drowse-proxy-signature";

/// Original scheme of the intercepted request.
pub const PROTO_HEADER: &str = "x-forwarded-proto";

/// Connection-scoped headers the transport manages itself.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Where an intercepted request was headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub hostname: String,
    pub proto: String,
}

impl Routing {
    pub fn from_headers(headers: &HeaderMap) -> ProxyResult<Self> {
        let hostname = header_str(headers, HOST).ok_or(ProxyError::MissingHeader("host"))?;
        let proto =
            header_str(headers, PROTO_HEADER).ok_or(ProxyError::MissingHeader(PROTO_HEADER))?;

        let proto = proto.to_ascii_lowercase();
        if proto != "http" && proto != "https" {
            return Err(ProxyError::InvalidTarget(format!("unsupported protocol {proto}")));
        }

        Ok(Self {
            hostname: hostname.to_string(),
            proto,
        })
    }
}

fn header_str<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// A request ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Outgoing {
    /// Rewrite an intercepted request for its real destination.
    ///
    /// Routing headers are dropped, the loop signature (if any) is added,
    /// and the target becomes `proto://host` plus the original path and
    /// query. Method, other headers and body pass through untouched.
    pub fn from_request(
        request: Request<Bytes>,
        routing: &Routing,
        signature: Option<&LoopSignature>,
    ) -> ProxyResult<Self> {
        let (parts, body) = request.into_parts();

        let mut headers = parts.headers;
        headers.remove(HOST);
        headers.remove(PROTO_HEADER);
        if let Some(signature) = signature {
            let value = HeaderValue::from_str(signature.as_str())
                .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
            headers.insert(HeaderName::from_static(SIGNATURE_HEADER), value);
        }

        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = format!("{}://{}{}", routing.proto, routing.hostname, path)
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::InvalidTarget(e.to_string()))?;

        Ok(Self {
            method: parts.method,
            uri,
            headers,
            body,
        })
    }
}

/// Sends rewritten requests to their destination.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: Outgoing) -> ProxyResult<Response<Bytes>>;
}

/// [`Upstream`] over a pooled reqwest client.
///
/// Redirects are returned to the caller rather than followed.
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Configuration(e.to_string()))?;
        Ok(Self { client })
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: Outgoing) -> ProxyResult<Response<Bytes>> {
        let Outgoing {
            method,
            uri,
            mut headers,
            body,
        } = request;
        strip_hop_by_hop(&mut headers);

        debug!(%method, %uri, "forwarding request");
        let resp = self
            .client
            .request(method, uri.to_string())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = resp.status();
        let mut headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        strip_hop_by_hop(&mut headers);
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
