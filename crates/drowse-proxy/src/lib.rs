//! drowse-proxy — wakes sleeping applications on first request.
//!
//! Requests arrive with the target hostname in `host` and the original
//! scheme in `x-forwarded-proto`. A hostname mapped to a sleeping
//! application is claimed, the application restarted and awaited, the
//! mapping deleted, and the request forwarded unchanged.
//!
//! # Components
//!
//! - **`signature`** — per-process loop signature and its enforcement mode
//! - **`waker`** — single-flight claim, start, bounded wait with backoff
//! - **`forward`** — outgoing request rewrite and the [`Upstream`] seam
//! - **`handler`** — [`WakeProxy`] and its axum router
//!
//! # Responses
//!
//! | Status | When |
//! |---|---|
//! | 400 | `host` or `x-forwarded-proto` missing |
//! | 404 | hostname not mapped (default policy) |
//! | 421 | self traffic under the `reject` policy |
//! | 500 | loop detected |
//! | 502 | upstream unreachable |
//! | 503 | restart already in progress, timed out, or failed to start |

pub mod config;
pub mod error;
pub mod forward;
pub mod handler;
pub mod signature;
pub mod waker;

pub use config::{LoopProtectionMode, ProxyConfig, RestartPolicy, SelfTrafficPolicy, UnmappedPolicy};
pub use error::{ProxyError, ProxyResult};
pub use forward::{HttpUpstream, Outgoing, Routing, Upstream};
pub use handler::{WakeProxy, proxy_router};
pub use signature::{LoopProtection, LoopSignature};
pub use waker::{AppWaker, WakeOutcome};
