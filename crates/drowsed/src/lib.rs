//! drowsed — puts idle applications to sleep and wakes them on traffic.
//!
//! One process hosts:
//! - State store (redb)
//! - Watch manager with one idle watcher per binding
//! - Wake proxy on `proxy_port`
//! - Internal admin API on `admin_port`

pub mod admin;
pub mod config;
pub mod daemon;

pub use config::{DaemonConfig, LogFormat};
