//! drowse-state — embedded state store for drowse.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for bindings, service instances, proxy map entries, and watch
//! leases.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! redb serializes write transactions, so every read-modify-write done
//! inside one write transaction (proxy claims, lease acquisition) is an
//! atomic compare-and-set against the stored record.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
