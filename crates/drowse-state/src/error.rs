//! State store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures of the embedded store.
///
/// Callers treat every variant as fatal for the operation at hand; none
/// is retried inside the store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state store: {0}")]
    Open(String),

    /// Transaction, table, read or write failure inside redb.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to encode record: {0}")]
    Encode(String),

    /// A stored record no longer matches its type.
    #[error("failed to decode stored record: {0}")]
    Decode(String),
}
