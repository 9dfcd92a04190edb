//! Error types for cache, writer, and collaborator operations.
//!
//! - **Caller errors** fail fast, before any network I/O: `InvalidArgument`,
//!   `InvalidState`, `Disabled`.
//! - **Expected results**: `NotFound` is a read miss, not a fault.
//! - **Resource errors** surface to whoever owns the resource:
//!   `BootstrapFailure` through the readiness signal, `DeliveryFailure` to
//!   the single write that failed.
//! - **Internal**: a broken correlation invariant. Never swallowed.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors reported by the log/broker collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("topic '{0}' does not exist")]
    TopicNotFound(String),

    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("broker request timed out after {0:?}")]
    Timeout(Duration),

    #[error("message of {size} bytes exceeds the {limit} bytes limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("broker connection closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid json: {0}")]
    Json(String),

    #[error("compression failure: {0}")]
    Compression(String),

    #[error("{encoding} cannot encode {found}")]
    Unsupported { encoding: &'static str, found: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// A delivery report arrived for a token nobody is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("missing producer callback for correlation token {token} at offset {offset:?}")]
    MissingCallback { token: u64, offset: Option<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("key not found")]
    NotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("writes are disabled, the cache was created read-only")]
    Disabled,

    #[error("bootstrap of topic '{topic}' failed: {source}")]
    BootstrapFailure {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("delivery failed: {0}")]
    DeliveryFailure(#[source] BrokerError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal consistency violation: {0}")]
    Internal(String),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }
}

impl From<CorrelationError> for CacheError {
    fn from(error: CorrelationError) -> Self {
        CacheError::Internal(error.to_string())
    }
}
