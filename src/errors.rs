//! Error types for the pool

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool is closed")]
    Closed,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Element has been idle longer than the max idle time")]
    OutOfMaxIdleTime,

    #[error("Element is older than the max life time")]
    OutOfMaxLife,

    #[error("Element is in a bad state")]
    BadValue,

    #[error("Connection was closed by the peer")]
    PeerClosed,

    #[error("Unexpected data read from an idle connection")]
    UnexpectedRead,

    #[error("Connection is broken: {0:?}")]
    Broken(io::ErrorKind),

    #[error("Liveness of connection could not be determined: {0:?}")]
    Indeterminate(io::ErrorKind),

    #[error("Connection was closed while a read or write was still in progress")]
    ClosedInFlight,

    #[error("Failed to create element: {0}")]
    Dial(#[from] io::Error),

    #[error("A pool named {0:?} is already registered")]
    AlreadyRegistered(String),
}

impl PoolError {
    /// Whether the error means an element must be evicted rather than reused.
    ///
    /// Eviction errors never reach a `get` caller; the pool discards the
    /// element and serves another one.
    pub fn is_eviction(&self) -> bool {
        matches!(
            self,
            PoolError::OutOfMaxIdleTime
                | PoolError::OutOfMaxLife
                | PoolError::BadValue
                | PoolError::PeerClosed
                | PoolError::UnexpectedRead
                | PoolError::Broken(_)
                | PoolError::Indeterminate(_)
                | PoolError::ClosedInFlight
        )
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
