//! Error types for the DAP HTTP cache

use thiserror::Error;

/// Errors that can occur while operating the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No entry exists for a URL at which one was required.
    #[error("no cache entry for URL: {0}")]
    NotFound(String),

    /// The requested operation requires that no entries be locked.
    #[error("cache entry is in use: {0}")]
    InUse(String),

    /// A filesystem operation failed.
    #[error("cache I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A response body exceeded `max_entry_size` mid-write.
    #[error("response body exceeds max_entry_size: {0} bytes")]
    Oversize(u64),

    /// An invalid configuration value was supplied.
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// An internal invariant was violated; always a bug.
    #[error("internal cache error: {0}")]
    Internal(String),

    /// Any other error bubbled up from a helper.
    #[error("cache error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
