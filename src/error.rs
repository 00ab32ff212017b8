//! Error kinds surfaced by the response cache core.

use std::fmt;

/// Errors produced by the cache subsystem.
///
/// `NotFound` and `Uncacheable` are not failures in the usual sense — they
/// are control-flow sentinels the driver uses to tell a cache hit from a
/// miss, and to tell a miss from a response that was served but not stored.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// No entry exists at this key yet; the caller should fall through to
    /// the miss path.
    #[error("cache entry not found")]
    NotFound,

    /// The upstream response was served to the client but failed the
    /// cacheability predicate, so nothing was published.
    #[error("response is not cacheable")]
    Uncacheable,

    /// Any filesystem error during read, write, rename, or remove.
    ///
    /// Stored as an owned string rather than the original `std::io::Error`
    /// so the value can be captured once at a state transition and handed
    /// out to every waiter on a different thread (`std::io::Error` is not
    /// `Clone`).
    #[error("cache io error: {0}")]
    Io(String),

    /// `Content-Length` declared `expected` bytes but the populator only
    /// observed `got` before the upstream connection ended.
    #[error("truncated body: expected {expected} bytes, got {got}")]
    Truncated { expected: u64, got: u64 },

    /// The persisted header at the front of a cache file didn't decode;
    /// the file is corrupt or from an incompatible format version and
    /// should be treated as absent.
    #[error("header decode failed: {0}")]
    HeaderDecode(String),
}

impl CacheError {
    /// Build an [`CacheError::Io`] from any displayable error, capturing its
    /// text immediately (see the doc comment on the `Io` variant).
    pub fn io(err: impl fmt::Display) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::io(err)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
