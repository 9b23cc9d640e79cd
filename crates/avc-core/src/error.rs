//! Error vocabulary for cache operations and permission checks.
//!
//! Cache-management failures are never fatal to a permission check: the
//! security server always yields an answer, so a failed insert or update
//! only costs a future cache hit. The only errors that reach callers are
//! [`AvcError::PermissionDenied`] and the non-blocking audit refusal.

use thiserror::Error;

/// Errors surfaced by the access vector cache.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AvcError {
    /// The request was denied by policy and enforcement applies.
    #[error("permission denied")]
    PermissionDenied,

    /// A best-effort cache operation could not allocate.
    ///
    /// The decision itself is unaffected: the compute path always yields
    /// an answer. Under the global allocator this is not produced by the
    /// cache internals; it remains in the vocabulary for API parity.
    #[error("out of memory")]
    OutOfMemory,

    /// An update targeted an entry that no longer exists.
    ///
    /// Benign: the entry was replaced or flushed concurrently and the
    /// update is discarded. The security server remains the store of
    /// truth.
    #[error("entry not found")]
    NotFound,

    /// Audit emission refused to run in a non-blocking context.
    #[error("audit would block; retry from a blocking context")]
    TryAgainNonblocking,

    /// A reset callback reported a non-zero machine code.
    ///
    /// `ss_reset` runs every subscribed callback and wraps the first
    /// failure code here; later failures are dropped and the reset
    /// itself still completes.
    #[error("reset callback failed with code {code}")]
    Callback {
        /// The code the callback returned.
        code: i32,
    },
}

/// Result alias for fallible cache operations.
pub type AvcResult<T> = Result<T, AvcError>;
