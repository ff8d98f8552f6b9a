//! Error taxonomy for the ingestion core.
//!
//! Two layers:
//! - [`EmbedError`] is the contract error of a single embedding call. It
//!   distinguishes "payload too large" (drives the pipeline's split-and-retry
//!   path) from "transient" (drives bounded same-size retry).
//! - [`Error`] is everything a caller can observe: validation failures,
//!   missing records, access refusals, storage faults, and the two terminal
//!   pipeline outcomes. Only terminal variants move a job to a `*Failed`
//!   state; a cancelled run leaves the job where it was.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by stores, the access engine, and the ingestion service.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A record that should exist does not.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// The access-control engine refused the operation.
    #[error("{0}")]
    PermissionDenied(String),

    /// The backing store rejected or lost an operation. Also covers a
    /// compare-and-set status update that lost a race.
    #[error("storage error: {0}")]
    Storage(String),

    /// A single chunk exceeds the embedding payload limit. A batch of one
    /// cannot be split further, so this is terminal for the job.
    #[error("chunk {index} exceeds the embedding payload limit and cannot be split")]
    ChunkTooLarge { index: i64 },

    /// Transient embedding failures persisted past the retry budget.
    #[error("embedding retries exhausted: {0}")]
    RetriesExhausted(String),

    /// Cooperative cancellation was observed between batches.
    #[error("ingestion cancelled")]
    Cancelled,
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// Failure modes of a single embedding call.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The endpoint rejected the request payload as too large.
    #[error("embedding payload rejected as too large")]
    Oversize,

    /// A network or backend hiccup; the same request may succeed if retried.
    #[error("transient embedding failure: {0}")]
    Transient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("job", "abc-123");
        assert_eq!(err.to_string(), "job not found: abc-123");
    }

    #[test]
    fn test_chunk_too_large_names_index() {
        let err = Error::ChunkTooLarge { index: 7 };
        assert!(err.to_string().contains("chunk 7"));
    }
}
