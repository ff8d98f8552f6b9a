//! Core data models used throughout Ingest Harness.
//!
//! These types represent the jobs, strategies, and chunks that flow through
//! the ingestion pipeline, plus the collection/repository records whose
//! configuration drives job creation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::ResourceContext;
use crate::error::{Error, Result};

/// Lifecycle status of an [`IngestionJob`].
///
/// Ingestion runs `Pending → InProgress → {IngestionCompleted, IngestionFailed}`;
/// deletion runs `Pending → Deleting → {DeleteCompleted, DeleteFailed}`.
/// The four `*Completed`/`*Failed` values are terminal: a job never leaves
/// them, and a re-submission for the same document creates a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    IngestionCompleted,
    IngestionFailed,
    Deleting,
    DeleteCompleted,
    DeleteFailed,
}

impl JobStatus {
    /// Whether the job can still move. Callers use this to decide whether
    /// to keep polling.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::IngestionCompleted
                | Self::IngestionFailed
                | Self::DeleteCompleted
                | Self::DeleteFailed
        )
    }

    /// Whether a terminal job finished the work it was created for.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::IngestionCompleted | Self::DeleteCompleted)
    }

    /// Stable string form used by store backends.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::IngestionCompleted => "ingestion_completed",
            Self::IngestionFailed => "ingestion_failed",
            Self::Deleting => "deleting",
            Self::DeleteCompleted => "delete_completed",
            Self::DeleteFailed => "delete_failed",
        }
    }

    /// Inverse of [`as_str`](Self::as_str). Returns `None` for anything
    /// outside the closed status set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "ingestion_completed" => Some(Self::IngestionCompleted),
            "ingestion_failed" => Some(Self::IngestionFailed),
            "deleting" => Some(Self::Deleting),
            "delete_completed" => Some(Self::DeleteCompleted),
            "delete_failed" => Some(Self::DeleteFailed),
            _ => None,
        }
    }
}

/// Policy for splitting document text into embeddable units.
///
/// Resolved once at job creation and immutable thereafter. Construct through
/// [`ChunkingStrategy::fixed`] so the `overlap < size` invariant holds for
/// every value that reaches the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkingStrategy {
    Fixed { size: usize, overlap: usize },
}

impl ChunkingStrategy {
    /// Build a fixed-window strategy, validating `size > 0` and
    /// `overlap < size`.
    pub fn fixed(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Validation("chunk size must be > 0".to_string()));
        }
        if overlap >= size {
            return Err(Error::Validation(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({size})"
            )));
        }
        Ok(Self::Fixed { size, overlap })
    }
}

/// Wire form of a caller-supplied fixed strategy: size and overlap arrive as
/// strings convertible to positive integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedStrategySpec {
    pub size: String,
    pub overlap: String,
}

impl FixedStrategySpec {
    /// Parse into a validated [`ChunkingStrategy`].
    pub fn parse(&self) -> Result<ChunkingStrategy> {
        let size = parse_positive(&self.size, "size")?;
        let overlap = self
            .overlap
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::Validation(format!("invalid chunk overlap: '{}'", self.overlap)))?;
        ChunkingStrategy::fixed(size, overlap)
    }
}

pub(crate) fn parse_positive(raw: &str, field: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Validation(format!(
            "invalid chunk {field}: '{raw}' (expected a positive integer)"
        ))),
    }
}

/// A tracked unit of work moving a document into or out of a vector index.
///
/// Owned exclusively by the job store; mutated only through status
/// transitions. Terminal jobs are retained for audit, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: String,
    pub repository_id: String,
    pub collection_id: String,
    pub document_id: String,
    pub chunk_strategy: ChunkingStrategy,
    pub embedding_model: String,
    pub source_path: String,
    pub username: String,
    pub metadata: BTreeMap<String, String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A logical named subset of a repository's vector index, with its own
/// access rules, embedding model, and chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub repository_id: String,
    pub embedding_model: String,
    /// Configured strategy, used when the request supplies none (or an
    /// invalid one).
    pub chunk_strategy: Option<ChunkingStrategy>,
    /// Whether a well-formed request strategy may override the configured one.
    pub allow_strategy_override: bool,
    pub owner_id: String,
    pub allowed_groups: BTreeSet<String>,
    pub is_private: bool,
}

impl Collection {
    /// The access-control view of this collection.
    pub fn resource_context(&self) -> ResourceContext {
        ResourceContext {
            resource_id: self.id.clone(),
            resource_type: "collection".to_string(),
            allowed_groups: self.allowed_groups.clone(),
            owner_id: self.owner_id.clone(),
            is_private: self.is_private,
        }
    }
}

/// A top-level vector-store backend configuration containing one or more
/// collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    /// Collection targeted when a request names none.
    pub default_collection_id: String,
    /// Embedding model used when neither the request nor a collection
    /// supplies one.
    pub default_embedding_model: String,
}

/// A document submission as it arrives from the front door.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    pub document_id: String,
    pub source_path: String,
    pub username: String,
    pub collection_id: Option<String>,
    pub embedding_model: Option<String>,
    /// Full strategy override; honored only if the collection allows it.
    pub strategy: Option<FixedStrategySpec>,
    /// Ad hoc size override applied to the built-in default strategy.
    pub chunk_size: Option<String>,
    /// Ad hoc overlap override applied to the built-in default strategy.
    pub chunk_overlap: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One embedding call: a sequence of texts plus the target model.
///
/// Ephemeral; exists only within the pipeline's execution and is never
/// persisted.
#[derive(Debug, Clone)]
pub struct EmbeddingBatchRequest {
    pub texts: Vec<String>,
    pub model: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::IngestionCompleted,
        JobStatus::IngestionFailed,
        JobStatus::Deleting,
        JobStatus::DeleteCompleted,
        JobStatus::DeleteFailed,
    ];

    #[test]
    fn test_terminal_statuses_exact() {
        let terminal: Vec<JobStatus> = ALL_STATUSES
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                JobStatus::IngestionCompleted,
                JobStatus::IngestionFailed,
                JobStatus::DeleteCompleted,
                JobStatus::DeleteFailed,
            ]
        );
    }

    #[test]
    fn test_success_statuses_exact() {
        let success: Vec<JobStatus> = ALL_STATUSES
            .into_iter()
            .filter(|s| s.is_success())
            .collect();
        assert_eq!(
            success,
            vec![JobStatus::IngestionCompleted, JobStatus::DeleteCompleted]
        );
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in ALL_STATUSES {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("unknown"), None);
    }

    #[test]
    fn test_strategy_rejects_overlap_ge_size() {
        assert!(ChunkingStrategy::fixed(100, 100).is_err());
        assert!(ChunkingStrategy::fixed(100, 150).is_err());
        assert!(ChunkingStrategy::fixed(0, 0).is_err());
        assert!(ChunkingStrategy::fixed(100, 99).is_ok());
    }

    #[test]
    fn test_spec_parses_string_fields() {
        let spec = FixedStrategySpec {
            size: "500".to_string(),
            overlap: "50".to_string(),
        };
        assert_eq!(
            spec.parse().unwrap(),
            ChunkingStrategy::Fixed {
                size: 500,
                overlap: 50
            }
        );
    }

    #[test]
    fn test_spec_rejects_garbage() {
        let spec = FixedStrategySpec {
            size: "lots".to_string(),
            overlap: "0".to_string(),
        };
        assert!(spec.parse().is_err());

        let spec = FixedStrategySpec {
            size: "-5".to_string(),
            overlap: "0".to_string(),
        };
        assert!(spec.parse().is_err());
    }

    #[test]
    fn test_spec_allows_zero_overlap() {
        let spec = FixedStrategySpec {
            size: "100".to_string(),
            overlap: "0".to_string(),
        };
        assert!(spec.parse().is_ok());
    }
}
