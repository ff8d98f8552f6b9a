//! Storage contracts for Ingest Harness.
//!
//! Four narrow seams, each pluggable and `Send + Sync`:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`JobStore`] | Durable ingestion-job records with conditional status updates |
//! | [`DocumentStore`] | Document records and their sub-records, paged listing |
//! | [`BlobStore`] | Source objects addressed by opaque path |
//! | [`VectorStore`] | Embedding vectors per collection, delete-by-filter |
//!
//! All mutable state lives behind these contracts; the engine itself is
//! stateless. Status transitions are compare-and-set: `update_status`
//! compares against the status the caller observed, so racing writers
//! cannot both win silently.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::cursor::PageKey;
use crate::error::Result;
use crate::models::{IngestionJob, JobStatus};

/// One page of jobs plus the resume point for the next page.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<IngestionJob>,
    pub next_cursor: Option<PageKey>,
}

/// One page of documents plus the resume point for the next page.
#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub documents: Vec<DocumentRecord>,
    pub next_cursor: Option<PageKey>,
}

/// A stored document as the cleanup machinery sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub repository_id: String,
    pub collection_id: String,
    pub source_path: String,
}

/// Per-vector payload written alongside each embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub repository_id: String,
    pub document_id: String,
    pub chunk_id: String,
    pub chunk_index: i64,
    pub source_path: String,
    /// Caller-supplied metadata carried through from the ingestion request.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Predicate for [`VectorStore::delete`]. Fields are AND-ed; `None` means
/// "any value".
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub repository_id: Option<String>,
    pub document_id: Option<String>,
    pub source_path: Option<String>,
}

impl VectorFilter {
    /// Whether a stored vector's metadata matches this filter.
    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        self.repository_id
            .as_ref()
            .is_none_or(|v| *v == metadata.repository_id)
            && self
                .document_id
                .as_ref()
                .is_none_or(|v| *v == metadata.document_id)
            && self
                .source_path
                .as_ref()
                .is_none_or(|v| *v == metadata.source_path)
    }
}

/// Durable store for [`IngestionJob`] records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job record.
    async fn save(&self, job: &IngestionJob) -> Result<()>;

    /// Fetch a job by id, failing with `NotFound` if absent.
    async fn find_by_id(&self, id: &str) -> Result<IngestionJob>;

    /// The single non-terminal job for a document, if one exists.
    ///
    /// At most one active job per document is an invariant enforced at job
    /// creation through this lookup.
    async fn find_by_document(&self, document_id: &str) -> Result<Option<IngestionJob>>;

    /// Every job ever created for a source location, oldest first.
    /// An audit trail: duplicates across time are expected.
    async fn find_by_path(&self, source_path: &str) -> Result<Vec<IngestionJob>>;

    /// Conditionally move a job to `new_status`.
    ///
    /// Compares against `job.status` (the status the caller observed) and
    /// updates atomically. A lost race fails with `Storage`; a vanished
    /// record fails with `NotFound`. Returns the updated job.
    async fn update_status(&self, job: &IngestionJob, new_status: JobStatus)
        -> Result<IngestionJob>;

    /// Page through a repository's jobs, oldest first. `max_age` restricts
    /// the listing to jobs created within the window.
    async fn list_by_repository(
        &self,
        repository_id: &str,
        page_size: usize,
        cursor: Option<&PageKey>,
        max_age: Option<Duration>,
    ) -> Result<JobPage>;

    /// Number of jobs for the repository still in the `Deleting` state.
    /// Zero means the repository is safe to tear down.
    async fn count_active_deletions(&self, repository_id: &str) -> Result<usize>;
}

/// Store of document records targeted by bulk cleanup.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Page through a repository's documents in a stable order.
    async fn list_by_repository(
        &self,
        repository_id: &str,
        page_size: usize,
        cursor: Option<&PageKey>,
    ) -> Result<DocumentPage>;

    /// Remove a document and its sub-records. Idempotent.
    async fn delete_document(&self, document_id: &str) -> Result<()>;
}

/// Source objects addressed by opaque path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a source object's text.
    async fn fetch(&self, path: &str) -> Result<String>;

    /// Copy a source object to a new path.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Delete a source object. Idempotent.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Vector index keyed by collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append vectors with their metadata to a collection. `vectors` and
    /// `metadatas` are parallel slices.
    async fn add(
        &self,
        collection: &str,
        vectors: &[Vec<f32>],
        metadatas: &[VectorMetadata],
    ) -> Result<()>;

    /// Remove every vector in the collection whose metadata matches the
    /// filter.
    async fn delete(&self, collection: &str, filter: &VectorFilter) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(repo: &str, doc: &str, path: &str) -> VectorMetadata {
        VectorMetadata {
            repository_id: repo.to_string(),
            document_id: doc.to_string(),
            chunk_id: "c1".to_string(),
            chunk_index: 0,
            source_path: path.to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = VectorFilter::default();
        assert!(filter.matches(&metadata("r1", "d1", "docs/a.md")));
    }

    #[test]
    fn test_filter_fields_are_anded() {
        let filter = VectorFilter {
            repository_id: Some("r1".to_string()),
            document_id: Some("d1".to_string()),
            source_path: None,
        };
        assert!(filter.matches(&metadata("r1", "d1", "docs/a.md")));
        assert!(!filter.matches(&metadata("r1", "d2", "docs/a.md")));
        assert!(!filter.matches(&metadata("r2", "d1", "docs/a.md")));
    }
}
