//! Stepwise bulk repository cleanup.
//!
//! Tearing a repository down is driven by an external trigger calling
//! [`cleanup_page`](RepositoryCleanup::cleanup_page) repeatedly: each call
//! removes up to one page of documents (sub-records, vectors, backing
//! blob) and returns the cursor for the next call. A separate poll,
//! [`pending_deletions_complete`](RepositoryCleanup::pending_deletions_complete),
//! answers whether every collection-deletion job for the repository has
//! reached a terminal state — only then is the repository safe to tear
//! down. The wait/poll loop itself lives with the caller; this module only
//! exposes the steps.

use std::sync::Arc;

use tracing::info;

use crate::cursor::{decode_cursor, encode_cursor};
use crate::error::Result;
use crate::store::{BlobStore, DocumentStore, JobStore, VectorFilter, VectorStore};

/// Default documents removed per cleanup step.
pub const DEFAULT_CLEANUP_PAGE_SIZE: usize = 100;

/// Bulk cleanup steps for one repository store.
pub struct RepositoryCleanup {
    jobs: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    vectors: Arc<dyn VectorStore>,
    page_size: usize,
}

impl RepositoryCleanup {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            jobs,
            documents,
            blobs,
            vectors,
            page_size: DEFAULT_CLEANUP_PAGE_SIZE,
        }
    }

    /// Override the per-step page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Remove up to one page of a repository's documents.
    ///
    /// Returns the number of documents removed and the cursor to resume
    /// from; `None` means the repository has no documents left.
    pub async fn cleanup_page(
        &self,
        repository_id: &str,
        cursor: Option<&str>,
    ) -> Result<(usize, Option<String>)> {
        let key = cursor.map(decode_cursor).transpose()?;

        let page = self
            .documents
            .list_by_repository(repository_id, self.page_size, key.as_ref())
            .await?;

        let mut removed = 0usize;
        for document in &page.documents {
            let filter = VectorFilter {
                document_id: Some(document.id.clone()),
                ..Default::default()
            };
            self.vectors.delete(&document.collection_id, &filter).await?;
            self.documents.delete_document(&document.id).await?;
            self.blobs.delete(&document.source_path).await?;
            removed += 1;
        }

        info!(
            repository_id,
            removed,
            more = page.next_cursor.is_some(),
            "cleanup step finished"
        );

        Ok((removed, page.next_cursor.as_ref().map(encode_cursor)))
    }

    /// Whether every collection-deletion job for the repository has
    /// reached a terminal state.
    pub async fn pending_deletions_complete(&self, repository_id: &str) -> Result<bool> {
        let active = self.jobs.count_active_deletions(repository_id).await?;
        Ok(active == 0)
    }
}
