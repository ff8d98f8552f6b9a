//! In-memory store backends for testing and embedded use.
//!
//! `HashMap`s and `Vec`s behind `std::sync::RwLock`, mirroring the shape a
//! real backend would have: keyset pagination, compare-and-set status
//! updates, filter-based vector deletes. Also home to
//! [`MemoryCollectionPolicy`], the reference per-resource-type access
//! policy.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::access::{AccessPolicy, ResourceContext};
use crate::cursor::{cursor_i64, cursor_str, PageKey};
use crate::error::{Error, Result};
use crate::models::{Collection, IngestionJob, JobStatus};

use super::{
    BlobStore, DocumentPage, DocumentRecord, DocumentStore, JobPage, JobStore, VectorFilter,
    VectorMetadata, VectorStore,
};

fn job_page_key(job: &IngestionJob) -> PageKey {
    let mut key = PageKey::new();
    key.insert(
        "created_at".to_string(),
        serde_json::json!(job.created_at.timestamp_millis()),
    );
    key.insert("id".to_string(), serde_json::json!(job.id));
    key
}

/// In-memory [`JobStore`].
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, IngestionJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &IngestionJob) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<IngestionJob> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", id))
    }

    async fn find_by_document(&self, document_id: &str) -> Result<Option<IngestionJob>> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.document_id == document_id && !j.status.is_terminal())
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn find_by_path(&self, source_path: &str) -> Result<Vec<IngestionJob>> {
        let jobs = self.jobs.read().unwrap();
        let mut matches: Vec<IngestionJob> = jobs
            .values()
            .filter(|j| j.source_path == source_path)
            .cloned()
            .collect();
        matches.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(matches)
    }

    async fn update_status(
        &self,
        job: &IngestionJob,
        new_status: JobStatus,
    ) -> Result<IngestionJob> {
        let mut jobs = self.jobs.write().unwrap();
        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| Error::not_found("job", &job.id))?;
        if stored.status != job.status {
            return Err(Error::Storage(format!(
                "job {} status changed concurrently (expected {}, found {})",
                job.id,
                job.status.as_str(),
                stored.status.as_str()
            )));
        }
        stored.status = new_status;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn list_by_repository(
        &self,
        repository_id: &str,
        page_size: usize,
        cursor: Option<&PageKey>,
        max_age: Option<Duration>,
    ) -> Result<JobPage> {
        let after = match cursor {
            Some(key) => Some((cursor_i64(key, "created_at")?, cursor_str(key, "id")?)),
            None => None,
        };
        let cutoff = max_age.map(|age| Utc::now() - age);

        let jobs = self.jobs.read().unwrap();
        let mut matches: Vec<IngestionJob> = jobs
            .values()
            .filter(|j| j.repository_id == repository_id)
            .filter(|j| cutoff.is_none_or(|c| j.created_at >= c))
            .filter(|j| match &after {
                Some((ts, id)) => {
                    let key = (j.created_at.timestamp_millis(), j.id.as_str());
                    key > (*ts, id.as_str())
                }
                None => true,
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            (a.created_at.timestamp_millis(), &a.id).cmp(&(b.created_at.timestamp_millis(), &b.id))
        });

        let next_cursor = if matches.len() > page_size {
            matches.truncate(page_size);
            matches.last().map(job_page_key)
        } else {
            None
        };

        Ok(JobPage {
            jobs: matches,
            next_cursor,
        })
    }

    async fn count_active_deletions(&self, repository_id: &str) -> Result<usize> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.repository_id == repository_id && j.status == JobStatus::Deleting)
            .count())
    }
}

/// In-memory [`DocumentStore`].
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<String, DocumentRecord>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed a document record.
    pub fn insert(&self, record: DocumentRecord) {
        let mut documents = self.documents.write().unwrap();
        documents.insert(record.id.clone(), record);
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_by_repository(
        &self,
        repository_id: &str,
        page_size: usize,
        cursor: Option<&PageKey>,
    ) -> Result<DocumentPage> {
        let after = match cursor {
            Some(key) => Some(cursor_str(key, "id")?),
            None => None,
        };

        let documents = self.documents.read().unwrap();
        let mut matches: Vec<DocumentRecord> = documents
            .values()
            .filter(|d| d.repository_id == repository_id)
            .filter(|d| after.as_ref().is_none_or(|id| d.id > *id))
            .cloned()
            .collect();

        let next_cursor = if matches.len() > page_size {
            matches.truncate(page_size);
            matches.last().map(|d| {
                let mut key = PageKey::new();
                key.insert("id".to_string(), serde_json::json!(d.id));
                key
            })
        } else {
            None
        };

        Ok(DocumentPage {
            documents: matches,
            next_cursor,
        })
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let mut documents = self.documents.write().unwrap();
        documents.remove(document_id);
        Ok(())
    }
}

/// In-memory [`BlobStore`].
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a source object.
    pub fn put(&self, path: &str, body: &str) {
        let mut objects = self.objects.write().unwrap();
        objects.insert(path.to_string(), body.to_string());
    }

    /// Whether an object exists at the path.
    pub fn contains(&self, path: &str) -> bool {
        self.objects.read().unwrap().contains_key(path)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, path: &str) -> Result<String> {
        let objects = self.objects.read().unwrap();
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found("source object", path))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        let body = objects
            .get(from)
            .cloned()
            .ok_or_else(|| Error::not_found("source object", from))?;
        objects.insert(to.to_string(), body);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        objects.remove(path);
        Ok(())
    }
}

struct StoredVector {
    metadata: VectorMetadata,
    vector: Vec<f32>,
}

/// In-memory [`VectorStore`]. Insertion order is preserved per collection,
/// which is what order-invariant tests lean on.
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<StoredVector>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Metadata of every vector in a collection, in insertion order.
    pub fn metadatas(&self, collection: &str) -> Vec<VectorMetadata> {
        let collections = self.collections.read().unwrap();
        collections
            .get(collection)
            .map(|stored| stored.iter().map(|s| s.metadata.clone()).collect())
            .unwrap_or_default()
    }

    /// Every vector in a collection, in insertion order.
    pub fn vectors(&self, collection: &str) -> Vec<Vec<f32>> {
        let collections = self.collections.read().unwrap();
        collections
            .get(collection)
            .map(|stored| stored.iter().map(|s| s.vector.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of vectors in a collection.
    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap();
        collections.get(collection).map_or(0, Vec::len)
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(
        &self,
        collection: &str,
        vectors: &[Vec<f32>],
        metadatas: &[VectorMetadata],
    ) -> Result<()> {
        if vectors.len() != metadatas.len() {
            return Err(Error::Storage(format!(
                "vector/metadata count mismatch: {} vs {}",
                vectors.len(),
                metadatas.len()
            )));
        }
        let mut collections = self.collections.write().unwrap();
        let stored = collections.entry(collection.to_string()).or_default();
        for (vector, metadata) in vectors.iter().zip(metadatas.iter()) {
            stored.push(StoredVector {
                metadata: metadata.clone(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &VectorFilter) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        if let Some(stored) = collections.get_mut(collection) {
            stored.retain(|s| !filter.matches(&s.metadata));
        }
        Ok(())
    }
}

/// Access policy for collections backed by an in-memory registry.
///
/// The reference implementation of the one-policy-per-resource-type
/// pattern: it owns the lookup, the engine owns the decision.
pub struct MemoryCollectionPolicy {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryCollectionPolicy {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a collection.
    pub fn insert(&self, collection: Collection) {
        let mut collections = self.collections.write().unwrap();
        collections.insert(collection.id.clone(), collection);
    }
}

impl Default for MemoryCollectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessPolicy for MemoryCollectionPolicy {
    fn resource_type(&self) -> &str {
        "collection"
    }

    async fn resource_context(&self, resource_id: &str) -> Result<Option<ResourceContext>> {
        let collections = self.collections.read().unwrap();
        Ok(collections.get(resource_id).map(|c| c.resource_context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkingStrategy;

    fn job(id: &str, repo: &str, doc: &str, status: JobStatus) -> IngestionJob {
        IngestionJob {
            id: id.to_string(),
            repository_id: repo.to_string(),
            collection_id: "kb-main".to_string(),
            document_id: doc.to_string(),
            chunk_strategy: ChunkingStrategy::Fixed {
                size: 1000,
                overlap: 200,
            },
            embedding_model: "text-embedding-3-small".to_string(),
            source_path: format!("docs/{doc}.md"),
            username: "bob".to_string(),
            metadata: BTreeMap::new(),
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = MemoryJobStore::new();
        let j = job("j1", "r1", "d1", JobStatus::Pending);
        store.save(&j).await.unwrap();
        let found = store.find_by_id("j1").await.unwrap();
        assert_eq!(found.document_id, "d1");
        assert!(matches!(
            store.find_by_id("missing").await.unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_find_by_document_skips_terminal_jobs() {
        let store = MemoryJobStore::new();
        store
            .save(&job("j1", "r1", "d1", JobStatus::IngestionCompleted))
            .await
            .unwrap();
        assert!(store.find_by_document("d1").await.unwrap().is_none());

        store
            .save(&job("j2", "r1", "d1", JobStatus::InProgress))
            .await
            .unwrap();
        let active = store.find_by_document("d1").await.unwrap().unwrap();
        assert_eq!(active.id, "j2");
    }

    #[tokio::test]
    async fn test_update_status_compare_and_set() {
        let store = MemoryJobStore::new();
        let j = job("j1", "r1", "d1", JobStatus::Pending);
        store.save(&j).await.unwrap();

        let updated = store
            .update_status(&j, JobStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::InProgress);

        // A second writer still holding the Pending view loses the race.
        let err = store.update_status(&j, JobStatus::Deleting).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        // The stored record kept the winner's status.
        let stored = store.find_by_id("j1").await.unwrap();
        assert_eq!(stored.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_list_by_repository_pages_in_order() {
        let store = MemoryJobStore::new();
        for i in 0..5i64 {
            let mut j = job(&format!("j{i}"), "r1", &format!("d{i}"), JobStatus::Pending);
            j.created_at = Utc::now() + Duration::milliseconds(i);
            store.save(&j).await.unwrap();
        }
        store
            .save(&job("other", "r2", "dx", JobStatus::Pending))
            .await
            .unwrap();

        let first = store
            .list_by_repository("r1", 2, None, None)
            .await
            .unwrap();
        assert_eq!(first.jobs.len(), 2);
        let cursor = first.next_cursor.unwrap();

        let second = store
            .list_by_repository("r1", 2, Some(&cursor), None)
            .await
            .unwrap();
        assert_eq!(second.jobs.len(), 2);

        let third = store
            .list_by_repository("r1", 2, second.next_cursor.as_ref(), None)
            .await
            .unwrap();
        assert_eq!(third.jobs.len(), 1);
        assert!(third.next_cursor.is_none());

        let mut seen: Vec<String> = Vec::new();
        for page in [first.jobs, second.jobs, third.jobs] {
            seen.extend(page.into_iter().map(|j| j.id));
        }
        assert_eq!(seen, vec!["j0", "j1", "j2", "j3", "j4"]);
    }

    #[tokio::test]
    async fn test_count_active_deletions() {
        let store = MemoryJobStore::new();
        store
            .save(&job("j1", "r1", "d1", JobStatus::Deleting))
            .await
            .unwrap();
        store
            .save(&job("j2", "r1", "d2", JobStatus::DeleteCompleted))
            .await
            .unwrap();
        store
            .save(&job("j3", "r2", "d3", JobStatus::Deleting))
            .await
            .unwrap();
        assert_eq!(store.count_active_deletions("r1").await.unwrap(), 1);
        assert_eq!(store.count_active_deletions("r2").await.unwrap(), 1);
        assert_eq!(store.count_active_deletions("r3").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vector_store_delete_by_filter() {
        let store = MemoryVectorStore::new();
        let meta = |doc: &str, index: i64| VectorMetadata {
            repository_id: "r1".to_string(),
            document_id: doc.to_string(),
            chunk_id: format!("{doc}-{index}"),
            chunk_index: index,
            source_path: format!("docs/{doc}.md"),
            extra: BTreeMap::new(),
        };
        store
            .add(
                "kb-main",
                &[vec![0.1], vec![0.2], vec![0.3]],
                &[meta("d1", 0), meta("d1", 1), meta("d2", 0)],
            )
            .await
            .unwrap();

        let filter = VectorFilter {
            document_id: Some("d1".to_string()),
            ..Default::default()
        };
        store.delete("kb-main", &filter).await.unwrap();

        let remaining = store.metadatas("kb-main");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].document_id, "d2");
    }

    #[tokio::test]
    async fn test_blob_store_fetch_copy_delete() {
        let store = MemoryBlobStore::new();
        store.put("docs/a.md", "hello");
        assert_eq!(store.fetch("docs/a.md").await.unwrap(), "hello");

        store.copy("docs/a.md", "archive/a.md").await.unwrap();
        assert!(store.contains("archive/a.md"));

        store.delete("docs/a.md").await.unwrap();
        assert!(!store.contains("docs/a.md"));
        assert!(store.fetch("docs/a.md").await.is_err());

        // Deleting a missing object stays quiet.
        store.delete("docs/a.md").await.unwrap();
    }
}
