//! Ingestion service: job creation, execution, and listing.
//!
//! [`IngestionService`] owns the job lifecycle described in the crate docs:
//! a submission creates a `Pending` job; the execution substrate later
//! calls [`ingest`](IngestionService::ingest) or
//! [`delete`](IngestionService::delete), which move the job through its
//! active state and into a terminal one. Access control is the caller's
//! concern — the front door validates permissions through an
//! [`AccessPolicy`](crate::access::AccessPolicy) before any method here
//! runs.
//!
//! All collaborators are injected; the service holds no mutable state of
//! its own and is cheap to share.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::PipelineConfig;
use crate::cursor::{decode_cursor, encode_cursor};
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::{Collection, IngestRequest, IngestionJob, JobStatus, Repository};
use crate::pipeline::BatchPipeline;
use crate::store::{BlobStore, DocumentStore, JobStore, VectorFilter, VectorStore};
use crate::strategy::resolve_strategy;

/// Hand-off seam to the external async execution substrate.
///
/// The service records the job and calls one of these; what actually
/// schedules the work (queue, worker pool, cron) lives outside the core.
#[async_trait]
pub trait JobTrigger: Send + Sync {
    /// Enqueue an ingestion run for a pending job.
    async fn submit_create(&self, job: &IngestionJob) -> Result<()>;

    /// Enqueue a deletion run for a pending job.
    async fn submit_delete(&self, job: &IngestionJob) -> Result<()>;
}

/// The ingestion core's entry points.
pub struct IngestionService {
    jobs: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    vectors: Arc<dyn VectorStore>,
    trigger: Arc<dyn JobTrigger>,
    pipeline: BatchPipeline,
}

impl IngestionService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        trigger: Arc<dyn JobTrigger>,
        config: PipelineConfig,
    ) -> Self {
        let pipeline = BatchPipeline::new(embedder, Arc::clone(&vectors), config);
        Self {
            jobs,
            documents,
            blobs,
            vectors,
            trigger,
            pipeline,
        }
    }

    /// Create a `Pending` ingestion job for a submitted document.
    ///
    /// Resolves the target collection and embedding model (explicit
    /// collection beats request model beats repository default) and the
    /// chunking strategy, then persists the job. Fails with a validation
    /// error if the document already has an active job — re-submission
    /// requires the prior job to reach a terminal state first.
    pub async fn create_ingestion_job(
        &self,
        repository: &Repository,
        collection: Option<&Collection>,
        request: &IngestRequest,
    ) -> Result<IngestionJob> {
        if request.document_id.trim().is_empty() {
            return Err(Error::Validation("document_id must not be empty".to_string()));
        }
        if request.source_path.trim().is_empty() {
            return Err(Error::Validation("source_path must not be empty".to_string()));
        }

        if let Some(active) = self.jobs.find_by_document(&request.document_id).await? {
            return Err(Error::Validation(format!(
                "document '{}' already has an active job '{}' ({})",
                request.document_id,
                active.id,
                active.status.as_str()
            )));
        }

        let (collection_id, embedding_model) = match &request.collection_id {
            Some(requested_id) => {
                let coll = collection
                    .filter(|c| c.id == *requested_id)
                    .ok_or_else(|| Error::not_found("collection", requested_id))?;
                (coll.id.clone(), coll.embedding_model.clone())
            }
            None => {
                let model = request
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| repository.default_embedding_model.clone());
                (repository.default_collection_id.clone(), model)
            }
        };

        let chunk_strategy = resolve_strategy(
            request.strategy.as_ref(),
            request.chunk_size.as_deref(),
            request.chunk_overlap.as_deref(),
            collection,
        );

        let now = Utc::now();
        let job = IngestionJob {
            id: Uuid::new_v4().to_string(),
            repository_id: repository.id.clone(),
            collection_id,
            document_id: request.document_id.clone(),
            chunk_strategy,
            embedding_model,
            source_path: request.source_path.clone(),
            username: request.username.clone(),
            metadata: request.metadata.clone(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        self.jobs.save(&job).await?;
        info!(job_id = %job.id, document_id = %job.document_id, "created ingestion job");
        Ok(job)
    }

    /// Hand a pending job to the execution substrate for ingestion.
    pub async fn submit_create_job(&self, job: &IngestionJob) -> Result<()> {
        if job.status != JobStatus::Pending {
            return Err(Error::Validation(format!(
                "job {} is {}, only pending jobs can be submitted",
                job.id,
                job.status.as_str()
            )));
        }
        self.trigger.submit_create(job).await
    }

    /// Hand a pending job to the execution substrate for deletion.
    pub async fn create_delete_job(&self, job: &IngestionJob) -> Result<()> {
        if job.status != JobStatus::Pending {
            return Err(Error::Validation(format!(
                "job {} is {}, only pending jobs can be submitted",
                job.id,
                job.status.as_str()
            )));
        }
        self.trigger.submit_delete(job).await
    }

    /// Run the chunk → embed → store work for a pending job.
    ///
    /// Transitions `Pending → InProgress`, then to `IngestionCompleted` on
    /// success or `IngestionFailed` on any terminal error. A cancelled run
    /// surfaces [`Error::Cancelled`] and leaves the job `InProgress` for
    /// the orchestrator to re-drive.
    pub async fn ingest(
        &self,
        job: &IngestionJob,
        cancel: &CancellationToken,
    ) -> Result<IngestionJob> {
        let job = self.jobs.update_status(job, JobStatus::InProgress).await?;
        info!(job_id = %job.id, source_path = %job.source_path, "ingestion started");

        let text = match self.blobs.fetch(&job.source_path).await {
            Ok(text) => text,
            Err(e) => {
                self.mark_failed(&job, JobStatus::IngestionFailed, &e).await;
                return Err(e);
            }
        };

        let chunks = chunk_text(&job.document_id, &text, &job.chunk_strategy);

        match self.pipeline.run(&job, &chunks, cancel).await {
            Ok(written) => {
                let job = self
                    .jobs
                    .update_status(&job, JobStatus::IngestionCompleted)
                    .await?;
                info!(job_id = %job.id, vectors = written, "ingestion completed");
                Ok(job)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                self.mark_failed(&job, JobStatus::IngestionFailed, &e).await;
                Err(e)
            }
        }
    }

    /// Run the deletion work for a pending job: vectors, document record,
    /// backing blob.
    ///
    /// Transitions `Pending → Deleting`, then to `DeleteCompleted` or
    /// `DeleteFailed`.
    pub async fn delete(&self, job: &IngestionJob) -> Result<IngestionJob> {
        let job = self.jobs.update_status(job, JobStatus::Deleting).await?;
        info!(job_id = %job.id, document_id = %job.document_id, "deletion started");

        match self.delete_artifacts(&job).await {
            Ok(()) => {
                let job = self
                    .jobs
                    .update_status(&job, JobStatus::DeleteCompleted)
                    .await?;
                info!(job_id = %job.id, "deletion completed");
                Ok(job)
            }
            Err(e) => {
                self.mark_failed(&job, JobStatus::DeleteFailed, &e).await;
                Err(e)
            }
        }
    }

    /// Page through a repository's jobs. `cursor` is the encoded cursor
    /// from a previous page; `max_age` restricts results to recent jobs.
    pub async fn list_jobs(
        &self,
        repository_id: &str,
        page_size: usize,
        cursor: Option<&str>,
        max_age: Option<Duration>,
    ) -> Result<(Vec<IngestionJob>, Option<String>)> {
        if page_size == 0 {
            return Err(Error::Validation("page_size must be > 0".to_string()));
        }
        let key = cursor.map(decode_cursor).transpose()?;

        let page = self
            .jobs
            .list_by_repository(repository_id, page_size, key.as_ref(), max_age)
            .await?;

        let next = page.next_cursor.as_ref().map(encode_cursor);
        Ok((page.jobs, next))
    }

    async fn delete_artifacts(&self, job: &IngestionJob) -> Result<()> {
        let filter = VectorFilter {
            document_id: Some(job.document_id.clone()),
            ..Default::default()
        };
        self.vectors.delete(&job.collection_id, &filter).await?;
        self.documents.delete_document(&job.document_id).await?;
        self.blobs.delete(&job.source_path).await
    }

    /// Best-effort terminal transition after a failure; the original error
    /// is what the caller sees.
    async fn mark_failed(&self, job: &IngestionJob, status: JobStatus, cause: &Error) {
        if let Err(e) = self.jobs.update_status(job, status).await {
            warn!(
                job_id = %job.id,
                cause = %cause,
                error = %e,
                "failed to record terminal job status"
            );
        }
    }
}
