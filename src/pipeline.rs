//! Adaptive embedding batch pipeline.
//!
//! Converts an ordered sequence of chunks into vectors through an
//! [`EmbeddingClient`] whose payload size limit is not precisely known, and
//! writes them to the vector store:
//!
//! 1. Partition chunks into batches by a character budget (not item count).
//! 2. On an oversize rejection, halve the batch and retry both halves
//!    recursively. A batch of one that is still oversize is terminal for
//!    the job — it cannot be split further and is reported, never dropped.
//! 3. On a transient failure, retry the same batch with exponential
//!    backoff up to a bounded count; exhaustion is terminal.
//! 4. The concatenation of per-batch results, in batch order, is one
//!    vector per input chunk in the original order. Splitting and retry
//!    never reorder or drop an entry.
//!
//! Each batch is written to the vector store as soon as it is embedded,
//! tagged with the job's source metadata. The cancellation token is
//! polled between batches, never mid-batch.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{EmbedError, Error, Result};
use crate::models::{Chunk, EmbeddingBatchRequest, IngestionJob};
use crate::store::{VectorMetadata, VectorStore};

/// Order-preserving batch embedder.
pub struct BatchPipeline {
    embedder: Arc<dyn EmbeddingClient>,
    vectors: Arc<dyn VectorStore>,
    config: PipelineConfig,
}

impl BatchPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        vectors: Arc<dyn VectorStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            config,
        }
    }

    /// Embed all chunks for a job and write them to the job's collection.
    /// Returns the number of vectors written.
    pub async fn run(
        &self,
        job: &IngestionJob,
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut written = 0usize;

        for range in partition(chunks, self.config.batch_char_budget) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let batch = &chunks[range.0..range.1];
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let indices: Vec<i64> = batch.iter().map(|c| c.chunk_index).collect();

            let vectors = self
                .embed_slice(&texts, &indices, &job.embedding_model)
                .await?;

            let metadatas: Vec<VectorMetadata> = batch
                .iter()
                .map(|chunk| VectorMetadata {
                    repository_id: job.repository_id.clone(),
                    document_id: job.document_id.clone(),
                    chunk_id: chunk.id.clone(),
                    chunk_index: chunk.chunk_index,
                    source_path: job.source_path.clone(),
                    extra: job.metadata.clone(),
                })
                .collect();

            self.vectors
                .add(&job.collection_id, &vectors, &metadatas)
                .await?;
            written += vectors.len();
        }

        Ok(written)
    }

    /// Embed one slice, splitting on oversize and retrying on transient
    /// failures. Returns exactly one vector per text, in input order.
    async fn embed_slice(
        &self,
        texts: &[String],
        indices: &[i64],
        model: &str,
    ) -> Result<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;

        loop {
            let request = EmbeddingBatchRequest {
                texts: texts.to_vec(),
                model: model.to_string(),
            };

            match self.embedder.embed(&request).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        // An endpoint that miscounts would silently corrupt
                        // the order invariant downstream.
                        return Err(Error::Storage(format!(
                            "embedding endpoint returned {} vectors for {} texts",
                            vectors.len(),
                            texts.len()
                        )));
                    }
                    return Ok(vectors);
                }
                Err(EmbedError::Oversize) => {
                    if texts.len() == 1 {
                        return Err(Error::ChunkTooLarge { index: indices[0] });
                    }
                    let mid = texts.len() / 2;
                    debug!(
                        batch_len = texts.len(),
                        "embedding payload oversize, splitting batch"
                    );
                    let mut left =
                        Box::pin(self.embed_slice(&texts[..mid], &indices[..mid], model)).await?;
                    let mut right =
                        Box::pin(self.embed_slice(&texts[mid..], &indices[mid..], model)).await?;
                    left.append(&mut right);
                    return Ok(left);
                }
                Err(EmbedError::Transient(message)) => {
                    if attempt >= self.config.max_retries {
                        return Err(Error::RetriesExhausted(message));
                    }
                    let delay =
                        Duration::from_millis(self.config.retry_backoff_ms << attempt.min(5));
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient embedding failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Split chunks into contiguous `(start, end)` batches whose combined text
/// stays within `char_budget`. A single chunk above the budget gets a batch
/// of its own; the endpoint has the final say on whether it fits.
fn partition(chunks: &[Chunk], char_budget: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0usize;
    let mut used = 0usize;

    for (i, chunk) in chunks.iter().enumerate() {
        let len = chunk.text.chars().count();
        if i > start && used + len > char_budget {
            ranges.push((start, i));
            start = i;
            used = 0;
        }
        used += len;
    }

    if start < chunks.len() {
        ranges.push((start, chunks.len()));
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("c{index}"),
            document_id: "d1".to_string(),
            chunk_index: index,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    #[test]
    fn test_partition_respects_budget() {
        let chunks: Vec<Chunk> = (0..6).map(|i| chunk(i, "aaaa")).collect(); // 4 chars each
        let ranges = partition(&chunks, 10);
        // 2 chunks per batch: 8 chars fit, a third would make 12.
        assert_eq!(ranges, vec![(0, 2), (2, 4), (4, 6)]);
    }

    #[test]
    fn test_partition_oversize_chunk_is_alone() {
        let chunks = vec![
            chunk(0, "aa"),
            chunk(1, &"x".repeat(50)),
            chunk(2, "bb"),
        ];
        let ranges = partition(&chunks, 10);
        assert_eq!(ranges, vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_partition_empty_input() {
        assert!(partition(&[], 10).is_empty());
    }

    #[test]
    fn test_partition_covers_everything_in_order() {
        let chunks: Vec<Chunk> = (0..17).map(|i| chunk(i, "abcdefg")).collect();
        let ranges = partition(&chunks, 20);
        assert_eq!(ranges.first().map(|r| r.0), Some(0));
        assert_eq!(ranges.last().map(|r| r.1), Some(17));
        for window in ranges.windows(2) {
            assert_eq!(window[0].1, window[1].0);
        }
    }
}
