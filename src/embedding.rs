//! Embedding endpoint abstraction and the HTTP adapter.
//!
//! [`EmbeddingClient`] is the narrow seam the pipeline embeds through; its
//! error type separates "payload too large" from everything retryable.
//! [`HttpEmbeddingClient`] adapts an OpenAI-compatible `POST /embeddings`
//! endpoint:
//!
//! - HTTP 413 (and the 400-with-oversize-message shape some gateways
//!   return) → [`EmbedError::Oversize`]
//! - HTTP 429, 5xx, and network failures → [`EmbedError::Transient`]
//!
//! Retry and backoff live in the pipeline, not here: a client call is a
//! single attempt with a request timeout.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingEndpointConfig;
use crate::error::{EmbedError, Error, Result};
use crate::models::EmbeddingBatchRequest;

/// A downstream service that turns texts into vectors.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed one batch. On success returns exactly one vector per input
    /// text, in input order.
    async fn embed(
        &self,
        request: &EmbeddingBatchRequest,
    ) -> std::result::Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embedding client for OpenAI-compatible HTTP endpoints.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEmbeddingClient {
    /// Build a client from endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configured API key environment
    /// variable is named but not set.
    pub fn new(config: &EmbeddingEndpointConfig) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                Error::Validation(format!("environment variable {var} is not set"))
            })?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Validation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(
        &self,
        request: &EmbeddingBatchRequest,
    ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": request.model,
            "input": request.texts,
        });

        let mut req = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req
            .send()
            .await
            .map_err(|e| EmbedError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| EmbedError::Transient(e.to_string()))?;
            return parse_embedding_response(&json);
        }

        let body_text = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body_text))
    }
}

/// Map an HTTP failure status to the embedding error taxonomy.
fn classify_status(status: u16, body: &str) -> EmbedError {
    if status == 413 || (status == 400 && body_signals_oversize(body)) {
        return EmbedError::Oversize;
    }
    EmbedError::Transient(format!("embedding endpoint error {status}: {body}"))
}

/// Some gateways report oversize payloads as 400 with a message instead
/// of 413.
fn body_signals_oversize(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("too large")
        || lower.contains("payload size")
        || lower.contains("maximum context length")
}

/// Extract the `data[].embedding` arrays, re-ordered by `data[].index`
/// when present.
fn parse_embedding_response(
    json: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Transient("response is missing data array".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Transient("response item has no embedding".to_string()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}
