//! TOML configuration for the pipeline and the embedding endpoint.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub endpoint: EmbeddingEndpointConfig,
}

/// Tuning for the adaptive batch pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Target characters of input text per embedding batch. Chosen to keep
    /// serialized payloads safely under the endpoint's observed size limit;
    /// the pipeline still splits adaptively when the endpoint disagrees.
    #[serde(default = "default_batch_char_budget")]
    pub batch_char_budget: usize,
    /// Bounded retry count for transient embedding failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay; doubles per attempt, capped at 2^5 multiples.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_char_budget: default_batch_char_budget(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_batch_char_budget() -> usize {
    15_000
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    1_000
}

/// Connection settings for an OpenAI-compatible embeddings endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingEndpointConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token, if the endpoint
    /// requires one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Validation(format!("failed to read config file {}: {e}", path.display()))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::Validation(format!("failed to parse config file: {e}")))?;

    if config.pipeline.batch_char_budget == 0 {
        return Err(Error::Validation(
            "pipeline.batch_char_budget must be > 0".to_string(),
        ));
    }

    if config.endpoint.base_url.trim().is_empty() {
        return Err(Error::Validation(
            "endpoint.base_url must not be empty".to_string(),
        ));
    }

    if config.endpoint.timeout_secs == 0 {
        return Err(Error::Validation(
            "endpoint.timeout_secs must be > 0".to_string(),
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.pipeline.batch_char_budget, 15_000);
        assert_eq!(config.pipeline.max_retries, 5);
        assert_eq!(config.endpoint.timeout_secs, 30);
    }

    #[test]
    fn test_partial_override() {
        let file = write_config(
            r#"
[pipeline]
batch_char_budget = 8000

[endpoint]
base_url = "http://localhost:8081/v1"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.pipeline.batch_char_budget, 8000);
        assert_eq!(config.pipeline.max_retries, 5);
        assert_eq!(config.endpoint.base_url, "http://localhost:8081/v1");
    }

    #[test]
    fn test_zero_budget_rejected() {
        let file = write_config("[pipeline]\nbatch_char_budget = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_bad_toml_is_validation_error() {
        let file = write_config("[pipeline\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
