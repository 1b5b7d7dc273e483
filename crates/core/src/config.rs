use crate::chunking::ChunkingConfig;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::ConfigError;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub qdrant_url: String,
    pub collection_name: String,
    pub embedding_dimensions: usize,

    /// Base URL of an OpenAI-compatible API (`.../v1`).
    pub llm_base_url: String,
    pub llm_model: String,
    #[serde(skip_serializing)]
    pub llm_api_key: Option<String>,
    pub temperature: f32,
    pub num_results: usize,
    pub llm_timeout_secs: u64,

    pub chunk_max_chars: usize,
    pub min_text_chars: usize,

    /// Model used for enrichment and question synthesis; falls back to `llm_model`.
    pub testset_model: Option<String>,
    pub testset_base_url: Option<String>,
    #[serde(skip_serializing)]
    pub testset_api_key: Option<String>,
    pub testset_temperature: f32,
    pub max_retries: usize,
    pub retry_delay_secs: u64,
    pub max_testset_chunks: usize,
    pub testset_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://localhost:6333".to_string(),
            collection_name: "contract_rag_collection".to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            llm_base_url: "https://api.groq.com/openai/v1".to_string(),
            llm_model: "llama-3.3-70b-versatile".to_string(),
            llm_api_key: None,
            temperature: 0.0,
            num_results: 5,
            llm_timeout_secs: 120,
            chunk_max_chars: 800,
            min_text_chars: 100,
            testset_model: None,
            testset_base_url: None,
            testset_api_key: None,
            testset_temperature: 0.2,
            max_retries: DEFAULT_MAX_ATTEMPTS,
            retry_delay_secs: 30,
            max_testset_chunks: 100,
            testset_dir: PathBuf::from("testsets"),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url("qdrant_url", &self.qdrant_url)?;
        parse_url("llm_base_url", &self.llm_base_url)?;
        if let Some(url) = &self.testset_base_url {
            parse_url("testset_base_url", url)?;
        }

        if self.collection_name.trim().is_empty() {
            return Err(invalid("collection_name", "must not be empty"));
        }
        if self.embedding_dimensions == 0 {
            return Err(invalid("embedding_dimensions", "must be positive"));
        }
        if self.num_results == 0 {
            return Err(invalid("num_results", "must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries", "must be at least 1"));
        }
        if self.max_testset_chunks == 0 {
            return Err(invalid("max_testset_chunks", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature", "must be within 0.0..=2.0"));
        }
        self.chunking()
            .validate()
            .map_err(|error| invalid("chunk_max_chars", &error.to_string()))?;

        Ok(())
    }

    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig::for_max_chars(self.chunk_max_chars)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn testset_model_name(&self) -> &str {
        self.testset_model.as_deref().unwrap_or(&self.llm_model)
    }

    pub fn testset_base_url(&self) -> &str {
        self.testset_base_url.as_deref().unwrap_or(&self.llm_base_url)
    }

    pub fn testset_api_key(&self) -> Option<&str> {
        self.testset_api_key
            .as_deref()
            .or(self.llm_api_key.as_deref())
            .filter(|key| !key.trim().is_empty())
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::Url { field, source })
}

fn invalid(field: &'static str, details: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        details: details.to_string(),
    }
}
