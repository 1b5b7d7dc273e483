use crate::{Chunk, ChunkFilter, ClearOutcome, ModelError, ScoredChunk, StoreError};
use async_trait::async_trait;

/// Persistence and similarity search over one named collection of chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection_name(&self) -> &str;

    /// Writes every chunk in a single batch; either all land or none do.
    /// Chunks keyed by `(source_file, chunk_id)` are replaced, and each file in
    /// the batch loses any stored chunk numbered above its new total.
    async fn add(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), StoreError>;

    /// Returns up to `k` chunks in ascending distance order. Distances are
    /// cosine distances, so `1 - distance` is the cosine similarity.
    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Returns up to `limit` stored chunks without ranking.
    async fn fetch(&self, filter: &ChunkFilter, limit: usize) -> Result<Vec<Chunk>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Distinct `source_file` values, sorted.
    async fn source_files(&self) -> Result<Vec<String>, StoreError>;

    async fn clear(&self) -> Result<ClearOutcome, StoreError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}
