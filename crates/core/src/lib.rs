pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod stores;
pub mod testset;
pub mod traits;

#[cfg(test)]
mod testing;

pub use chunking::{chunk_text, normalize_whitespace, ChunkingConfig};
pub use config::ServiceConfig;
pub use context::{AppContext, ServiceState, ServiceStatus};
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ConfigError, GraphError, IngestError, InitError, ModelError, QueryError, ServiceError,
    StoreError, TestsetError,
};
pub use extractor::{LopdfExtractor, TextExtractor};
pub use graph::{EnrichmentMode, GraphBuild, GraphBuilder, KnowledgeGraph};
pub use ingest::{discover_pdf_files, DocumentIngestor, FolderIngestReport, SkippedPdf};
pub use llm::OpenAiCompatibleModel;
pub use models::{
    AnswerRequest, Chunk, ChunkFilter, ChunkMetadata, ChunkType, ClearOutcome, CollectionStats,
    IngestReport, QueryAnswer, ScoredChunk, Source,
};
pub use orchestrator::AnswerOrchestrator;
pub use retry::{RetryError, RetryPolicy};
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use testset::{
    QueryDistribution, TestsetArtifact, TestsetGenerator, TestsetMetadata, TestsetOutcome,
    TestsetRequest, TestsetRow,
};
pub use traits::{LanguageModel, VectorStore};
