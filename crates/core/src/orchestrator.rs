use crate::embeddings::Embedder;
use crate::traits::{LanguageModel, VectorStore};
use crate::{AnswerRequest, ChunkFilter, QueryAnswer, QueryError, ScoredChunk, Source};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Grounding prompt. The model must answer from the supplied context only and
/// admit when the context is insufficient.
pub const ANSWER_PROMPT_TEMPLATE: &str = "You are a helpful AI assistant specialized in analyzing contract documents.
Use the following pieces of context from contract documents to answer the question at the end.
Answer only from this context. If the context is not sufficient to answer, just say \"I don't know\"; don't make up an answer.
Provide detailed, well-structured answers with relevant citations from the contracts when applicable.

Context:
{context}

Question: {question}

Detailed Answer:";

pub fn build_prompt(question: &str, hits: &[ScoredChunk]) -> String {
    let context = hits
        .iter()
        .map(|hit| hit.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    ANSWER_PROMPT_TEMPLATE
        .replace("{context}", &context)
        .replace("{question}", question.trim())
}

/// `1 - distance`, clamped into `[0, 1]`. Unbounded metrics would otherwise
/// surface negative or >1 similarities.
pub fn similarity_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Orders hits by ascending distance (stable, so store order breaks ties)
/// and numbers them from 1.
pub fn rank_sources(mut hits: Vec<ScoredChunk>) -> Vec<Source> {
    hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
    hits.into_iter()
        .enumerate()
        .map(|(index, hit)| Source {
            rank: index + 1,
            metadata: hit.chunk.metadata_map(),
            similarity_score: similarity_from_distance(hit.distance),
            source_file: hit.chunk.source_file,
            chunk_id: hit.chunk.chunk_id,
            total_chunks: hit.chunk.total_chunks,
            content: hit.chunk.content,
        })
        .collect()
}

pub struct AnswerOrchestrator {
    store: Arc<dyn VectorStore>,
    model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
}

impl AnswerOrchestrator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            model,
            embedder,
        }
    }

    /// Retrieves the top `k` chunks, asks the model for a grounded answer and
    /// returns it with the ranked sources. Any collaborator failure aborts the
    /// whole call; nothing is retried here.
    pub async fn answer(&self, request: &AnswerRequest) -> Result<QueryAnswer, QueryError> {
        if request.query.trim().is_empty() {
            return Err(QueryError::InvalidArgument("query is empty".to_string()));
        }
        if request.k == 0 {
            return Err(QueryError::InvalidArgument(
                "number of results must be at least 1".to_string(),
            ));
        }

        let started = Instant::now();
        let filter = ChunkFilter {
            source_file: request.source_file.clone(),
        };
        let query_vector = self.embedder.embed(&request.query);

        let mut hits = self
            .store
            .similarity_search(&query_vector, request.k, &filter)
            .await?;
        hits.truncate(request.k);

        let prompt = build_prompt(&request.query, &hits);
        let answer = self.model.complete(&prompt).await?;
        let sources = rank_sources(hits);

        info!(
            k = request.k,
            sources = sources.len(),
            model = self.model.model_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered query"
        );

        Ok(QueryAnswer { answer, sources })
    }
}
