use super::batch_totals;
use crate::embeddings::cosine_similarity;
use crate::traits::VectorStore;
use crate::{Chunk, ChunkFilter, ClearOutcome, ScoredChunk, StoreError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Process-local store. Insertion order is kept, so ties in distance resolve
/// the same way on every call.
#[derive(Debug)]
pub struct InMemoryVectorStore {
    collection: String,
    dimensions: usize,
    points: RwLock<Vec<StoredChunk>>,
}

impl InMemoryVectorStore {
    pub fn new(collection: impl Into<String>, dimensions: usize) -> Self {
        Self {
            collection: collection.into(),
            dimensions,
            points: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn add(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|vector| vector.len() != self.dimensions) {
            return Err(StoreError::Request(format!(
                "embedding dimension {} != {}",
                bad.len(),
                self.dimensions
            )));
        }

        let mut points = self.points.write().await;
        for (chunk, vector) in chunks.iter().zip(embeddings.iter()) {
            let existing = points.iter_mut().find(|point| {
                point.chunk.source_file == chunk.source_file && point.chunk.chunk_id == chunk.chunk_id
            });
            match existing {
                Some(point) => {
                    point.chunk = chunk.clone();
                    point.vector = vector.clone();
                }
                None => points.push(StoredChunk {
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                }),
            }
        }

        let totals = batch_totals(chunks);
        points.retain(|point| {
            totals
                .get(point.chunk.source_file.as_str())
                .map_or(true, |total| point.chunk.chunk_id <= *total)
        });
        Ok(())
    }

    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if query_vector.len() != self.dimensions {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.dimensions
            )));
        }

        let points = self.points.read().await;
        let mut scored: Vec<ScoredChunk> = points
            .iter()
            .filter(|point| filter.matches(&point.chunk))
            .map(|point| ScoredChunk {
                chunk: point.chunk.clone(),
                distance: 1.0 - cosine_similarity(&point.vector, query_vector),
            })
            .collect();

        scored.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        scored.truncate(k);
        Ok(scored)
    }

    async fn fetch(&self, filter: &ChunkFilter, limit: usize) -> Result<Vec<Chunk>, StoreError> {
        let points = self.points.read().await;
        Ok(points
            .iter()
            .filter(|point| filter.matches(&point.chunk))
            .take(limit)
            .map(|point| point.chunk.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.points.read().await.len())
    }

    async fn source_files(&self) -> Result<Vec<String>, StoreError> {
        let points = self.points.read().await;
        let files: BTreeSet<String> = points
            .iter()
            .map(|point| point.chunk.source_file.clone())
            .collect();
        Ok(files.into_iter().collect())
    }

    async fn clear(&self) -> Result<ClearOutcome, StoreError> {
        let mut points = self.points.write().await;
        if points.is_empty() {
            return Ok(ClearOutcome::AlreadyEmpty);
        }
        points.clear();
        Ok(ClearOutcome::Cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::ChunkType;

    fn chunk(source_file: &str, chunk_id: u32, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            source_file: source_file.to_string(),
            chunk_id,
            total_chunks: 3,
            chunk_type: ChunkType::SizeBased,
        }
    }

    async fn seeded() -> Result<(InMemoryVectorStore, CharacterNgramEmbedder), StoreError> {
        let embedder = CharacterNgramEmbedder::default();
        let store = InMemoryVectorStore::new("contracts", embedder.dimensions());
        let chunks = vec![
            chunk("msa.pdf", 1, "Either party may terminate with ninety days notice."),
            chunk("msa.pdf", 2, "Invoices are payable within sixty days."),
            chunk("nda.pdf", 1, "Confidential information must not be disclosed."),
        ];
        let vectors: Vec<_> = chunks.iter().map(|c| embedder.embed(&c.content)).collect();
        store.add(&chunks, &vectors).await?;
        Ok((store, embedder))
    }

    #[tokio::test]
    async fn search_returns_ascending_distance() -> Result<(), Box<dyn std::error::Error>> {
        let (store, embedder) = seeded().await?;
        let hits = store
            .similarity_search(&embedder.embed("terminate notice"), 3, &ChunkFilter::default())
            .await?;

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.chunk_id, 1);
        assert_eq!(hits[0].chunk.source_file, "msa.pdf");
        assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        Ok(())
    }

    #[tokio::test]
    async fn filter_and_stats_follow_source_file() -> Result<(), Box<dyn std::error::Error>> {
        let (store, embedder) = seeded().await?;
        let hits = store
            .similarity_search(&embedder.embed("payable"), 5, &ChunkFilter::for_file("nda.pdf"))
            .await?;
        assert_eq!(hits.len(), 1);

        assert_eq!(store.count().await?, 3);
        assert_eq!(store.source_files().await?, vec!["msa.pdf", "nda.pdf"]);
        assert_eq!(store.fetch(&ChunkFilter::for_file("msa.pdf"), 10).await?.len(), 2);
        assert_eq!(store.fetch(&ChunkFilter::default(), 1).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn re_adding_a_chunk_replaces_it() -> Result<(), Box<dyn std::error::Error>> {
        let (store, embedder) = seeded().await?;
        let replacement = chunk("msa.pdf", 2, "Invoices are payable within thirty days.");
        store
            .add(&[replacement.clone()], &[embedder.embed(&replacement.content)])
            .await?;

        assert_eq!(store.count().await?, 3);
        let stored = store.fetch(&ChunkFilter::for_file("msa.pdf"), 10).await?;
        assert!(stored.contains(&replacement));
        Ok(())
    }

    #[tokio::test]
    async fn shorter_re_ingest_drops_stale_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let (store, embedder) = seeded().await?;
        let mut shorter = chunk("msa.pdf", 1, "Either party may terminate on notice.");
        shorter.total_chunks = 1;
        store
            .add(&[shorter.clone()], &[embedder.embed(&shorter.content)])
            .await?;

        let stored = store.fetch(&ChunkFilter::for_file("msa.pdf"), 10).await?;
        assert_eq!(stored, vec![shorter]);
        assert!(stored.iter().all(|chunk| chunk.total_chunks == 1));
        assert_eq!(store.fetch(&ChunkFilter::for_file("nda.pdf"), 10).await?.len(), 1);
        assert_eq!(store.count().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_batches_are_rejected_whole() -> Result<(), Box<dyn std::error::Error>> {
        let store = InMemoryVectorStore::new("contracts", 4);
        let result = store
            .add(&[chunk("a.pdf", 1, "text"), chunk("a.pdf", 2, "text")], &[vec![0.0; 4]])
            .await;
        assert!(result.is_err());
        assert_eq!(store.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn clear_reports_whether_anything_was_removed() -> Result<(), Box<dyn std::error::Error>> {
        let (store, _) = seeded().await?;
        assert_eq!(store.clear().await?, ClearOutcome::Cleared);
        assert_eq!(store.clear().await?, ClearOutcome::AlreadyEmpty);
        assert_eq!(store.count().await?, 0);
        Ok(())
    }
}
