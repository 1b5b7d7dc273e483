use super::batch_totals;
use crate::traits::VectorStore;
use crate::{Chunk, ChunkFilter, ChunkType, ClearOutcome, ScoredChunk, StoreError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: usize = 256;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection with cosine distance when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "qdrant collection setup failed with {}",
                response.status()
            )));
        }

        debug!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }

    async fn scroll_page(
        &self,
        filter: &ChunkFilter,
        limit: usize,
        offset: Option<Value>,
    ) -> Result<(Vec<Value>, Option<Value>), StoreError> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(filter) = filter_json(filter) {
            body["filter"] = filter;
        }
        if let Some(offset) = offset {
            body["offset"] = offset;
        }

        let response = self
            .client
            .post(format!("{}/points/scroll", self.collection_url()))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok((Vec::new(), None));
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let points = parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = parsed
            .pointer("/result/next_page_offset")
            .filter(|value| !value.is_null())
            .cloned();

        Ok((points, next))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
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

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(StoreError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point_id(chunk).to_string(),
                    "vector": embedding,
                    "payload": {
                        "content": chunk.content,
                        "source_file": chunk.source_file,
                        "chunk_id": chunk.chunk_id,
                        "total_chunks": chunk.total_chunks,
                        "chunk_type": chunk.chunk_type.as_str(),
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        self.ensure_collection().await?;

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        for (source_file, total) in batch_totals(chunks) {
            let response = self
                .client
                .post(format!("{}/points/delete?wait=true", self.collection_url()))
                .json(&json!({ "filter": stale_chunks_filter(source_file, total) }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(backend_error(response.status()));
            }
            debug!(source_file, total, "pruned chunks beyond the new total");
        }

        Ok(())
    }

    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": query_vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter_json(filter) {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let Some(chunk) = hit.pointer("/payload").and_then(chunk_from_payload) else {
                continue;
            };
            // Qdrant reports cosine similarity for cosine collections.
            result.push(ScoredChunk {
                chunk,
                distance: 1.0 - score as f32,
            });
        }

        Ok(result)
    }

    async fn fetch(&self, filter: &ChunkFilter, limit: usize) -> Result<Vec<Chunk>, StoreError> {
        let mut chunks = Vec::new();
        let mut offset = None;

        while chunks.len() < limit {
            let page = (limit - chunks.len()).min(SCROLL_PAGE);
            let (points, next) = self.scroll_page(filter, page, offset).await?;
            chunks.extend(
                points
                    .iter()
                    .filter_map(|point| point.pointer("/payload"))
                    .filter_map(chunk_from_payload),
            );
            match next {
                Some(next) if !points.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        chunks.truncate(limit);
        Ok(chunks)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn source_files(&self) -> Result<Vec<String>, StoreError> {
        let mut files = BTreeSet::new();
        let mut offset = None;
        let filter = ChunkFilter::default();

        loop {
            let (points, next) = self.scroll_page(&filter, SCROLL_PAGE, offset).await?;
            files.extend(
                points
                    .iter()
                    .filter_map(|point| point.pointer("/payload/source_file"))
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            );
            match next {
                Some(next) if !points.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        Ok(files.into_iter().collect())
    }

    async fn clear(&self) -> Result<ClearOutcome, StoreError> {
        let response = self.client.delete(self.collection_url()).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ClearOutcome::AlreadyEmpty);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        match parsed.pointer("/result").and_then(Value::as_bool) {
            Some(false) => Ok(ClearOutcome::AlreadyEmpty),
            _ => Ok(ClearOutcome::Cleared),
        }
    }
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

fn filter_json(filter: &ChunkFilter) -> Option<Value> {
    filter.source_file.as_ref().map(|file| {
        json!({
            "must": [
                { "key": "source_file", "match": { "value": file } }
            ]
        })
    })
}

fn stale_chunks_filter(source_file: &str, total: u32) -> Value {
    json!({
        "must": [
            { "key": "source_file", "match": { "value": source_file } },
            { "key": "chunk_id", "range": { "gt": total } }
        ]
    })
}

/// Point ids are derived from provenance so re-ingesting a file overwrites
/// its previous points instead of duplicating them.
fn point_id(chunk: &Chunk) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source_file.as_bytes());
    hasher.update(chunk.chunk_id.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn chunk_from_payload(payload: &Value) -> Option<Chunk> {
    Some(Chunk {
        content: payload.get("content")?.as_str()?.to_string(),
        source_file: payload
            .get("source_file")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        chunk_id: payload.get("chunk_id").and_then(Value::as_u64).unwrap_or(0) as u32,
        total_chunks: payload
            .get("total_chunks")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        chunk_type: payload
            .get("chunk_type")
            .and_then(Value::as_str)
            .and_then(ChunkType::parse)
            .unwrap_or(ChunkType::SizeBased),
    })
}
