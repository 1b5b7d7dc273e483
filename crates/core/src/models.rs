use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// The chunk opens on a detected title or heading.
    TitleBased,
    /// The chunk was cut on a size boundary inside running text.
    SizeBased,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::TitleBased => "title_based",
            ChunkType::SizeBased => "size_based",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "title_based" => Some(ChunkType::TitleBased),
            "size_based" => Some(ChunkType::SizeBased),
            _ => None,
        }
    }
}

/// Provenance carried by every stored chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub chunk_id: u32,
    pub total_chunks: u32,
    pub chunk_type: ChunkType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub source_file: String,
    /// 1-based position inside the source file.
    pub chunk_id: u32,
    pub total_chunks: u32,
    pub chunk_type: ChunkType,
}

impl Chunk {
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            source_file: self.source_file.clone(),
            chunk_id: self.chunk_id,
            total_chunks: self.total_chunks,
            chunk_type: self.chunk_type,
        }
    }

    pub fn metadata_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("source_file".to_string(), Value::from(self.source_file.clone()));
        map.insert("chunk_id".to_string(), Value::from(self.chunk_id));
        map.insert("total_chunks".to_string(), Value::from(self.total_chunks));
        map.insert("chunk_type".to_string(), Value::from(self.chunk_type.as_str()));
        map
    }
}

/// A stored chunk paired with the raw distance reported by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// Equality filter on chunk metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkFilter {
    pub source_file: Option<String>,
}

impl ChunkFilter {
    pub fn for_file(source_file: impl Into<String>) -> Self {
        Self {
            source_file: Some(source_file.into()),
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.source_file
            .as_deref()
            .map_or(true, |file| chunk.source_file == file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    pub k: usize,
    pub source_file: Option<String>,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>, k: usize) -> Self {
        Self {
            query: query.into(),
            k,
            source_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub rank: usize,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub similarity_score: f32,
    pub source_file: String,
    pub chunk_id: u32,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionStats {
    pub collection_name: String,
    pub total_chunks: usize,
    pub unique_files: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearOutcome {
    Cleared,
    AlreadyEmpty,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub filename: String,
    pub chunks_created: usize,
    pub text_length: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub ingested_at: DateTime<Utc>,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
