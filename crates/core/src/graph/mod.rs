//! Knowledge graph over stored chunks: one document node per chunk, plus
//! relationships derived by the enrichment transforms.

pub mod builder;
pub mod transforms;

pub use builder::{
    even_stride_sample, EnrichmentMode, GraphBuild, GraphBuilder, FAST_MODE_NODES,
    FULL_MODE_SAMPLE_CAP,
};
pub use transforms::{
    default_transforms, EmbeddingExtractor, EntityExtractor, EntityOverlapBuilder,
    SimilarityBuilder, SummaryExtractor, Transform,
};

use crate::error::GraphError;
use crate::models::{Chunk, ChunkMetadata};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Document,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeProperties {
    pub page_content: String,
    pub document_metadata: ChunkMetadata,
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    pub summary_embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub properties: NodeProperties,
}

impl Node {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_type: NodeType::Document,
            properties: NodeProperties {
                page_content: chunk.content.clone(),
                document_metadata: chunk.metadata(),
                summary: None,
                entities: Vec::new(),
                summary_embedding: None,
            },
        }
    }

    /// Summary when enrichment produced one, otherwise the raw content.
    pub fn best_text(&self) -> &str {
        self.properties
            .summary
            .as_deref()
            .unwrap_or(&self.properties.page_content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationshipKind {
    SummarySimilarity { score: f32 },
    EntitiesOverlap { overlapped_entities: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub id: Uuid,
    pub source: Uuid,
    pub target: Uuid,
    pub bidirectional: bool,
    #[serde(flatten)]
    pub kind: RelationshipKind,
}

impl Relationship {
    pub fn new(source: Uuid, target: Uuid, kind: RelationshipKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            target,
            bidirectional: true,
            kind,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeGraph {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

impl KnowledgeGraph {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        Self {
            nodes: chunks.iter().map(Node::from_chunk).collect(),
            relationships: Vec::new(),
        }
    }

    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: Uuid) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
