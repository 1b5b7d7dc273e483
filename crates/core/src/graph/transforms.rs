use super::{KnowledgeGraph, Relationship, RelationshipKind};
use crate::embeddings::{cosine_similarity, Embedder};
use crate::traits::LanguageModel;
use crate::ModelError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
const MAX_ENTITIES: usize = 10;

/// One enrichment step. Only the `targets` nodes are read or modified.
#[async_trait]
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, graph: &mut KnowledgeGraph, targets: &[Uuid]) -> Result<(), ModelError>;
}

pub fn default_transforms(
    model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
) -> Vec<Box<dyn Transform>> {
    vec![
        Box::new(SummaryExtractor::new(model.clone())),
        Box::new(EntityExtractor::new(model)),
        Box::new(EmbeddingExtractor::new(embedder)),
        Box::new(SimilarityBuilder::new(DEFAULT_SIMILARITY_THRESHOLD)),
        Box::new(EntityOverlapBuilder::default()),
    ]
}

fn contents(graph: &KnowledgeGraph, targets: &[Uuid]) -> Vec<(Uuid, String)> {
    targets
        .iter()
        .filter_map(|id| {
            graph
                .node(*id)
                .map(|node| (*id, node.properties.page_content.clone()))
        })
        .collect()
}

pub struct SummaryExtractor {
    model: Arc<dyn LanguageModel>,
}

impl SummaryExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Transform for SummaryExtractor {
    fn name(&self) -> &'static str {
        "summary_extractor"
    }

    async fn apply(&self, graph: &mut KnowledgeGraph, targets: &[Uuid]) -> Result<(), ModelError> {
        for (id, content) in contents(graph, targets) {
            let prompt = format!(
                "Summarize the following contract excerpt in at most three sentences. \
                 Keep parties, amounts, dates and obligations.\n\nExcerpt:\n{content}\n\nSummary:"
            );
            let summary = self.model.complete(&prompt).await?;
            let summary = summary.trim();
            if let Some(node) = graph.node_mut(id).filter(|_| !summary.is_empty()) {
                node.properties.summary = Some(summary.to_string());
            }
        }
        Ok(())
    }
}

pub struct EntityExtractor {
    model: Arc<dyn LanguageModel>,
}

impl EntityExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

/// One entity per line; list markers are stripped, duplicates dropped
/// case-insensitively.
pub fn parse_entities(reply: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut entities = Vec::new();

    for line in reply.lines() {
        let entity = line
            .trim()
            .trim_start_matches(|ch: char| {
                ch == '-' || ch == '*' || ch == '•' || ch.is_ascii_digit() || ch == '.' || ch == ')'
            })
            .trim()
            .trim_matches('"');
        if entity.is_empty() || entity.eq_ignore_ascii_case("none") {
            continue;
        }
        if seen.insert(entity.to_lowercase()) {
            entities.push(entity.to_string());
        }
        if entities.len() == MAX_ENTITIES {
            break;
        }
    }

    entities
}

#[async_trait]
impl Transform for EntityExtractor {
    fn name(&self) -> &'static str {
        "entity_extractor"
    }

    async fn apply(&self, graph: &mut KnowledgeGraph, targets: &[Uuid]) -> Result<(), ModelError> {
        for (id, content) in contents(graph, targets) {
            let prompt = format!(
                "List the named entities in the following contract excerpt: parties, \
                 organisations, people, places, dates, amounts and defined terms. \
                 Return one entity per line and nothing else.\n\nExcerpt:\n{content}\n\nEntities:"
            );
            let reply = self.model.complete(&prompt).await?;
            if let Some(node) = graph.node_mut(id) {
                node.properties.entities = parse_entities(&reply);
            }
        }
        Ok(())
    }
}

pub struct EmbeddingExtractor {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingExtractor {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Transform for EmbeddingExtractor {
    fn name(&self) -> &'static str {
        "embedding_extractor"
    }

    async fn apply(&self, graph: &mut KnowledgeGraph, targets: &[Uuid]) -> Result<(), ModelError> {
        for id in targets {
            if let Some(node) = graph.node_mut(*id) {
                let vector = self.embedder.embed(node.best_text());
                node.properties.summary_embedding = Some(vector);
            }
        }
        Ok(())
    }
}

fn already_linked(
    graph: &KnowledgeGraph,
    left: Uuid,
    right: Uuid,
    same_kind: fn(&RelationshipKind) -> bool,
) -> bool {
    graph.relationships.iter().any(|relationship| {
        same_kind(&relationship.kind)
            && ((relationship.source == left && relationship.target == right)
                || (relationship.source == right && relationship.target == left))
    })
}

pub struct SimilarityBuilder {
    threshold: f32,
}

impl SimilarityBuilder {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl Transform for SimilarityBuilder {
    fn name(&self) -> &'static str {
        "similarity_builder"
    }

    async fn apply(&self, graph: &mut KnowledgeGraph, targets: &[Uuid]) -> Result<(), ModelError> {
        let embedded: Vec<(Uuid, Vec<f32>)> = targets
            .iter()
            .filter_map(|id| {
                graph
                    .node(*id)
                    .and_then(|node| node.properties.summary_embedding.clone())
                    .map(|vector| (*id, vector))
            })
            .collect();

        for (position, (left, left_vector)) in embedded.iter().enumerate() {
            for (right, right_vector) in embedded.iter().skip(position + 1) {
                let score = cosine_similarity(left_vector, right_vector);
                if score < self.threshold {
                    continue;
                }
                let is_similarity =
                    |kind: &RelationshipKind| matches!(kind, RelationshipKind::SummarySimilarity { .. });
                if already_linked(graph, *left, *right, is_similarity) {
                    continue;
                }
                graph.relationships.push(Relationship::new(
                    *left,
                    *right,
                    RelationshipKind::SummarySimilarity { score },
                ));
            }
        }
        Ok(())
    }
}

pub struct EntityOverlapBuilder {
    min_overlap: usize,
}

impl Default for EntityOverlapBuilder {
    fn default() -> Self {
        Self { min_overlap: 1 }
    }
}

#[async_trait]
impl Transform for EntityOverlapBuilder {
    fn name(&self) -> &'static str {
        "entity_overlap_builder"
    }

    async fn apply(&self, graph: &mut KnowledgeGraph, targets: &[Uuid]) -> Result<(), ModelError> {
        let entity_sets: Vec<(Uuid, BTreeSet<String>)> = targets
            .iter()
            .filter_map(|id| graph.node(*id))
            .map(|node| {
                let set = node
                    .properties
                    .entities
                    .iter()
                    .map(|entity| entity.to_lowercase())
                    .collect();
                (node.id, set)
            })
            .collect();

        for (position, (left, left_set)) in entity_sets.iter().enumerate() {
            for (right, right_set) in entity_sets.iter().skip(position + 1) {
                let overlap: Vec<String> = left_set.intersection(right_set).cloned().collect();
                if overlap.is_empty() || overlap.len() < self.min_overlap {
                    continue;
                }
                let is_overlap =
                    |kind: &RelationshipKind| matches!(kind, RelationshipKind::EntitiesOverlap { .. });
                if already_linked(graph, *left, *right, is_overlap) {
                    continue;
                }
                graph.relationships.push(Relationship::new(
                    *left,
                    *right,
                    RelationshipKind::EntitiesOverlap {
                        overlapped_entities: overlap,
                    },
                ));
            }
        }
        Ok(())
    }
}
