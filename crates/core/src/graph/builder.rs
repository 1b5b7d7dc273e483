use super::transforms::{default_transforms, Transform};
use super::KnowledgeGraph;
use crate::embeddings::Embedder;
use crate::retry::{RetryError, RetryPolicy};
use crate::traits::LanguageModel;
use crate::{Chunk, ModelError};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Nodes enriched in fast mode.
pub const FAST_MODE_NODES: usize = 5;
/// Upper bound of nodes enriched in full mode.
pub const FULL_MODE_SAMPLE_CAP: usize = 30;

/// Keeps every `len / cap`-th item, at most `cap` of them, in original order.
/// Inputs that already fit are returned whole.
pub fn even_stride_sample<T: Clone>(items: &[T], cap: usize) -> Vec<T> {
    if cap == 0 {
        return Vec::new();
    }
    if items.len() <= cap {
        return items.to_vec();
    }
    let step = items.len() / cap;
    items.iter().step_by(step).take(cap).cloned().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrichmentMode {
    /// Nodes only.
    None,
    /// Enrich the first few nodes.
    #[default]
    Fast,
    /// Enrich an even-stride sample of up to thirty nodes.
    Full,
}

impl EnrichmentMode {
    pub fn from_flags(enrich: bool, fast: bool) -> Self {
        match (enrich, fast) {
            (false, _) => EnrichmentMode::None,
            (true, true) => EnrichmentMode::Fast,
            (true, false) => EnrichmentMode::Full,
        }
    }

    fn select_targets(self, graph: &KnowledgeGraph) -> Vec<Uuid> {
        let ids: Vec<Uuid> = graph.nodes.iter().map(|node| node.id).collect();
        match self {
            EnrichmentMode::None => Vec::new(),
            EnrichmentMode::Fast => ids.into_iter().take(FAST_MODE_NODES).collect(),
            EnrichmentMode::Full => even_stride_sample(&ids, FULL_MODE_SAMPLE_CAP),
        }
    }
}

/// Outcome of a graph build. A degraded build still carries the node-only
/// graph; it is never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphBuild {
    Plain(KnowledgeGraph),
    Enriched(KnowledgeGraph),
    Degraded {
        graph: KnowledgeGraph,
        reason: String,
    },
}

impl GraphBuild {
    pub fn graph(&self) -> &KnowledgeGraph {
        match self {
            GraphBuild::Plain(graph) | GraphBuild::Enriched(graph) => graph,
            GraphBuild::Degraded { graph, .. } => graph,
        }
    }

    pub fn into_graph(self) -> KnowledgeGraph {
        match self {
            GraphBuild::Plain(graph) | GraphBuild::Enriched(graph) => graph,
            GraphBuild::Degraded { graph, .. } => graph,
        }
    }

    pub fn degradation_reason(&self) -> Option<&str> {
        match self {
            GraphBuild::Degraded { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GraphBuild::Plain(_) => "plain",
            GraphBuild::Enriched(_) => "enriched",
            GraphBuild::Degraded { .. } => "degraded",
        }
    }
}

pub struct GraphBuilder {
    transforms: Vec<Box<dyn Transform>>,
    retry: RetryPolicy,
}

impl GraphBuilder {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        retry: RetryPolicy,
    ) -> Self {
        Self::with_transforms(default_transforms(model, embedder), retry)
    }

    pub fn with_transforms(transforms: Vec<Box<dyn Transform>>, retry: RetryPolicy) -> Self {
        Self { transforms, retry }
    }

    /// One document node per chunk, then best-effort enrichment of the nodes
    /// the mode selects. Enrichment runs on a copy that is only kept when the
    /// whole pipeline succeeds.
    pub async fn build(&self, chunks: &[Chunk], mode: EnrichmentMode) -> GraphBuild {
        let graph = KnowledgeGraph::from_chunks(chunks);
        let targets = mode.select_targets(&graph);
        if targets.is_empty() || self.transforms.is_empty() {
            return GraphBuild::Plain(graph);
        }

        let started = Instant::now();
        let base = &graph;
        let selected = &targets;
        let transforms = &self.transforms;

        let outcome = self
            .retry
            .run(
                move || async move {
                    let mut candidate = base.clone();
                    for transform in transforms.iter() {
                        debug!(
                            transform = transform.name(),
                            nodes = selected.len(),
                            "applying transform"
                        );
                        transform
                            .apply(&mut candidate, selected)
                            .await
                            .map_err(|error| StepFailure {
                                transform: transform.name(),
                                error,
                            })?;
                    }
                    Ok::<_, StepFailure>(candidate)
                },
                |failure: &StepFailure| failure.error.is_rate_limit(),
            )
            .await;

        match outcome {
            Ok(enriched) => {
                info!(
                    ?mode,
                    nodes = enriched.nodes.len(),
                    enriched_nodes = targets.len(),
                    relationships = enriched.relationships.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "knowledge graph enriched"
                );
                GraphBuild::Enriched(enriched)
            }
            Err(error) => {
                let reason = match error {
                    RetryError::Exhausted { attempts, last } => {
                        format!("enrichment abandoned after {attempts} attempts: {last}")
                    }
                    RetryError::Permanent(error) => format!("enrichment failed: {error}"),
                };
                warn!(?mode, nodes = graph.nodes.len(), %reason, "falling back to node-only graph");
                GraphBuild::Degraded { graph, reason }
            }
        }
    }
}

/// A model error tagged with the transform that raised it.
#[derive(Debug)]
struct StepFailure {
    transform: &'static str,
    error: ModelError,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.transform, self.error)
    }
}
