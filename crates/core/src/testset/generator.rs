use super::synthesizers::{Synthesizer, SynthesizerKind};
use super::TestsetRow;
use crate::graph::KnowledgeGraph;
use crate::retry::{RetryError, RetryPolicy};
use crate::traits::LanguageModel;
use crate::{ModelError, TestsetError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Weighted mix of synthesizers. Weights are relative and need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDistribution {
    weights: Vec<(SynthesizerKind, f64)>,
}

impl Default for QueryDistribution {
    fn default() -> Self {
        Self {
            weights: vec![
                (SynthesizerKind::SingleHopSpecific, 0.5),
                (SynthesizerKind::MultiHopAbstract, 0.25),
                (SynthesizerKind::MultiHopSpecific, 0.25),
            ],
        }
    }
}

impl QueryDistribution {
    pub fn new(weights: Vec<(SynthesizerKind, f64)>) -> Result<Self, TestsetError> {
        if weights.is_empty() {
            return Err(TestsetError::InvalidDistribution(
                "at least one synthesizer is required".to_string(),
            ));
        }
        if let Some((kind, weight)) = weights
            .iter()
            .find(|(_, weight)| !weight.is_finite() || *weight < 0.0)
        {
            return Err(TestsetError::InvalidDistribution(format!(
                "weight {weight} for {} must be a finite non-negative number",
                kind.name()
            )));
        }
        if weights.iter().map(|(_, weight)| weight).sum::<f64>() <= 0.0 {
            return Err(TestsetError::InvalidDistribution(
                "weights must not all be zero".to_string(),
            ));
        }
        Ok(Self { weights })
    }

    /// Parses `name=weight` pairs separated by commas, for example
    /// `single_hop_specific=0.6,multi_hop_specific=0.4`.
    pub fn parse(raw: &str) -> Result<Self, TestsetError> {
        let mut weights = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let (name, weight) = part.split_once('=').ok_or_else(|| {
                TestsetError::InvalidDistribution(format!("expected name=weight, got '{part}'"))
            })?;
            let kind = SynthesizerKind::parse(name.trim()).ok_or_else(|| {
                TestsetError::InvalidDistribution(format!("unknown synthesizer '{}'", name.trim()))
            })?;
            let weight: f64 = weight.trim().parse().map_err(|_| {
                TestsetError::InvalidDistribution(format!("weight '{}' is not a number", weight.trim()))
            })?;
            weights.push((kind, weight));
        }
        Self::new(weights)
    }

    pub fn weights(&self) -> &[(SynthesizerKind, f64)] {
        &self.weights
    }

    /// Splits `size` rows across the synthesizers with largest-remainder
    /// rounding, so the counts always add up to `size`. Ties go to the
    /// earlier entry.
    pub fn allocate(&self, size: usize) -> Vec<(SynthesizerKind, usize)> {
        let total: f64 = self.weights.iter().map(|(_, weight)| weight).sum();
        let quotas: Vec<f64> = self
            .weights
            .iter()
            .map(|(_, weight)| weight / total * size as f64)
            .collect();
        let mut counts: Vec<usize> = quotas.iter().map(|quota| quota.floor() as usize).collect();

        let mut by_remainder: Vec<usize> = (0..quotas.len()).collect();
        by_remainder.sort_by(|&left, &right| {
            let left_rest = quotas[left] - quotas[left].floor();
            let right_rest = quotas[right] - quotas[right].floor();
            right_rest.total_cmp(&left_rest)
        });

        let assigned: usize = counts.iter().sum();
        for index in by_remainder.into_iter().take(size.saturating_sub(assigned)) {
            counts[index] += 1;
        }

        self.weights
            .iter()
            .map(|(kind, _)| *kind)
            .zip(counts)
            .collect()
    }
}

pub struct TestsetGenerator {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl TestsetGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Runs every synthesizer of the distribution against the graph. The
    /// whole run is retried on rate limits; any other model error aborts it.
    pub async fn generate(
        &self,
        graph: Option<&KnowledgeGraph>,
        size: usize,
        distribution: Option<&QueryDistribution>,
    ) -> Result<Vec<TestsetRow>, TestsetError> {
        let graph = graph.ok_or(TestsetError::MissingGraph)?;
        if size == 0 {
            return Err(TestsetError::EmptyRequest);
        }

        let default_distribution = QueryDistribution::default();
        let distribution = distribution.unwrap_or(&default_distribution);
        let plan: Vec<(Box<dyn Synthesizer>, usize)> = distribution
            .allocate(size)
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(kind, count)| (kind.build(self.model.clone()), count))
            .collect();

        info!(
            size,
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            model = self.model.model_name(),
            "generating testset"
        );

        let plan = &plan;
        let outcome = self
            .retry
            .run(
                move || async move {
                    let mut rows = Vec::new();
                    for (synthesizer, count) in plan.iter() {
                        rows.extend(synthesizer.synthesize(graph, *count).await?);
                    }
                    Ok::<_, ModelError>(rows)
                },
                ModelError::is_rate_limit,
            )
            .await;

        match outcome {
            Ok(mut rows) => {
                rows.truncate(size);
                info!(requested = size, produced = rows.len(), "testset generated");
                Ok(rows)
            }
            Err(RetryError::Exhausted { attempts, .. }) => {
                Err(TestsetError::RateLimitExceeded { attempts })
            }
            Err(RetryError::Permanent(error)) => Err(TestsetError::Model(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Relationship, RelationshipKind};
    use crate::testing::FakeModel;
    use crate::{Chunk, ChunkType};
    use std::time::Duration;

    const REPLY: &str = r#"{"question": "What is the term?", "answer": "Two years."}"#;

    fn linked_graph() -> KnowledgeGraph {
        let chunks: Vec<Chunk> = (1..=3)
            .map(|chunk_id| Chunk {
                content: format!("Clause {chunk_id}: the term is two years."),
                source_file: "lease.pdf".to_string(),
                chunk_id,
                total_chunks: 3,
                chunk_type: ChunkType::SizeBased,
            })
            .collect();
        let mut graph = KnowledgeGraph::from_chunks(&chunks);
        let (a, b) = (graph.nodes[0].id, graph.nodes[1].id);
        graph.relationships.push(Relationship::new(
            a,
            b,
            RelationshipKind::SummarySimilarity { score: 0.9 },
        ));
        graph.relationships.push(Relationship::new(
            a,
            b,
            RelationshipKind::EntitiesOverlap {
                overlapped_entities: vec!["term".to_string()],
            },
        ));
        graph
    }

    fn generator(model: Arc<FakeModel>) -> TestsetGenerator {
        TestsetGenerator::new(model, RetryPolicy::new(2, Duration::ZERO))
    }

    #[test]
    fn default_distribution_is_half_quarter_quarter() {
        let counts: Vec<usize> = QueryDistribution::default()
            .allocate(8)
            .into_iter()
            .map(|(_, count)| count)
            .collect();
        assert_eq!(counts, vec![4, 2, 2]);
    }

    #[test]
    fn allocation_always_sums_to_size() {
        let distribution = QueryDistribution::default();
        for size in 0..25 {
            let total: usize = distribution.allocate(size).iter().map(|(_, count)| count).sum();
            assert_eq!(total, size);
        }
        let counts: Vec<usize> = distribution
            .allocate(10)
            .into_iter()
            .map(|(_, count)| count)
            .collect();
        assert_eq!(counts, vec![5, 3, 2]);
    }

    #[test]
    fn distribution_parsing_validates_names_and_weights() -> Result<(), TestsetError> {
        let parsed = QueryDistribution::parse("single_hop_specific=3, multi_hop_specific=1")?;
        assert_eq!(
            parsed.allocate(4),
            vec![
                (SynthesizerKind::SingleHopSpecific, 3),
                (SynthesizerKind::MultiHopSpecific, 1)
            ]
        );
        assert!(QueryDistribution::parse("bogus=1").is_err());
        assert!(QueryDistribution::parse("single_hop_specific=-1").is_err());
        assert!(QueryDistribution::parse("single_hop_specific=0").is_err());
        assert!(QueryDistribution::parse("").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn missing_graph_is_a_precondition_error() {
        let model = Arc::new(FakeModel::always(REPLY));
        let result = generator(model.clone()).generate(None, 5, None).await;
        assert!(matches!(result, Err(TestsetError::MissingGraph)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn rows_never_exceed_the_requested_size() -> Result<(), TestsetError> {
        let graph = linked_graph();
        let model = Arc::new(FakeModel::always(REPLY));

        let rows = generator(model).generate(Some(&graph), 6, None).await?;

        assert!(!rows.is_empty() && rows.len() <= 6);
        for row in &rows {
            assert!(!row.user_input.is_empty());
            assert!(!row.reference.is_empty());
            assert!(!row.reference_contexts.is_empty());
        }
        Ok(())
    }

    #[tokio::test]
    async fn sparse_graph_yields_fewer_rows_without_error() -> Result<(), TestsetError> {
        let graph = KnowledgeGraph::from_chunks(&[Chunk {
            content: "The deposit is refundable.".to_string(),
            source_file: "lease.pdf".to_string(),
            chunk_id: 1,
            total_chunks: 1,
            chunk_type: ChunkType::SizeBased,
        }]);
        let model = Arc::new(FakeModel::always(REPLY));

        let rows = generator(model).generate(Some(&graph), 4, None).await?;

        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|row| row.synthesizer_name == "single_hop_specific_query_synthesizer"));
        Ok(())
    }

    #[tokio::test]
    async fn persistent_rate_limit_fails_after_max_attempts() {
        let graph = linked_graph();
        let model = Arc::new(FakeModel::rate_limited());

        let result = generator(model.clone()).generate(Some(&graph), 4, None).await;

        assert!(matches!(
            result,
            Err(TestsetError::RateLimitExceeded { attempts: 2 })
        ));
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn other_model_errors_propagate_without_retry() {
        let graph = linked_graph();
        let model = Arc::new(FakeModel::new(|_| Err(ModelError::EmptyResponse)));

        let result = generator(model.clone()).generate(Some(&graph), 4, None).await;

        assert!(matches!(
            result,
            Err(TestsetError::Model(ModelError::EmptyResponse))
        ));
        assert_eq!(model.calls(), 1);
    }
}
