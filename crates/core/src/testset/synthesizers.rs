use super::TestsetRow;
use crate::graph::{KnowledgeGraph, Node, RelationshipKind};
use crate::traits::LanguageModel;
use crate::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesizerKind {
    SingleHopSpecific,
    MultiHopAbstract,
    MultiHopSpecific,
}

impl SynthesizerKind {
    pub const ALL: [SynthesizerKind; 3] = [
        SynthesizerKind::SingleHopSpecific,
        SynthesizerKind::MultiHopAbstract,
        SynthesizerKind::MultiHopSpecific,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SynthesizerKind::SingleHopSpecific => "single_hop_specific_query_synthesizer",
            SynthesizerKind::MultiHopAbstract => "multi_hop_abstract_query_synthesizer",
            SynthesizerKind::MultiHopSpecific => "multi_hop_specific_query_synthesizer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            kind.name() == value || kind.name().trim_end_matches("_query_synthesizer") == value
        })
    }

    pub fn build(self, model: Arc<dyn LanguageModel>) -> Box<dyn Synthesizer> {
        match self {
            SynthesizerKind::SingleHopSpecific => Box::new(SingleHopSpecificSynthesizer { model }),
            SynthesizerKind::MultiHopAbstract => Box::new(MultiHopAbstractSynthesizer { model }),
            SynthesizerKind::MultiHopSpecific => Box::new(MultiHopSpecificSynthesizer { model }),
        }
    }
}

/// Produces up to `count` rows from the graph. Fewer rows are fine when the
/// graph lacks the structure the strategy needs.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn kind(&self) -> SynthesizerKind;

    async fn synthesize(
        &self,
        graph: &KnowledgeGraph,
        count: usize,
    ) -> Result<Vec<TestsetRow>, ModelError>;
}

#[derive(Debug, Deserialize)]
struct QuestionAnswer {
    question: String,
    answer: String,
}

const REPLY_FORMAT: &str = "Reply with a single JSON object of the form \
{\"question\": \"...\", \"answer\": \"...\"} and nothing else.";

/// Pulls the first `{ ... }` object out of a reply, tolerating code fences
/// and chatter around it.
fn parse_reply(reply: &str) -> Option<QuestionAnswer> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: QuestionAnswer = serde_json::from_str(&reply[start..=end]).ok()?;
    if parsed.question.trim().is_empty() || parsed.answer.trim().is_empty() {
        return None;
    }
    Some(parsed)
}

async fn ask(
    model: &dyn LanguageModel,
    kind: SynthesizerKind,
    prompt: String,
    contexts: Vec<String>,
) -> Result<Option<TestsetRow>, ModelError> {
    let reply = model.complete(&prompt).await?;
    let Some(parsed) = parse_reply(&reply) else {
        warn!(synthesizer = kind.name(), "skipping unparsable synthesizer reply");
        return Ok(None);
    };
    Ok(Some(TestsetRow {
        user_input: parsed.question.trim().to_string(),
        reference: parsed.answer.trim().to_string(),
        reference_contexts: contexts,
        synthesizer_name: kind.name().to_string(),
    }))
}

fn round_robin<'a, T>(items: &'a [T], count: usize) -> impl Iterator<Item = (usize, &'a T)> + 'a {
    let rounds = if items.is_empty() { 0 } else { count };
    items.iter().cycle().take(rounds).enumerate()
}

pub struct SingleHopSpecificSynthesizer {
    model: Arc<dyn LanguageModel>,
}

#[async_trait]
impl Synthesizer for SingleHopSpecificSynthesizer {
    fn kind(&self) -> SynthesizerKind {
        SynthesizerKind::SingleHopSpecific
    }

    async fn synthesize(
        &self,
        graph: &KnowledgeGraph,
        count: usize,
    ) -> Result<Vec<TestsetRow>, ModelError> {
        let mut nodes: Vec<&Node> = graph.nodes.iter().collect();
        nodes.sort_by_key(|node| node.properties.entities.is_empty());

        let mut rows = Vec::new();
        for (visit, node) in round_robin(&nodes, count) {
            let entities = &node.properties.entities;
            let focus = match entities.len() {
                0 => String::new(),
                len => format!(
                    "Focus the question on \"{}\".\n",
                    entities[(visit / nodes.len()) % len]
                ),
            };
            let prompt = format!(
                "You write evaluation questions for a contract question-answering system.\n\
                 Write one specific factual question that can be answered from the excerpt \
                 alone, and its correct answer taken from the excerpt.\n{focus}\n\
                 Excerpt:\n{}\n\n{REPLY_FORMAT}",
                node.properties.page_content
            );
            let contexts = vec![node.properties.page_content.clone()];
            if let Some(row) = ask(self.model.as_ref(), self.kind(), prompt, contexts).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

fn linked_pairs<'g>(
    graph: &'g KnowledgeGraph,
    wanted: fn(&RelationshipKind) -> bool,
) -> Vec<(&'g Node, &'g Node, &'g RelationshipKind)> {
    graph
        .relationships
        .iter()
        .filter(|relationship| wanted(&relationship.kind))
        .filter_map(|relationship| {
            Some((
                graph.node(relationship.source)?,
                graph.node(relationship.target)?,
                &relationship.kind,
            ))
        })
        .collect()
}

pub struct MultiHopAbstractSynthesizer {
    model: Arc<dyn LanguageModel>,
}

#[async_trait]
impl Synthesizer for MultiHopAbstractSynthesizer {
    fn kind(&self) -> SynthesizerKind {
        SynthesizerKind::MultiHopAbstract
    }

    async fn synthesize(
        &self,
        graph: &KnowledgeGraph,
        count: usize,
    ) -> Result<Vec<TestsetRow>, ModelError> {
        let pairs = linked_pairs(graph, |kind| {
            matches!(kind, RelationshipKind::SummarySimilarity { .. })
        });

        let mut rows = Vec::new();
        for (_, (left, right, _)) in round_robin(&pairs, count) {
            let prompt = format!(
                "You write evaluation questions for a contract question-answering system.\n\
                 Write one broad question about themes, obligations or risks that needs both \
                 excerpts to answer, and an answer that combines them.\n\n\
                 Excerpt 1:\n{}\n\nExcerpt 2:\n{}\n\n{REPLY_FORMAT}",
                left.best_text(),
                right.best_text()
            );
            let contexts = vec![
                left.properties.page_content.clone(),
                right.properties.page_content.clone(),
            ];
            if let Some(row) = ask(self.model.as_ref(), self.kind(), prompt, contexts).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

pub struct MultiHopSpecificSynthesizer {
    model: Arc<dyn LanguageModel>,
}

#[async_trait]
impl Synthesizer for MultiHopSpecificSynthesizer {
    fn kind(&self) -> SynthesizerKind {
        SynthesizerKind::MultiHopSpecific
    }

    async fn synthesize(
        &self,
        graph: &KnowledgeGraph,
        count: usize,
    ) -> Result<Vec<TestsetRow>, ModelError> {
        let pairs = linked_pairs(graph, |kind| {
            matches!(kind, RelationshipKind::EntitiesOverlap { .. })
        });

        let mut rows = Vec::new();
        for (_, (left, right, kind)) in round_robin(&pairs, count) {
            let shared = match kind {
                RelationshipKind::EntitiesOverlap {
                    overlapped_entities,
                } => overlapped_entities.join(", "),
                RelationshipKind::SummarySimilarity { .. } => String::new(),
            };
            let prompt = format!(
                "You write evaluation questions for a contract question-answering system.\n\
                 Both excerpts mention: {shared}.\n\
                 Write one specific question about these entities that can only be answered \
                 by combining facts from both excerpts, and its correct answer.\n\n\
                 Excerpt 1:\n{}\n\nExcerpt 2:\n{}\n\n{REPLY_FORMAT}",
                left.properties.page_content,
                right.properties.page_content
            );
            let contexts = vec![
                left.properties.page_content.clone(),
                right.properties.page_content.clone(),
            ];
            if let Some(row) = ask(self.model.as_ref(), self.kind(), prompt, contexts).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Relationship;
    use crate::testing::FakeModel;
    use crate::{Chunk, ChunkType};

    const GOOD_REPLY: &str =
        "```json\n{\"question\": \"Who pays shipping?\", \"answer\": \"The Buyer.\"}\n```";

    fn graph(count: u32) -> KnowledgeGraph {
        let chunks: Vec<Chunk> = (1..=count)
            .map(|chunk_id| Chunk {
                content: format!("Clause {chunk_id}: the Buyer pays shipping costs."),
                source_file: "sale.pdf".to_string(),
                chunk_id,
                total_chunks: count,
                chunk_type: ChunkType::SizeBased,
            })
            .collect();
        KnowledgeGraph::from_chunks(&chunks)
    }

    #[test]
    fn replies_are_parsed_through_fences_and_blank_fields_rejected() {
        let parsed = parse_reply(GOOD_REPLY).map(|qa| (qa.question, qa.answer));
        assert_eq!(
            parsed,
            Some(("Who pays shipping?".to_string(), "The Buyer.".to_string()))
        );
        assert!(parse_reply("no json here").is_none());
        assert!(parse_reply("{\"question\": \" \", \"answer\": \"x\"}").is_none());
    }

    #[test]
    fn kinds_parse_from_full_and_short_names() {
        assert_eq!(
            SynthesizerKind::parse("multi_hop_abstract_query_synthesizer"),
            Some(SynthesizerKind::MultiHopAbstract)
        );
        assert_eq!(
            SynthesizerKind::parse("single_hop_specific"),
            Some(SynthesizerKind::SingleHopSpecific)
        );
        assert_eq!(SynthesizerKind::parse("three_hop"), None);
    }

    #[tokio::test]
    async fn single_hop_cycles_nodes_and_prefers_entity_nodes() -> Result<(), ModelError> {
        let mut graph = graph(2);
        graph.nodes[1].properties.entities = vec!["Buyer".to_string()];
        let model = Arc::new(FakeModel::always(GOOD_REPLY));
        let synthesizer = SynthesizerKind::SingleHopSpecific.build(model.clone());

        let rows = synthesizer.synthesize(&graph, 3).await?;

        assert_eq!(rows.len(), 3);
        assert_eq!(model.calls(), 3);
        assert!(rows
            .iter()
            .all(|row| row.synthesizer_name == "single_hop_specific_query_synthesizer"));
        assert_eq!(rows[0].reference_contexts, vec![graph.nodes[1].properties.page_content.clone()]);
        assert!(model.prompts()[0].contains("Focus the question on \"Buyer\""));
        Ok(())
    }

    #[tokio::test]
    async fn multi_hop_needs_matching_relationships() -> Result<(), ModelError> {
        let mut graph = graph(3);
        let (a, b) = (graph.nodes[0].id, graph.nodes[2].id);
        graph.relationships.push(Relationship::new(
            a,
            b,
            RelationshipKind::EntitiesOverlap {
                overlapped_entities: vec!["buyer".to_string()],
            },
        ));
        let model = Arc::new(FakeModel::always(GOOD_REPLY));

        let abstract_rows = SynthesizerKind::MultiHopAbstract
            .build(model.clone())
            .synthesize(&graph, 2)
            .await?;
        let specific_rows = SynthesizerKind::MultiHopSpecific
            .build(model.clone())
            .synthesize(&graph, 2)
            .await?;

        assert!(abstract_rows.is_empty());
        assert_eq!(specific_rows.len(), 2);
        assert_eq!(specific_rows[0].reference_contexts.len(), 2);
        assert!(model.prompts()[0].contains("Both excerpts mention: buyer."));
        Ok(())
    }

    #[tokio::test]
    async fn unparsable_replies_are_skipped() -> Result<(), ModelError> {
        let model = Arc::new(FakeModel::always("I cannot help with that."));
        let rows = SynthesizerKind::SingleHopSpecific
            .build(model.clone())
            .synthesize(&graph(2), 2)
            .await?;

        assert!(rows.is_empty());
        assert_eq!(model.calls(), 2);
        Ok(())
    }
}
