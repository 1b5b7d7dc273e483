use crate::config::ServiceConfig;
use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::extractor::{LopdfExtractor, TextExtractor};
use crate::graph::{GraphBuilder, KnowledgeGraph};
use crate::ingest::{DocumentIngestor, FolderIngestReport};
use crate::llm::OpenAiCompatibleModel;
use crate::orchestrator::AnswerOrchestrator;
use crate::stores::QdrantStore;
use crate::testset::{
    graph_file_name, list_testsets, testset_file_name, timestamp_now, write_csv,
    TestsetArtifact, TestsetGenerator, TestsetMetadata, TestsetOutcome, TestsetRequest, ALL_FILES,
};
use crate::traits::{LanguageModel, VectorStore};
use crate::{
    AnswerRequest, ChunkFilter, ClearOutcome, CollectionStats, GraphError, IngestError,
    IngestReport, InitError, QueryAnswer, QueryError, ServiceError, StoreError, TestsetError,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Everything a request needs, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    config: ServiceConfig,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    answer_model: Arc<dyn LanguageModel>,
    testset_model: Arc<dyn LanguageModel>,
}

impl AppContext {
    /// Validates the configuration, checks credentials and makes sure the
    /// vector store answers before anything is served.
    pub async fn initialize(config: ServiceConfig) -> Result<Self, InitError> {
        config.validate()?;

        let answer_key = config
            .llm_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| InitError::MissingCredentials("llm_api_key is not set".to_string()))?;
        let testset_key = config
            .testset_api_key()
            .map(str::to_string)
            .ok_or_else(|| InitError::MissingCredentials("testset_api_key is not set".to_string()))?;

        let timeout = Duration::from_secs(config.llm_timeout_secs);
        let answer_model = OpenAiCompatibleModel::new(
            &config.llm_base_url,
            config.llm_model.clone(),
            answer_key,
            config.temperature,
            timeout,
        )?;
        let testset_model = OpenAiCompatibleModel::new(
            config.testset_base_url(),
            config.testset_model_name().to_string(),
            testset_key,
            config.testset_temperature,
            timeout,
        )?;

        let store = QdrantStore::new(
            config.qdrant_url.clone(),
            config.collection_name.clone(),
            config.embedding_dimensions,
        );
        store.ensure_collection().await?;

        info!(
            collection = %config.collection_name,
            llm_model = %config.llm_model,
            testset_model = %config.testset_model_name(),
            "service initialized"
        );

        Ok(Self::from_parts(
            config.clone(),
            Arc::new(LopdfExtractor),
            Arc::new(CharacterNgramEmbedder {
                dimensions: config.embedding_dimensions,
            }),
            Arc::new(store),
            Arc::new(answer_model),
            Arc::new(testset_model),
        ))
    }

    pub fn from_parts(
        config: ServiceConfig,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        answer_model: Arc<dyn LanguageModel>,
        testset_model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            config,
            extractor,
            embedder,
            store,
            answer_model,
            testset_model,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn ingestor(&self) -> DocumentIngestor {
        DocumentIngestor::new(
            self.extractor.clone(),
            self.embedder.clone(),
            self.store.clone(),
            self.config.chunking(),
            self.config.min_text_chars,
        )
    }

    pub async fn ingest_pdf(&self, file_name: &str, bytes: &[u8]) -> Result<IngestReport, IngestError> {
        self.ingestor().ingest(file_name, bytes).await
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport, IngestError> {
        self.ingestor().ingest_path(path).await
    }

    pub async fn ingest_folder(&self, folder: &Path) -> FolderIngestReport {
        self.ingestor().ingest_folder(folder).await
    }

    pub async fn answer(&self, request: &AnswerRequest) -> Result<QueryAnswer, QueryError> {
        AnswerOrchestrator::new(
            self.store.clone(),
            self.answer_model.clone(),
            self.embedder.clone(),
        )
        .answer(request)
        .await
    }

    pub async fn stats(&self) -> Result<CollectionStats, StoreError> {
        let total_chunks = self.store.count().await?;
        let files = self.store.source_files().await?;
        Ok(CollectionStats {
            collection_name: self.store.collection_name().to_string(),
            total_chunks,
            unique_files: files.len(),
            files,
        })
    }

    pub async fn clear(&self) -> Result<ClearOutcome, StoreError> {
        let outcome = self.store.clear().await?;
        info!(collection = self.store.collection_name(), ?outcome, "collection cleared");
        Ok(outcome)
    }

    /// Pulls stored chunks, builds the knowledge graph, synthesizes rows and
    /// optionally writes both artifacts under the configured testset dir.
    pub async fn generate_testset(
        &self,
        request: &TestsetRequest,
    ) -> Result<TestsetOutcome, TestsetError> {
        let filter = ChunkFilter {
            source_file: request.source_file.clone(),
        };
        let chunks = self
            .store
            .fetch(&filter, self.config.max_testset_chunks)
            .await?;
        if chunks.is_empty() {
            return Err(match &request.source_file {
                Some(file) => TestsetError::NoDocumentsForFile(file.clone()),
                None => TestsetError::NoDocuments,
            });
        }

        let timestamp = timestamp_now();
        let retry = self.config.retry_policy();
        info!(
            chunks = chunks.len(),
            size = request.size,
            mode = ?request.mode,
            %timestamp,
            "starting testset run"
        );

        let build = GraphBuilder::new(self.testset_model.clone(), self.embedder.clone(), retry)
            .build(&chunks, request.mode)
            .await;
        let graph = build.graph();

        let output_dir = &self.config.testset_dir;
        let kg_path = if request.save_to_disk {
            let path = output_dir.join(graph_file_name(&timestamp));
            graph.save(&path)?;
            Some(path)
        } else {
            None
        };

        let rows = TestsetGenerator::new(self.testset_model.clone(), retry)
            .generate(Some(graph), request.size, request.distribution.as_ref())
            .await?;

        let testset_path = if request.save_to_disk {
            let path = output_dir.join(testset_file_name(&timestamp));
            write_csv(&rows, &path)?;
            Some(path)
        } else {
            None
        };

        let metadata = TestsetMetadata {
            collection_name: self.store.collection_name().to_string(),
            source_file: request
                .source_file
                .clone()
                .unwrap_or_else(|| ALL_FILES.to_string()),
            total_chunks: chunks.len(),
            testset_size: rows.len(),
            timestamp,
            kg_nodes: graph.nodes.len(),
            kg_relationships: graph.relationships.len(),
            graph_build: build.label().to_string(),
            degradation_reason: build.degradation_reason().map(str::to_string),
            kg_path,
            testset_path,
        };
        info!(
            rows = metadata.testset_size,
            kg_nodes = metadata.kg_nodes,
            kg_relationships = metadata.kg_relationships,
            graph_build = %metadata.graph_build,
            "testset run finished"
        );

        Ok(TestsetOutcome { rows, metadata })
    }

    pub fn list_testsets(&self) -> Result<Vec<TestsetArtifact>, TestsetError> {
        list_testsets(&self.config.testset_dir)
    }

    pub fn load_graph(&self, path: &Path) -> Result<KnowledgeGraph, GraphError> {
        KnowledgeGraph::load(path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Either a usable context or the reason startup failed. Requests against an
/// uninitialized service fail instead of touching half-built collaborators.
pub enum ServiceState {
    Ready(AppContext),
    Uninitialized { reason: String },
}

impl ServiceState {
    pub async fn start(config: ServiceConfig) -> Self {
        match AppContext::initialize(config).await {
            Ok(context) => ServiceState::Ready(context),
            Err(init_error) => {
                error!(error = %init_error, "initialization failed");
                ServiceState::Uninitialized {
                    reason: init_error.to_string(),
                }
            }
        }
    }

    pub fn context(&self) -> Result<&AppContext, ServiceError> {
        match self {
            ServiceState::Ready(context) => Ok(context),
            ServiceState::Uninitialized { reason } => {
                Err(ServiceError::NotInitialized(reason.clone()))
            }
        }
    }

    pub fn status(&self, collection: &str) -> ServiceStatus {
        match self {
            ServiceState::Ready(context) => ServiceStatus {
                status: "running",
                collection: context.config.collection_name.clone(),
                reason: None,
            },
            ServiceState::Uninitialized { reason } => ServiceStatus {
                status: "not_initialized",
                collection: collection.to_string(),
                reason: Some(reason.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EnrichmentMode;
    use crate::stores::InMemoryVectorStore;
    use crate::testing::FakeModel;
    use tempfile::{tempdir, TempDir};

    struct PlainTextExtractor;

    impl TextExtractor for PlainTextExtractor {
        fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    const SYNTH_REPLY: &str =
        r#"{"question": "How long is the notice period?", "answer": "Ninety days."}"#;

    fn testset_model() -> FakeModel {
        FakeModel::new(|prompt| {
            if prompt.contains("single JSON object") {
                Ok(SYNTH_REPLY.to_string())
            } else if prompt.contains("List the named entities") {
                Ok("Acme Corp\nGlobex".to_string())
            } else {
                Ok("Either party may terminate on ninety days notice.".to_string())
            }
        })
    }

    fn contract(title: &str) -> String {
        let mut text = format!("{title}\n\n");
        for clause in 1..=6 {
            text.push_str(&format!(
                "{clause}. TERMINATION\nEither party may terminate this Agreement upon ninety \
                 (90) days written notice to Acme Corp or Globex, subject to clause {clause}.\n\n"
            ));
        }
        text
    }

    fn context() -> Result<(AppContext, TempDir), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = ServiceConfig {
            retry_delay_secs: 0,
            testset_dir: dir.path().join("testsets"),
            ..ServiceConfig::default()
        };
        let embedder = CharacterNgramEmbedder::default();
        let context = AppContext::from_parts(
            config,
            Arc::new(PlainTextExtractor),
            Arc::new(embedder),
            Arc::new(InMemoryVectorStore::new("contract_rag_collection", embedder.dimensions)),
            Arc::new(FakeModel::always("The notice period is ninety days.")),
            Arc::new(testset_model()),
        );
        Ok((context, dir))
    }

    #[tokio::test]
    async fn ingest_then_answer() -> Result<(), Box<dyn std::error::Error>> {
        let (context, _dir) = context()?;
        let report = context
            .ingest_pdf("services.pdf", contract("SERVICES AGREEMENT").as_bytes())
            .await?;
        assert!(report.chunks_created >= 1);

        let answer = context
            .answer(&AnswerRequest::new("What is the termination notice period?", 3))
            .await?;
        assert!(!answer.answer.is_empty());
        assert!(answer.sources.len() <= 3);
        assert!(answer
            .sources
            .iter()
            .all(|source| (0.0..=1.0).contains(&source.similarity_score)));
        Ok(())
    }

    #[tokio::test]
    async fn stats_track_files_and_clear_empties_them() -> Result<(), Box<dyn std::error::Error>> {
        let (context, _dir) = context()?;
        context
            .ingest_pdf("b.pdf", contract("SUPPLY AGREEMENT").as_bytes())
            .await?;
        context
            .ingest_pdf("a.pdf", contract("LEASE AGREEMENT").as_bytes())
            .await?;

        let stats = context.stats().await?;
        assert_eq!(stats.collection_name, "contract_rag_collection");
        assert_eq!(stats.unique_files, 2);
        assert_eq!(stats.files, vec!["a.pdf", "b.pdf"]);
        assert!(stats.total_chunks >= 2);

        assert_eq!(context.clear().await?, ClearOutcome::Cleared);
        assert_eq!(context.clear().await?, ClearOutcome::AlreadyEmpty);
        assert_eq!(context.stats().await?.total_chunks, 0);
        Ok(())
    }

    #[tokio::test]
    async fn testset_run_writes_both_artifacts() -> Result<(), Box<dyn std::error::Error>> {
        let (context, _dir) = context()?;
        context
            .ingest_pdf("services.pdf", contract("SERVICES AGREEMENT").as_bytes())
            .await?;

        let request = TestsetRequest {
            size: 4,
            ..TestsetRequest::default()
        };
        let outcome = context.generate_testset(&request).await?;
        let metadata = &outcome.metadata;

        assert!(!outcome.rows.is_empty() && outcome.rows.len() <= 4);
        assert_eq!(metadata.testset_size, outcome.rows.len());
        assert_eq!(metadata.source_file, "all_files");
        assert_eq!(metadata.graph_build, "enriched");
        assert!(metadata.kg_relationships > 0);

        let kg_path = metadata.kg_path.clone().ok_or("graph path missing")?;
        let testset_path = metadata.testset_path.clone().ok_or("testset path missing")?;
        assert!(kg_path.ends_with(format!("knowledge_graph_{}.json", metadata.timestamp)));
        assert!(testset_path.ends_with(format!("testset_{}.csv", metadata.timestamp)));

        let reloaded = context.load_graph(&kg_path)?;
        assert_eq!(reloaded.nodes.len(), metadata.kg_nodes);
        assert_eq!(reloaded.relationships.len(), metadata.kg_relationships);

        let listed = context.list_testsets()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, testset_path);
        Ok(())
    }

    #[tokio::test]
    async fn testset_run_without_saving_or_enrichment() -> Result<(), Box<dyn std::error::Error>> {
        let (context, _dir) = context()?;
        context
            .ingest_pdf("services.pdf", contract("SERVICES AGREEMENT").as_bytes())
            .await?;

        let request = TestsetRequest {
            size: 2,
            save_to_disk: false,
            mode: EnrichmentMode::None,
            ..TestsetRequest::default()
        };
        let outcome = context.generate_testset(&request).await?;

        assert_eq!(outcome.metadata.graph_build, "plain");
        assert_eq!(outcome.metadata.kg_relationships, 0);
        assert!(outcome.metadata.kg_path.is_none());
        assert!(context.list_testsets()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn testset_needs_documents() -> Result<(), Box<dyn std::error::Error>> {
        let (context, _dir) = context()?;

        let unscoped = context.generate_testset(&TestsetRequest::default()).await;
        assert!(matches!(unscoped, Err(TestsetError::NoDocuments)));

        let scoped = context
            .generate_testset(&TestsetRequest {
                source_file: Some("missing.pdf".to_string()),
                ..TestsetRequest::default()
            })
            .await;
        let message = scoped.err().map(|error| error.to_string()).unwrap_or_default();
        assert_eq!(
            message,
            "No documents found for file 'missing.pdf'. Make sure the PDF is ingested first."
        );
        Ok(())
    }

    #[tokio::test]
    async fn uninitialized_service_rejects_requests() {
        let state = ServiceState::Uninitialized {
            reason: "vector store unreachable".to_string(),
        };

        let error = state.context().err().map(|error| error.to_string());
        assert_eq!(
            error.as_deref(),
            Some("System not initialized: vector store unreachable")
        );
        let status = state.status("contract_rag_collection");
        assert_eq!(status.status, "not_initialized");
        assert_eq!(status.reason.as_deref(), Some("vector store unreachable"));
    }

    #[tokio::test]
    async fn missing_api_key_fails_initialization() {
        let result = AppContext::initialize(ServiceConfig::default()).await;
        assert!(matches!(result, Err(InitError::MissingCredentials(_))));
    }
}
