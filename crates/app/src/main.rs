use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use contract_rag_core::testset::list_testsets;
use contract_rag_core::{
    AnswerRequest, ClearOutcome, EnrichmentMode, KnowledgeGraph, QueryDistribution, ServiceConfig,
    ServiceState, TestsetRequest,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "contract-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "COLLECTION_NAME", default_value = "contract_rag_collection")]
    collection: String,

    /// OpenAI-compatible base URL used for answers
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.groq.com/openai/v1")]
    llm_base_url: String,

    /// Model used for answers
    #[arg(long, env = "LLM_MODEL", default_value = "llama-3.3-70b-versatile")]
    llm_model: String,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Sampling temperature for answers
    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Chunks retrieved per question when `--k` is not given
    #[arg(long, env = "NUM_RESULTS", default_value_t = 5)]
    num_results: usize,

    /// Upper bound of characters per chunk
    #[arg(long, env = "CHUNK_MAX_CHARS", default_value_t = 800)]
    chunk_max_chars: usize,

    /// Model used for graph enrichment and question synthesis
    #[arg(long, env = "TESTSET_MODEL")]
    testset_model: Option<String>,

    #[arg(long, env = "TESTSET_BASE_URL")]
    testset_base_url: Option<String>,

    #[arg(long, env = "TESTSET_API_KEY", hide_env_values = true)]
    testset_api_key: Option<String>,

    /// Directory for knowledge graph snapshots and testset tables
    #[arg(long, env = "TESTSET_DIR", default_value = "testsets")]
    testset_dir: PathBuf,

    /// Chunks pulled from the store for one testset run
    #[arg(long, env = "MAX_TESTSET_CHUNKS", default_value_t = 100)]
    max_testset_chunks: usize,

    /// Attempts per rate-limited enrichment or generation run
    #[arg(long, env = "MAX_RETRIES", default_value_t = 2)]
    max_retries: usize,

    /// Seconds to wait between attempts
    #[arg(long, env = "RETRY_DELAY_SECS", default_value_t = 30)]
    retry_delay_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Report whether the service can start.
    Status,
    /// Ingest one PDF or every PDF under a folder.
    Ingest {
        #[arg(long)]
        path: PathBuf,
    },
    /// Ask a question answered from the stored contracts.
    Query {
        #[arg(long)]
        query: String,
        /// Number of chunks to retrieve.
        #[arg(long)]
        k: Option<usize>,
        /// Restrict retrieval to one ingested file.
        #[arg(long)]
        source_file: Option<String>,
    },
    /// Show chunk and file counts of the collection.
    Stats,
    /// Delete every stored chunk.
    Clear,
    /// Build a knowledge graph from stored chunks and synthesize a testset.
    GenerateTestset {
        #[arg(long, default_value_t = 10)]
        size: usize,
        #[arg(long)]
        source_file: Option<String>,
        #[arg(long, value_enum, default_value_t = ModeArg::Fast)]
        mode: ModeArg,
        /// Synthesizer weights, e.g. `single_hop_specific=0.5,multi_hop_abstract=0.5`.
        #[arg(long)]
        distribution: Option<String>,
        /// Keep the results in memory only.
        #[arg(long, default_value_t = false)]
        no_save: bool,
    },
    /// List saved testset tables, newest first.
    Testsets,
    /// Print node and relationship counts of a saved knowledge graph.
    InspectGraph {
        #[arg(long)]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    None,
    Fast,
    Full,
}

impl From<ModeArg> for EnrichmentMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::None => EnrichmentMode::None,
            ModeArg::Fast => EnrichmentMode::Fast,
            ModeArg::Full => EnrichmentMode::Full,
        }
    }
}

impl Cli {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            qdrant_url: self.qdrant_url.clone(),
            collection_name: self.collection.clone(),
            llm_base_url: self.llm_base_url.clone(),
            llm_model: self.llm_model.clone(),
            llm_api_key: self.llm_api_key.clone(),
            temperature: self.temperature,
            num_results: self.num_results,
            chunk_max_chars: self.chunk_max_chars,
            max_testset_chunks: self.max_testset_chunks,
            testset_model: self.testset_model.clone(),
            testset_base_url: self.testset_base_url.clone(),
            testset_api_key: self.testset_api_key.clone(),
            testset_dir: self.testset_dir.clone(),
            max_retries: self.max_retries,
            retry_delay_secs: self.retry_delay_secs,
            ..ServiceConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "contract-rag boot"
    );

    let config = cli.service_config();
    match cli.command {
        Command::Testsets => print!("{}", testsets_listing(&cli.testset_dir)?),
        Command::InspectGraph { path } => println!("{}", graph_summary(&path)?),
        command => run_service(config, &cli.collection, command).await?,
    }

    Ok(())
}

/// Commands that read or write the collection or call a model.
async fn run_service(config: ServiceConfig, collection: &str, command: Command) -> anyhow::Result<()> {
    let state = ServiceState::start(config).await;

    match command {
        Command::Status => {
            let status = state.status(collection);
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Ingest { path } => {
            let context = state.context()?;
            if path.is_dir() {
                let report = context.ingest_folder(&path).await;
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                }
                for ingested in &report.ingested {
                    println!(
                        "{}: {} chunks ({} characters)",
                        ingested.filename, ingested.chunks_created, ingested.text_length
                    );
                }
                println!(
                    "{} files ingested, {} skipped, {} chunks created",
                    report.ingested.len(),
                    report.skipped_files.len(),
                    report.chunks_created()
                );
            } else {
                let report = context.ingest_path(&path).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Command::Query {
            query,
            k,
            source_file,
        } => {
            let context = state.context()?;
            let request = AnswerRequest {
                query,
                k: k.unwrap_or(context.config().num_results),
                source_file,
            };
            let result = context.answer(&request).await?;

            println!("{}\n", result.answer);
            for source in &result.sources {
                println!(
                    "[{}] similarity={:.4} {} chunk {}/{}",
                    source.rank,
                    source.similarity_score,
                    source.source_file,
                    source.chunk_id,
                    source.total_chunks
                );
            }
        }
        Command::Stats => {
            let stats = state.context()?.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Clear => match state.context()?.clear().await? {
            ClearOutcome::Cleared => println!("collection cleared"),
            ClearOutcome::AlreadyEmpty => println!("collection already empty"),
        },
        Command::GenerateTestset {
            size,
            source_file,
            mode,
            distribution,
            no_save,
        } => {
            let context = state.context()?;
            let distribution = distribution
                .as_deref()
                .map(QueryDistribution::parse)
                .transpose()?;
            let request = TestsetRequest {
                size,
                source_file,
                save_to_disk: !no_save,
                mode: mode.into(),
                distribution,
            };

            let outcome = context.generate_testset(&request).await?;
            if let Some(reason) = &outcome.metadata.degradation_reason {
                warn!(%reason, "knowledge graph was not enriched");
            }
            for row in &outcome.rows {
                println!("[{}] {}", row.synthesizer_name, row.user_input);
            }
            println!("{}", serde_json::to_string_pretty(&outcome.metadata)?);
        }
        Command::Testsets | Command::InspectGraph { .. } => {
            anyhow::bail!("command runs without the service")
        }
    }

    Ok(())
}

/// Saved testset tables, newest first. Needs only the output directory.
fn testsets_listing(dir: &Path) -> anyhow::Result<String> {
    let artifacts = list_testsets(dir)?;
    if artifacts.is_empty() {
        return Ok(format!("no testsets in {}\n", dir.display()));
    }

    let mut listing = String::new();
    for artifact in artifacts {
        listing.push_str(&format!(
            "{}  {} bytes  {}\n",
            artifact.filename,
            artifact.size,
            artifact.modified.to_rfc3339()
        ));
    }
    Ok(listing)
}

fn graph_summary(path: &Path) -> anyhow::Result<String> {
    let graph = KnowledgeGraph::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok(format!(
        "nodes={} relationships={}",
        graph.nodes.len(),
        graph.relationships.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contract_rag_core::{Chunk, ChunkType};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn graph_summary_reads_a_snapshot_without_a_service() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("knowledge_graph_20250101_120000.json");
        let chunk = Chunk {
            content: "The Supplier shall deliver within ten days.".to_string(),
            source_file: "msa.pdf".to_string(),
            chunk_id: 1,
            total_chunks: 1,
            chunk_type: ChunkType::TitleBased,
        };
        KnowledgeGraph::from_chunks(&[chunk]).save(&path)?;

        assert_eq!(graph_summary(&path)?, "nodes=1 relationships=0");
        assert!(graph_summary(&dir.path().join("missing.json")).is_err());
        Ok(())
    }

    #[test]
    fn testsets_listing_reads_the_directory_only() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(testsets_listing(dir.path())?.starts_with("no testsets in"));

        fs::write(dir.path().join("testset_20250101_120000.csv"), "user_input\n")?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;
        let listing = testsets_listing(dir.path())?;
        assert!(listing.contains("testset_20250101_120000.csv"));
        assert!(!listing.contains("notes.txt"));
        Ok(())
    }

    #[test]
    fn local_commands_parse_without_service_settings() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from(["contract-rag", "inspect-graph", "--path", "graph.json"])?;
        assert!(matches!(cli.command, Command::InspectGraph { .. }));
        let cli = Cli::try_parse_from(["contract-rag", "testsets"])?;
        assert!(matches!(cli.command, Command::Testsets));
        Ok(())
    }
}
