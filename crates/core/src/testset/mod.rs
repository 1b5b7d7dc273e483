//! Synthetic question/answer testsets generated from a knowledge graph, and
//! the files they are persisted to.

pub mod generator;
pub mod synthesizers;

pub use generator::{QueryDistribution, TestsetGenerator};
pub use synthesizers::{Synthesizer, SynthesizerKind};

use crate::graph::EnrichmentMode;
use crate::TestsetError;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TESTSET_SIZE: usize = 10;
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// `source_file` reported when a run is not scoped to one file.
pub const ALL_FILES: &str = "all_files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsetRow {
    pub user_input: String,
    pub reference: String,
    pub reference_contexts: Vec<String>,
    pub synthesizer_name: String,
}

#[derive(Debug, Clone)]
pub struct TestsetRequest {
    pub size: usize,
    pub source_file: Option<String>,
    pub save_to_disk: bool,
    pub mode: EnrichmentMode,
    pub distribution: Option<QueryDistribution>,
}

impl Default for TestsetRequest {
    fn default() -> Self {
        Self {
            size: DEFAULT_TESTSET_SIZE,
            source_file: None,
            save_to_disk: true,
            mode: EnrichmentMode::Fast,
            distribution: None,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestsetMetadata {
    pub collection_name: String,
    pub source_file: String,
    pub total_chunks: usize,
    pub testset_size: usize,
    pub timestamp: String,
    pub kg_nodes: usize,
    pub kg_relationships: usize,
    /// `plain`, `enriched` or `degraded`.
    pub graph_build: String,
    pub degradation_reason: Option<String>,
    pub kg_path: Option<PathBuf>,
    pub testset_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsetOutcome {
    pub rows: Vec<TestsetRow>,
    pub metadata: TestsetMetadata,
}

/// A saved testset table found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsetArtifact {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn graph_file_name(timestamp: &str) -> String {
    format!("knowledge_graph_{timestamp}.json")
}

pub fn testset_file_name(timestamp: &str) -> String {
    format!("testset_{timestamp}.csv")
}

#[derive(Serialize)]
struct CsvRecord<'a> {
    user_input: &'a str,
    reference: &'a str,
    reference_contexts: String,
    synthesizer_name: &'a str,
}

/// Writes the rows as CSV; `reference_contexts` is stored as a JSON array.
/// The header is written even when there are no rows.
pub fn write_csv(rows: &[TestsetRow], path: &Path) -> Result<(), TestsetError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(["user_input", "reference", "reference_contexts", "synthesizer_name"])?;
    for row in rows {
        writer.serialize(CsvRecord {
            user_input: &row.user_input,
            reference: &row.reference,
            reference_contexts: serde_json::to_string(&row.reference_contexts)?,
            synthesizer_name: &row.synthesizer_name,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// `.csv` files directly inside `dir`, newest first. A missing directory is
/// an empty listing.
pub fn list_testsets(dir: &Path) -> Result<Vec<TestsetArtifact>, TestsetError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut artifacts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !is_csv || !path.is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        artifacts.push(TestsetArtifact {
            filename: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
            path,
        });
    }

    artifacts.sort_by(|left, right| {
        right
            .modified
            .cmp(&left.modified)
            .then_with(|| right.filename.cmp(&left.filename))
    });
    Ok(artifacts)
}
