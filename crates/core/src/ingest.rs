use crate::chunking::{chunk_text, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::extractor::TextExtractor;
use crate::traits::VectorStore;
use crate::{IngestError, IngestReport};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if is_pdf_name(&entry.path().to_string_lossy()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn is_pdf_name(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Write path: extract, chunk, embed, then one batch write to the store.
/// Nothing reaches the store unless every earlier step succeeded.
pub struct DocumentIngestor {
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunking: ChunkingConfig,
    min_text_chars: usize,
}

impl DocumentIngestor {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chunking: ChunkingConfig,
        min_text_chars: usize,
    ) -> Self {
        Self {
            extractor,
            embedder,
            store,
            chunking,
            min_text_chars,
        }
    }

    pub async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<IngestReport, IngestError> {
        if !is_pdf_name(file_name) {
            return Err(IngestError::UnsupportedFile(file_name.to_string()));
        }

        let started = Instant::now();
        let text = self.extractor.extract(bytes)?;
        let text_length = text.trim().chars().count();
        if text_length < self.min_text_chars {
            return Err(IngestError::InsufficientContent {
                length: text_length,
                minimum: self.min_text_chars,
            });
        }

        let chunks = chunk_text(&text, file_name, self.chunking)?;
        let contents: Vec<&str> = chunks.iter().map(|chunk| chunk.content.as_str()).collect();
        let vectors = self.embedder.embed_batch(&contents);
        self.store.add(&chunks, &vectors).await?;

        let report = IngestReport {
            filename: file_name.to_string(),
            chunks_created: chunks.len(),
            text_length,
            elapsed: started.elapsed(),
            ingested_at: Utc::now(),
        };
        info!(
            file = %report.filename,
            chunks = report.chunks_created,
            text_length,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingested pdf"
        );
        Ok(report)
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport, IngestError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::UnsupportedFile(path.display().to_string()))?;
        let bytes = fs::read(path)?;
        self.ingest(file_name, &bytes).await
    }

    /// Ingests every PDF under `folder`. A failing file is recorded and
    /// skipped; the others still go in. Files are named by their path
    /// relative to `folder`, so equal names in different subfolders stay apart.
    pub async fn ingest_folder(&self, folder: &Path) -> FolderIngestReport {
        let mut report = FolderIngestReport::default();

        for path in discover_pdf_files(folder) {
            let outcome = match source_name(folder, &path) {
                Some(name) => match fs::read(&path) {
                    Ok(bytes) => self.ingest(&name, &bytes).await,
                    Err(error) => Err(error.into()),
                },
                None => Err(IngestError::UnsupportedFile(path.display().to_string())),
            };

            match outcome {
                Ok(ingested) => report.ingested.push(ingested),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping pdf");
                    report.skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// `a/msa.pdf` for `<folder>/a/msa.pdf`, with `/` separators on every platform.
fn source_name(folder: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(folder).ok()?;
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FolderIngestReport {
    pub ingested: Vec<IngestReport>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl FolderIngestReport {
    pub fn chunks_created(&self) -> usize {
        self.ingested.iter().map(|report| report.chunks_created).sum()
    }
}
