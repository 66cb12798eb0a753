use crate::chunking::{build_chunks, RecursiveChunker};
use crate::context::RunContext;
use crate::embeddings::{check_batch, Embedder};
use crate::error::IngestError;
use crate::extractor::DocumentSource;
use crate::housekeeping::archive_file;
use crate::models::{Chunk, DocumentFingerprint, IndexStrategy, SimilarityMetric};
use crate::persistence::IndexedDocument;
use crate::store::IndexStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocumentState {
    Discovered,
    Extracted,
    Chunked,
    Embedded,
    Indexed,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFailure {
    Extraction(String),
    NoText,
    NoChunks,
    Indexing(String),
    Archive(String),
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraction(reason) => write!(f, "extraction failed: {reason}"),
            Self::NoText => f.write_str("no text found"),
            Self::NoChunks => f.write_str("text produced no chunks"),
            Self::Indexing(reason) => write!(f, "indexing failed: {reason}"),
            Self::Archive(reason) => write!(f, "archiving failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub state: DocumentState,
    pub chunk_count: usize,
    pub index_path: Option<PathBuf>,
    pub failure: Option<DocumentFailure>,
}

impl DocumentReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            state: DocumentState::Discovered,
            chunk_count: 0,
            index_path: None,
            failure: None,
        }
    }

    fn fail(mut self, failure: DocumentFailure) -> Self {
        warn!(path = %self.path.display(), state = ?self.state, reason = %failure, "document not indexed");
        self.failure = Some(failure);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub documents: Vec<DocumentReport>,
}

impl PipelineReport {
    pub fn archived(&self) -> usize {
        self.count(DocumentState::Archived)
    }

    pub fn indexed_chunks(&self) -> usize {
        self.documents
            .iter()
            .filter(|report| report.state >= DocumentState::Indexed)
            .map(|report| report.chunk_count)
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentReport> {
        self.documents.iter().filter(|report| report.failure.is_some())
    }

    fn count(&self, state: DocumentState) -> usize {
        self.documents
            .iter()
            .filter(|report| report.state == state)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub data_dir: PathBuf,
    pub index_dir_name: String,
    pub archive_dir_name: String,
    pub strategy: IndexStrategy,
    pub metric: SimilarityMetric,
}

/// Extract, chunk, embed, index and archive every PDF in a data directory.
///
/// With `IndexStrategy::SingleConsolidatedIndex` all documents write to one
/// path, so documents must be processed one at a time. Per-document indexes
/// have no shared writer and `process_document` may run in parallel.
pub struct IndexingPipeline<S: DocumentSource, E: Embedder> {
    source: S,
    embedder: E,
    chunker: RecursiveChunker,
    store: IndexStore,
    options: PipelineOptions,
}

impl<S: DocumentSource, E: Embedder> IndexingPipeline<S, E> {
    pub fn new(source: S, embedder: E, chunker: RecursiveChunker, options: PipelineOptions) -> Self {
        let store = IndexStore::new(options.metric, embedder.identity());
        Self {
            source,
            embedder,
            chunker,
            store,
            options,
        }
    }

    /// Fails only when the data directory itself cannot be read. Document
    /// failures are reported, never propagated.
    pub fn run(&self, context: &RunContext) -> Result<PipelineReport, IngestError> {
        let _entered = context.span.enter();
        let data_dir = &self.options.data_dir;

        if !data_dir.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "data directory not found: {}",
                data_dir.display()
            )));
        }

        let files = discover_pdf_files(data_dir)?;
        if files.is_empty() {
            warn!(path = %data_dir.display(), "no pdf files found");
            return Ok(PipelineReport::default());
        }

        info!(path = %data_dir.display(), documents = files.len(), "indexing run started");
        let documents = files
            .iter()
            .map(|path| self.process_document(path))
            .collect::<Vec<_>>();
        let report = PipelineReport { documents };

        info!(
            archived = report.archived(),
            failed = report.failures().count(),
            chunks = report.indexed_chunks(),
            "indexing run finished"
        );
        Ok(report)
    }

    pub fn process_document(&self, path: &Path) -> DocumentReport {
        let span = info_span!("document", path = %path.display());
        let _entered = span.enter();
        let mut report = DocumentReport::new(path);
        info!("processing document");

        let fingerprint = match build_document_fingerprint(path) {
            Ok(fingerprint) => fingerprint,
            Err(error) => return report.fail(DocumentFailure::Extraction(error.to_string())),
        };

        let pages = match self.source.extract(path) {
            Ok(pages) => pages,
            Err(error) => return report.fail(DocumentFailure::Extraction(error.to_string())),
        };
        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return report.fail(DocumentFailure::NoText);
        }
        report.state = DocumentState::Extracted;

        let mut chunks = Vec::new();
        let mut cursor = 0u64;
        for page in &pages {
            let (page_chunks, next_cursor) =
                build_chunks(&fingerprint, page.number, &page.text, &self.chunker, cursor);
            cursor = next_cursor;
            chunks.extend(page_chunks);
        }
        if chunks.is_empty() {
            return report.fail(DocumentFailure::NoChunks);
        }
        report.state = DocumentState::Chunked;
        report.chunk_count = chunks.len();

        let entries = match self.embed_chunks(chunks) {
            Ok(entries) => entries,
            Err(error) => return report.fail(DocumentFailure::Indexing(error.to_string())),
        };
        report.state = DocumentState::Embedded;

        let location = self.index_location(path);
        let document = IndexedDocument {
            document_id: fingerprint.document_id.clone(),
            title: fingerprint.document_title.clone(),
            source_path: fingerprint.source_path.clone(),
            checksum: fingerprint.checksum.clone(),
            chunk_count: report.chunk_count,
            indexed_at: Utc::now(),
        };
        if let Err(error) = self.store.append_document(&location, entries, Some(document)) {
            return report.fail(DocumentFailure::Indexing(error.to_string()));
        }
        report.state = DocumentState::Indexed;
        report.index_path = Some(location);

        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            return report.fail(DocumentFailure::Archive("path has no file name".to_string()));
        };
        let root = path.parent().unwrap_or(&self.options.data_dir);
        match archive_file(root, &self.options.archive_dir_name, filename) {
            Ok(_) => report.state = DocumentState::Archived,
            Err(error) => return report.fail(DocumentFailure::Archive(error.to_string())),
        }

        info!(chunks = report.chunk_count, "document indexed and archived");
        report
    }

    pub fn index_location(&self, document: &Path) -> PathBuf {
        match self.options.strategy {
            IndexStrategy::SingleConsolidatedIndex => {
                self.options.data_dir.join(&self.options.index_dir_name)
            }
            IndexStrategy::PerDocumentIndex => {
                let stem = document
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_else(|| "document".to_string());
                self.options
                    .data_dir
                    .join(format!("{}-index", sanitize_dir_name(&stem)))
            }
        }
    }

    fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<(Vec<f32>, Chunk)>, IngestError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = check_batch(texts.len(), self.embedder.embed_batch(&texts)?)?;
        Ok(vectors.into_iter().zip(chunks).collect())
    }
}

pub fn discover_pdf_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|error| IngestError::InvalidArgument(error.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn build_document_fingerprint(path: &Path) -> Result<DocumentFingerprint, IngestError> {
    let checksum = digest_file(path)?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    Ok(DocumentFingerprint {
        document_id: generate_document_id(name, &checksum),
        document_title: name.to_string(),
        source_path: path.to_string_lossy().to_string(),
        checksum,
    })
}

fn generate_document_id(name: &str, checksum: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(checksum.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn sanitize_dir_name(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('_').to_string()
}
