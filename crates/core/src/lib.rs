pub mod chat;
pub mod chunking;
pub mod config;
pub mod consolidate;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod housekeeping;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod vector_index;

pub use chat::{Chatter, FAILURE_ANSWER, NO_CONTEXT_ANSWER};
pub use chunking::{build_chunks, ChunkingConfig, RecursiveChunker, TextWindow};
pub use config::{EmbedderConfig, EmbedderKind, EngineConfig, GeneratorConfig};
pub use consolidate::{discover_indexes, Consolidator};
pub use context::RunContext;
pub use embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder};
pub use error::{ConfigError, EmbeddingError, GenerationError, IndexError, IngestError};
pub use extractor::{write_clean_text, DocumentSource, LopdfSource, PageText, TextCleaner};
pub use generation::{Generator, OpenAiGenerator};
pub use housekeeping::archive_file;
pub use models::{
    Chunk, DocumentFingerprint, EntryId, IndexEntry, IndexStrategy, SearchHit, SimilarityMetric,
    VectorPolicy,
};
pub use persistence::{IndexManifest, IndexedDocument, PersistedIndex};
pub use pipeline::{
    discover_pdf_files, DocumentFailure, DocumentReport, DocumentState, IndexingPipeline,
    PipelineOptions, PipelineReport,
};
pub use retriever::{Retriever, RetrieverOptions};
pub use store::{AppendOutcome, IndexStore};
pub use vector_index::FlatIndex;
