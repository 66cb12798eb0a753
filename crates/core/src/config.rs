use crate::chunking::ChunkingConfig;
use crate::consolidate::DEFAULT_ARCHIVE_DIR;
use crate::embeddings::{
    CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL,
};
use crate::error::ConfigError;
use crate::generation::{OpenAiGenerator, DEFAULT_GENERATION_MODEL, DEFAULT_OPENAI_URL};
use crate::models::{IndexStrategy, SimilarityMetric, VectorPolicy};
use crate::pipeline::PipelineOptions;
use crate::retriever::RetrieverOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedderKind {
    #[default]
    Ollama,
    Ngram,
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "ngram" => Ok(Self::Ngram),
            other => Err(format!("unknown embedder: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    pub model: String,
    pub endpoint: String,
    pub batch_size: usize,
    /// Only used by the n-gram embedder.
    pub dimensions: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::default(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            endpoint: DEFAULT_OLLAMA_URL.to_string(),
            batch_size: 32,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OPENAI_URL.to_string(),
            model: DEFAULT_GENERATION_MODEL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub index_dir_name: String,
    pub archive_dir_name: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_line_chars: Option<usize>,
    pub metric: SimilarityMetric,
    pub strategy: IndexStrategy,
    pub vector_policy: VectorPolicy,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub embedder: EmbedderConfig,
    pub generator: GeneratorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("rag_project/data"),
            index_dir_name: "vector_store".to_string(),
            archive_dir_name: DEFAULT_ARCHIVE_DIR.to_string(),
            chunk_size: 1_000,
            chunk_overlap: 200,
            min_line_chars: None,
            metric: SimilarityMetric::Cosine,
            strategy: IndexStrategy::SingleConsolidatedIndex,
            vector_policy: VectorPolicy::Reuse,
            top_k: 5,
            max_context_chars: 2_048,
            embedder: EmbedderConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking()?;

        if self.index_dir_name == self.archive_dir_name {
            return Err(ConfigError::Invalid(format!(
                "index directory and archive directory are both named {}",
                self.archive_dir_name
            )));
        }
        for name in [&self.index_dir_name, &self.archive_dir_name] {
            if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
                return Err(ConfigError::Invalid(format!("bad directory name: {name:?}")));
            }
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be positive".to_string()));
        }
        if self.embedder.kind == EmbedderKind::Ollama {
            Url::parse(&self.embedder.endpoint)?;
        }
        Url::parse(&self.generator.endpoint)?;
        Ok(())
    }

    pub fn chunking(&self) -> Result<ChunkingConfig, ConfigError> {
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
            .map_err(|error| ConfigError::Invalid(error.to_string()))
    }

    pub fn build_embedder(&self) -> Result<Box<dyn Embedder>, ConfigError> {
        match self.embedder.kind {
            EmbedderKind::Ngram => Ok(Box::new(CharacterNgramEmbedder {
                dimensions: self.embedder.dimensions,
            })),
            EmbedderKind::Ollama => {
                let embedder = OllamaEmbedder::new(
                    &self.embedder.endpoint,
                    &self.embedder.model,
                    self.embedder.batch_size,
                )
                .map_err(|error| ConfigError::Invalid(error.to_string()))?;
                Ok(Box::new(embedder))
            }
        }
    }

    /// Fails when no API key is configured; callers treat that as fatal.
    pub fn build_generator(&self) -> Result<OpenAiGenerator, ConfigError> {
        let api_key = self
            .generator
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingCredentials("OPENAI_API_KEY is not set".to_string())
            })?;

        OpenAiGenerator::new(&self.generator.endpoint, &self.generator.model, api_key)
            .map_err(|error| ConfigError::Invalid(error.to_string()))
    }

    pub fn retriever_options(&self) -> RetrieverOptions {
        RetrieverOptions {
            archive_dir_name: self.archive_dir_name.clone(),
            metric: self.metric,
            vector_policy: self.vector_policy,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            data_dir: self.data_dir.clone(),
            index_dir_name: self.index_dir_name.clone(),
            archive_dir_name: self.archive_dir_name.clone(),
            strategy: self.strategy,
            metric: self.metric,
        }
    }
}
