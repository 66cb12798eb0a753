use crate::error::EmbeddingError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "mxbai-embed-large";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 200;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Maps text to fixed-length vectors. Implementations must be deterministic
/// for a given `identity()`.
pub trait Embedder {
    fn identity(&self) -> String;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn identity(&self) -> String {
        (**self).identity()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(texts)
    }
}

impl<T: Embedder + ?Sized> Embedder for &T {
    fn identity(&self) -> String {
        (**self).identity()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(texts)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn identity(&self) -> String {
        format!("ngram-{}", self.dimensions.max(1))
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[derive(Debug, Clone, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaErrorResponse {
    error: String,
}

pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    batch_size: usize,
}

impl OllamaEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            batch_size: batch_size.max(1),
        })
    }

    fn embed_with_retries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0;
        loop {
            match self.embed_once(texts) {
                Ok(vectors) => return Ok(vectors),
                Err(error @ EmbeddingError::Http(_)) if attempt + 1 < MAX_RETRIES => {
                    attempt += 1;
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    warn!(
                        attempt,
                        backoff_ms,
                        error = %error,
                        "ollama embedding request failed, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/api/embed", self.endpoint);
        debug!(url = %url, batch = texts.len(), "sending embedding request");

        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let details = serde_json::from_str::<OllamaErrorResponse>(&body)
                .map(|parsed| parsed.error)
                .unwrap_or(body);
            return Err(EmbeddingError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("{status}: {details}"),
            });
        }

        let payload: OllamaEmbedResponse = response.json()?;
        check_batch(texts.len(), payload.embeddings)
    }
}

impl Embedder for OllamaEmbedder {
    fn identity(&self) -> String {
        format!("ollama:{}", self.model)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        vectors.pop().ok_or(EmbeddingError::BatchSize {
            expected: 1,
            found: 0,
        })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_with_retries(batch)?);
        }
        Ok(vectors)
    }
}

pub(crate) fn check_batch(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::BatchSize {
            expected,
            found: vectors.len(),
        });
    }

    if let Some(first) = vectors.first() {
        let dimension = first.len();
        if let Some(odd) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(EmbeddingError::Dimension {
                expected: dimension,
                found: odd.len(),
            });
        }
    }

    Ok(vectors)
}
