use crate::consolidate::{discover_indexes, Consolidator};
use crate::context::RunContext;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::{Chunk, SearchHit, SimilarityMetric, VectorPolicy};
use crate::vector_index::FlatIndex;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    pub archive_dir_name: String,
    pub metric: SimilarityMetric,
    pub vector_policy: VectorPolicy,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            archive_dir_name: crate::consolidate::DEFAULT_ARCHIVE_DIR.to_string(),
            metric: SimilarityMetric::default(),
            vector_policy: VectorPolicy::default(),
        }
    }
}

/// Similarity search over every index under a storage root.
///
/// The collection is consolidated once, at construction. Documents indexed
/// afterwards are only visible to a new retriever.
pub struct Retriever<E: Embedder> {
    embedder: E,
    index: Option<FlatIndex>,
    context: RunContext,
}

impl<E: Embedder> Retriever<E> {
    pub fn open(root: &Path, embedder: E, options: &RetrieverOptions, context: RunContext) -> Self {
        let index = {
            let _entered = context.span.enter();
            let locations = discover_indexes(root, &options.archive_dir_name);
            info!(root = %root.display(), indexes = locations.len(), "discovered index collection");

            let consolidator = Consolidator::new(&embedder, options.metric, options.vector_policy);
            match consolidator.consolidate(&locations) {
                Ok(index) => Some(index),
                Err(error) if error.is_no_data() => {
                    info!(root = %root.display(), error = %error, "no indexed documents available");
                    None
                }
                Err(error) => {
                    warn!(root = %root.display(), error = %error, "failed to consolidate indexes");
                    None
                }
            }
        };

        Self {
            embedder,
            index,
            context,
        }
    }

    /// Wraps an index that is already in memory.
    pub fn from_index(index: FlatIndex, embedder: E, context: RunContext) -> Self {
        Self {
            embedder,
            index: Some(index),
            context,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.index.is_some()
    }

    pub fn entry_count(&self) -> usize {
        self.index.as_ref().map_or(0, FlatIndex::len)
    }

    pub fn retrieve(&self, query: &str, k: usize) -> Vec<Chunk> {
        self.retrieve_scored(query, k)
            .into_iter()
            .map(|hit| hit.chunk)
            .collect()
    }

    /// Never fails: every problem is logged and yields no hits.
    pub fn retrieve_scored(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let _entered = self.context.span.enter();

        let Some(index) = &self.index else {
            warn!("no consolidated index loaded, returning no results");
            return Vec::new();
        };
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let query_vector = match self.embedder.embed(query) {
            Ok(vector) => vector,
            Err(error) => {
                warn!(error = %error, "failed to embed query");
                return Vec::new();
            }
        };

        match index.search(&query_vector, k) {
            Ok(hits) => {
                info!(k, hits = hits.len(), "retrieved chunks");
                hits
            }
            Err(error @ IndexError::EmptyIndex) => {
                warn!(error = %error, "index is empty");
                Vec::new()
            }
            Err(error) => {
                warn!(error = %error, "similarity search failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::EmbeddingError;
    use crate::store::IndexStore;
    use crate::vector_index::tests::chunk;
    use tempfile::tempdir;

    fn embedder() -> CharacterNgramEmbedder {
        CharacterNgramEmbedder { dimensions: 128 }
    }

    fn persist(root: &Path, name: &str, texts: &[(&str, &str)]) {
        let embedder = embedder();
        let store = IndexStore::new(SimilarityMetric::Cosine, embedder.identity());
        let entries = texts
            .iter()
            .map(|(id, text)| (embedder.embed(text).unwrap(), chunk(id, text)))
            .collect();
        store.append_or_create(&root.join(name), entries).unwrap();
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn identity(&self) -> String {
            "ngram-128".to_string()
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::BackendResponse {
                backend: "test".to_string(),
                details: "offline".to_string(),
            })
        }
    }

    #[test]
    fn empty_collection_returns_nothing() {
        let dir = tempdir().unwrap();
        let retriever = Retriever::open(dir.path(), embedder(), &RetrieverOptions::default(), RunContext::detached());
        assert!(!retriever.is_ready());
        assert!(retriever.retrieve("anything", 5).is_empty());
    }

    #[test]
    fn exact_chunk_text_finds_that_chunk() {
        let dir = tempdir().unwrap();
        persist(
            dir.path(),
            "vector_store",
            &[
                ("c1", "The pump must be primed before starting the motor."),
                ("c2", "Relief valves open at 150 psi to protect the manifold."),
                ("c3", "Inspect hoses monthly for abrasion and leaks."),
            ],
        );

        let retriever = Retriever::open(dir.path(), embedder(), &RetrieverOptions::default(), RunContext::detached());
        let found = retriever.retrieve("Relief valves open at 150 psi to protect the manifold.", 1);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].chunk_id, "c2");
    }

    #[test]
    fn large_k_returns_every_chunk_across_indexes() {
        let dir = tempdir().unwrap();
        persist(dir.path(), "manual_a-index", &[("a1", "alpha one"), ("a2", "alpha two")]);
        persist(dir.path(), "manual_b-index", &[("b1", "beta one")]);

        let retriever = Retriever::open(dir.path(), embedder(), &RetrieverOptions::default(), RunContext::detached());
        let mut ids: Vec<_> = retriever
            .retrieve("one", 50)
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn query_embedding_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        persist(dir.path(), "vector_store", &[("a", "alpha")]);

        let retriever = Retriever::open(dir.path(), BrokenEmbedder, &RetrieverOptions::default(), RunContext::detached());
        assert!(retriever.is_ready());
        assert!(retriever.retrieve("alpha", 3).is_empty());
    }

    #[test]
    fn index_snapshot_is_fixed_at_construction() {
        let dir = tempdir().unwrap();
        persist(dir.path(), "vector_store", &[("a", "alpha")]);
        let retriever = Retriever::open(dir.path(), embedder(), &RetrieverOptions::default(), RunContext::detached());

        persist(dir.path(), "vector_store", &[("b", "beta")]);

        assert_eq!(retriever.entry_count(), 1);
        let fresh = Retriever::open(dir.path(), embedder(), &RetrieverOptions::default(), RunContext::detached());
        assert_eq!(fresh.entry_count(), 2);
    }
}
