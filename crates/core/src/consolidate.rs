use crate::embeddings::{check_batch, Embedder};
use crate::error::IndexError;
use crate::models::{Chunk, SimilarityMetric, VectorPolicy};
use crate::persistence::{has_index_files, load_index};
use crate::vector_index::FlatIndex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_ARCHIVE_DIR: &str = "archive";

pub fn discover_indexes(root: &Path, archive_dir_name: &str) -> Vec<PathBuf> {
    let mut locations = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name == archive_dir_name || name.starts_with('.') {
            debug!(path = %entry.path().display(), "skipping reserved directory");
            continue;
        }

        if has_index_files(entry.path()) {
            locations.push(entry.path().to_path_buf());
        } else {
            warn!(path = %entry.path().display(), "directory has no index files");
        }
    }

    locations.sort_unstable();
    locations
}

pub struct Consolidator<'a> {
    embedder: &'a dyn Embedder,
    metric: SimilarityMetric,
    policy: VectorPolicy,
}

impl<'a> Consolidator<'a> {
    pub fn new(embedder: &'a dyn Embedder, metric: SimilarityMetric, policy: VectorPolicy) -> Self {
        Self {
            embedder,
            metric,
            policy,
        }
    }

    pub fn consolidate(&self, locations: &[PathBuf]) -> Result<FlatIndex, IndexError> {
        let root = common_root(locations);
        if locations.is_empty() {
            return Err(IndexError::NoIndexesFound(root));
        }

        let identity = self.embedder.identity();
        let mut members = Vec::new();
        for location in locations {
            match load_index(location) {
                Ok(persisted) => members.push((location, persisted.index)),
                Err(error) => {
                    warn!(path = %location.display(), error = %error, "skipping unloadable index")
                }
            }
        }
        if members.is_empty() {
            return Err(IndexError::NoIndexesFound(root));
        }

        let total = members.iter().map(|(_, index)| index.len()).sum();
        let mut merged = FlatIndex::with_capacity(self.metric, total).with_embedder(identity.clone());
        let mut seen = HashSet::with_capacity(total);
        let mut duplicates = 0usize;

        for (location, member) in members {
            let reuse = self.reuses_vectors(&member, &identity);
            if member.metric() != self.metric {
                warn!(
                    path = %location.display(),
                    stored = ?member.metric(),
                    configured = ?self.metric,
                    "index was built for another metric, ranking with the configured one"
                );
            }
            info!(
                path = %location.display(),
                entries = member.len(),
                reuse_vectors = reuse,
                "merging index"
            );

            let mut chunks: Vec<Chunk> = Vec::with_capacity(member.len());
            let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(member.len());
            for entry in member.into_entries() {
                if !seen.insert(entry.chunk.chunk_id.clone()) {
                    duplicates += 1;
                    continue;
                }
                if reuse {
                    vectors.push(entry.vector);
                }
                chunks.push(entry.chunk);
            }

            if !reuse && !chunks.is_empty() {
                let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
                vectors = check_batch(texts.len(), self.embedder.embed_batch(&texts)?)?;
            }

            merged.insert_batch(vectors.into_iter().zip(chunks).collect())?;
        }

        if duplicates > 0 {
            debug!(duplicates, "dropped chunks present in more than one index");
        }
        if merged.is_empty() {
            return Err(IndexError::EmptyIndex);
        }

        info!(entries = merged.len(), "consolidated index ready");
        Ok(merged)
    }

    /// Stored vectors are reused only when they are known to come from the
    /// active embedder. Unrecorded provenance counts as foreign.
    fn reuses_vectors(&self, member: &FlatIndex, identity: &str) -> bool {
        match self.policy {
            VectorPolicy::ReEmbed => false,
            VectorPolicy::Reuse => member.embedder() == Some(identity),
        }
    }
}

fn common_root(locations: &[PathBuf]) -> PathBuf {
    locations
        .first()
        .and_then(|location| location.parent())
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::EmbeddingError;
    use crate::store::IndexStore;
    use crate::vector_index::tests::chunk;
    use std::cell::Cell;
    use std::fs;
    use tempfile::tempdir;

    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: Cell<usize>,
    }

    impl Embedder for CountingEmbedder {
        fn identity(&self) -> String {
            self.inner.identity()
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.embed(text)
        }
    }

    fn counting() -> CountingEmbedder {
        CountingEmbedder {
            inner: CharacterNgramEmbedder { dimensions: 64 },
            calls: Cell::new(0),
        }
    }

    fn persist(root: &Path, name: &str, embedder: &dyn Embedder, texts: &[(&str, &str)]) {
        let store = IndexStore::new(SimilarityMetric::Cosine, embedder.identity());
        let entries = texts
            .iter()
            .map(|(id, text)| (embedder.embed(text).unwrap(), chunk(id, text)))
            .collect();
        store.append_or_create(&root.join(name), entries).unwrap();
    }

    #[test]
    fn discovery_skips_archive_hidden_and_incomplete_dirs() {
        let dir = tempdir().unwrap();
        let embedder = CharacterNgramEmbedder { dimensions: 64 };
        persist(dir.path(), "b_store", &embedder, &[("1", "one")]);
        persist(dir.path(), "a_store", &embedder, &[("2", "two")]);
        persist(dir.path(), "archive", &embedder, &[("3", "three")]);
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::create_dir(dir.path().join(".a_store.staging-x")).unwrap();
        fs::write(dir.path().join("loose.pdf"), b"%PDF").unwrap();

        let found = discover_indexes(dir.path(), DEFAULT_ARCHIVE_DIR);
        let names: Vec<_> = found
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a_store", "b_store"]);
    }

    #[test]
    fn empty_location_list_is_no_indexes_found() {
        let embedder = counting();
        let consolidator = Consolidator::new(&embedder, SimilarityMetric::Cosine, VectorPolicy::Reuse);
        assert!(matches!(
            consolidator.consolidate(&[]),
            Err(IndexError::NoIndexesFound(_))
        ));
    }

    #[test]
    fn unloadable_locations_only_is_no_indexes_found() {
        let dir = tempdir().unwrap();
        let embedder = counting();
        let consolidator = Consolidator::new(&embedder, SimilarityMetric::Cosine, VectorPolicy::Reuse);
        let result = consolidator.consolidate(&[dir.path().join("missing")]);
        assert!(matches!(result, Err(IndexError::NoIndexesFound(_))));
    }

    #[test]
    fn disjoint_indexes_merge_without_loss_or_duplicates() {
        let dir = tempdir().unwrap();
        let embedder = counting();
        persist(dir.path(), "first", &embedder, &[("a", "alpha pumps"), ("b", "beta valves")]);
        persist(dir.path(), "second", &embedder, &[("c", "gamma seals")]);
        embedder.calls.set(0);

        let locations = discover_indexes(dir.path(), DEFAULT_ARCHIVE_DIR);
        let consolidator = Consolidator::new(&embedder, SimilarityMetric::Cosine, VectorPolicy::Reuse);
        let merged = consolidator.consolidate(&locations).unwrap();

        let mut ids: Vec<_> = merged.entries().iter().map(|e| e.chunk.chunk_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(embedder.calls.get(), 0, "vectors from the same embedder are reused");
    }

    #[test]
    fn re_embed_policy_recomputes_every_vector() {
        let dir = tempdir().unwrap();
        let embedder = counting();
        persist(dir.path(), "first", &embedder, &[("a", "alpha"), ("b", "beta")]);
        embedder.calls.set(0);

        let locations = discover_indexes(dir.path(), DEFAULT_ARCHIVE_DIR);
        let consolidator = Consolidator::new(&embedder, SimilarityMetric::Cosine, VectorPolicy::ReEmbed);
        let merged = consolidator.consolidate(&locations).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(embedder.calls.get(), 2);
    }

    #[test]
    fn foreign_embedder_vectors_are_recomputed() {
        let dir = tempdir().unwrap();
        let foreign = CharacterNgramEmbedder { dimensions: 16 };
        persist(dir.path(), "old", &foreign, &[("a", "alpha")]);

        let embedder = counting();
        let locations = discover_indexes(dir.path(), DEFAULT_ARCHIVE_DIR);
        let consolidator = Consolidator::new(&embedder, SimilarityMetric::Cosine, VectorPolicy::Reuse);
        let merged = consolidator.consolidate(&locations).unwrap();

        assert_eq!(merged.dimension(), Some(64));
        assert_eq!(embedder.calls.get(), 1);
    }

    /// Drops the last vector of every batch.
    struct ShortBatchEmbedder(CharacterNgramEmbedder);

    impl Embedder for ShortBatchEmbedder {
        fn identity(&self) -> String {
            "short-batch".to_string()
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.0.embed(text)
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut vectors = texts
                .iter()
                .map(|text| self.0.embed(text))
                .collect::<Result<Vec<_>, _>>()?;
            vectors.pop();
            Ok(vectors)
        }
    }

    #[test]
    fn short_re_embed_batch_is_an_error_not_a_silent_loss() {
        let dir = tempdir().unwrap();
        persist(
            dir.path(),
            "old",
            &CharacterNgramEmbedder { dimensions: 16 },
            &[("a", "alpha"), ("b", "beta"), ("c", "gamma")],
        );

        let embedder = ShortBatchEmbedder(CharacterNgramEmbedder { dimensions: 16 });
        let locations = discover_indexes(dir.path(), DEFAULT_ARCHIVE_DIR);
        let consolidator = Consolidator::new(&embedder, SimilarityMetric::Cosine, VectorPolicy::Reuse);

        assert!(matches!(
            consolidator.consolidate(&locations),
            Err(IndexError::Embedding(EmbeddingError::BatchSize {
                expected: 3,
                found: 2
            }))
        ));
    }

    #[test]
    fn member_metric_does_not_override_configured_metric() {
        let dir = tempdir().unwrap();
        let embedder = counting();
        let store = IndexStore::new(SimilarityMetric::L2, embedder.identity());
        let entries = vec![(embedder.embed("alpha").unwrap(), chunk("a", "alpha"))];
        store.append_or_create(&dir.path().join("l2_store"), entries).unwrap();
        persist(dir.path(), "cosine_store", &embedder, &[("b", "beta")]);

        let locations = discover_indexes(dir.path(), DEFAULT_ARCHIVE_DIR);
        let consolidator = Consolidator::new(&embedder, SimilarityMetric::Cosine, VectorPolicy::Reuse);
        let merged = consolidator.consolidate(&locations).unwrap();

        assert_eq!(merged.metric(), SimilarityMetric::Cosine);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn consolidation_is_repeatable_and_read_only() {
        let dir = tempdir().unwrap();
        let embedder = counting();
        persist(dir.path(), "first", &embedder, &[("a", "alpha"), ("b", "beta")]);
        persist(dir.path(), "second", &embedder, &[("c", "gamma"), ("a", "alpha")]);
        let before = FlatIndex::load(&dir.path().join("first")).unwrap();

        let locations = discover_indexes(dir.path(), DEFAULT_ARCHIVE_DIR);
        let consolidator = Consolidator::new(&embedder, SimilarityMetric::Cosine, VectorPolicy::Reuse);
        let once = consolidator.consolidate(&locations).unwrap();
        let twice = consolidator.consolidate(&locations).unwrap();

        let chunks = |index: &FlatIndex| {
            let mut chunks: Vec<_> = index.entries().iter().map(|e| e.chunk.clone()).collect();
            chunks.sort_by(|l, r| l.chunk_id.cmp(&r.chunk_id));
            chunks
        };
        assert_eq!(chunks(&once), chunks(&twice));
        assert_eq!(once.len(), 3);
        assert_eq!(FlatIndex::load(&dir.path().join("first")).unwrap(), before);
    }
}
