use crate::error::IndexError;
use crate::models::{Chunk, EntryId, SimilarityMetric};
use crate::persistence::{load_index, save_index, IndexManifest, IndexedDocument, PersistedIndex};
use crate::vector_index::FlatIndex;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub created: bool,
    pub assigned: Vec<EntryId>,
    pub entry_count: usize,
}

/// Callers must serialize writes to the same path; there is no cross-process
/// locking here. Durability comes from the atomic save in `persistence`.
#[derive(Debug, Clone)]
pub struct IndexStore {
    metric: SimilarityMetric,
    embedder: String,
}

impl IndexStore {
    pub fn new(metric: SimilarityMetric, embedder: impl Into<String>) -> Self {
        Self {
            metric,
            embedder: embedder.into(),
        }
    }

    pub fn open(&self, path: &Path) -> Result<Option<PersistedIndex>, IndexError> {
        match load_index(path) {
            Ok(persisted) => Ok(Some(persisted)),
            Err(IndexError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub fn append_or_create(
        &self,
        path: &Path,
        new_entries: Vec<(Vec<f32>, Chunk)>,
    ) -> Result<AppendOutcome, IndexError> {
        self.append_document(path, new_entries, None)
    }

    pub fn append_document(
        &self,
        path: &Path,
        new_entries: Vec<(Vec<f32>, Chunk)>,
        document: Option<IndexedDocument>,
    ) -> Result<AppendOutcome, IndexError> {
        let (mut index, manifest, created) = match self.open(path)? {
            Some(PersistedIndex { index, manifest }) => {
                self.check_compatible(&index)?;
                info!(path = %path.display(), entries = index.len(), "appending to existing index");
                (index, manifest, false)
            }
            None => {
                info!(path = %path.display(), "creating new index");
                let index = FlatIndex::with_capacity(self.metric, new_entries.len())
                    .with_embedder(self.embedder.clone());
                (index, None, true)
            }
        };

        // Mutation happens only on the in-memory copy; disk changes on save.
        let assigned = index.insert_batch(new_entries)?;

        let mut manifest = manifest.unwrap_or_default();
        if let Some(document) = document {
            manifest.record(document);
        }
        save_index(path, &index, Some(&manifest))?;

        info!(
            path = %path.display(),
            added = assigned.len(),
            entries = index.len(),
            "index saved"
        );
        Ok(AppendOutcome {
            created,
            assigned,
            entry_count: index.len(),
        })
    }

    fn check_compatible(&self, index: &FlatIndex) -> Result<(), IndexError> {
        if index.metric() != self.metric {
            warn!(
                stored = ?index.metric(),
                configured = ?self.metric,
                "index keeps its stored metric, configured metric ignored"
            );
        }
        match index.embedder() {
            Some(existing) if existing != self.embedder => Err(IndexError::EmbedderMismatch {
                expected: existing.to_string(),
                found: self.embedder.clone(),
            }),
            _ => Ok(()),
        }
    }
}
