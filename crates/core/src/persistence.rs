//! On-disk layout of a vector index.
//!
//! An index directory holds `index.json` (vectors and index parameters) and
//! `docstore.json` (chunks keyed by entry id). Both are required. An optional
//! `manifest.json` records which documents went into the index.
//!
//! Saves are staged in a hidden sibling directory and swapped in with
//! renames, so a reader never observes a half-written index. If a save is
//! interrupted between the two renames, the next load restores the previous
//! directory.

use crate::error::IndexError;
use crate::models::{Chunk, EntryId, IndexEntry, SimilarityMetric};
use crate::vector_index::FlatIndex;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const INDEX_FILE: &str = "index.json";
pub const DOCSTORE_FILE: &str = "docstore.json";
pub const MANIFEST_FILE: &str = "manifest.json";

const FORMAT_VERSION: u32 = 1;
const STAGING_MARKER: &str = "staging";
const PREVIOUS_MARKER: &str = "previous";

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    metric: SimilarityMetric,
    dimension: Option<usize>,
    next_id: u64,
    #[serde(default)]
    embedder: Option<String>,
    vectors: Vec<StoredVector>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredVector {
    id: EntryId,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DocstoreFile {
    records: Vec<StoredChunk>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredChunk {
    id: EntryId,
    chunk: Chunk,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub checksum: String,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub documents: Vec<IndexedDocument>,
}

impl IndexManifest {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            documents: Vec::new(),
        }
    }

    pub fn record(&mut self, document: IndexedDocument) {
        self.updated_at = document.indexed_at;
        self.documents.push(document);
    }
}

impl Default for IndexManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct PersistedIndex {
    pub index: FlatIndex,
    pub manifest: Option<IndexManifest>,
}

impl FlatIndex {
    pub fn save(&self, location: &Path) -> Result<(), IndexError> {
        save_index(location, self, None)
    }

    pub fn load(location: &Path) -> Result<FlatIndex, IndexError> {
        load_index(location).map(|persisted| persisted.index)
    }
}

pub fn has_index_files(location: &Path) -> bool {
    location.join(INDEX_FILE).is_file() && location.join(DOCSTORE_FILE).is_file()
}

pub fn load_index(location: &Path) -> Result<PersistedIndex, IndexError> {
    restore_interrupted_save(location)?;

    if !has_index_files(location) {
        return Err(IndexError::NotFound(location.to_path_buf()));
    }

    let index_file: IndexFile = read_json(&location.join(INDEX_FILE))?;
    if index_file.format_version > FORMAT_VERSION {
        return Err(corrupt(
            location,
            format!("unsupported format version {}", index_file.format_version),
        ));
    }

    let docstore: DocstoreFile = read_json(&location.join(DOCSTORE_FILE))?;
    if docstore.records.len() != index_file.vectors.len() {
        return Err(corrupt(
            location,
            format!(
                "{} vectors but {} docstore records",
                index_file.vectors.len(),
                docstore.records.len()
            ),
        ));
    }

    let mut chunks: HashMap<EntryId, Chunk> = docstore
        .records
        .into_iter()
        .map(|record| (record.id, record.chunk))
        .collect();

    let mut entries = Vec::with_capacity(index_file.vectors.len());
    let mut previous: Option<EntryId> = None;
    for stored in index_file.vectors {
        if previous.is_some_and(|id| id >= stored.id) || stored.id.0 >= index_file.next_id {
            return Err(corrupt(location, format!("entry id {} is out of order", stored.id)));
        }
        if index_file.dimension != Some(stored.vector.len()) {
            return Err(corrupt(
                location,
                format!("entry {} has dimension {}", stored.id, stored.vector.len()),
            ));
        }
        let chunk = chunks
            .remove(&stored.id)
            .ok_or_else(|| corrupt(location, format!("entry {} has no docstore record", stored.id)))?;

        previous = Some(stored.id);
        entries.push(IndexEntry {
            id: stored.id,
            vector: stored.vector,
            chunk,
        });
    }

    let manifest = read_manifest(location);
    let index = FlatIndex::from_parts(
        index_file.metric,
        index_file.dimension,
        index_file.next_id,
        index_file.embedder,
        entries,
    );

    debug!(path = %location.display(), entries = index.len(), "loaded index");
    Ok(PersistedIndex { index, manifest })
}

pub fn save_index(
    location: &Path,
    index: &FlatIndex,
    manifest: Option<&IndexManifest>,
) -> Result<(), IndexError> {
    let (parent, name) = split_location(location)?;
    fs::create_dir_all(&parent)?;
    sweep_leftovers(&parent, &name, location.exists());

    let staging = parent.join(format!(".{name}.{STAGING_MARKER}-{}", Uuid::new_v4()));
    fs::create_dir(&staging)?;

    if let Err(error) = write_index_files(&staging, index, manifest) {
        let _ = fs::remove_dir_all(&staging);
        return Err(error);
    }

    if location.exists() {
        let aside = parent.join(format!(".{name}.{PREVIOUS_MARKER}-{}", Uuid::new_v4()));
        fs::rename(location, &aside)?;
        if let Err(error) = fs::rename(&staging, location) {
            let _ = fs::rename(&aside, location);
            let _ = fs::remove_dir_all(&staging);
            return Err(error.into());
        }
        if let Err(error) = fs::remove_dir_all(&aside) {
            warn!(path = %aside.display(), error = %error, "could not remove replaced index");
        }
    } else if let Err(error) = fs::rename(&staging, location) {
        let _ = fs::remove_dir_all(&staging);
        return Err(error.into());
    }

    sync_dir(&parent);
    debug!(path = %location.display(), entries = index.len(), "saved index");
    Ok(())
}

fn write_index_files(
    staging: &Path,
    index: &FlatIndex,
    manifest: Option<&IndexManifest>,
) -> Result<(), IndexError> {
    let index_file = IndexFile {
        format_version: FORMAT_VERSION,
        metric: index.metric(),
        dimension: index.dimension(),
        next_id: index.next_id(),
        embedder: index.embedder().map(str::to_string),
        vectors: index
            .entries()
            .iter()
            .map(|entry| StoredVector {
                id: entry.id,
                vector: entry.vector.clone(),
            })
            .collect(),
    };
    let docstore = DocstoreFile {
        records: index
            .entries()
            .iter()
            .map(|entry| StoredChunk {
                id: entry.id,
                chunk: entry.chunk.clone(),
            })
            .collect(),
    };

    write_json(&staging.join(DOCSTORE_FILE), &docstore)?;
    write_json(&staging.join(INDEX_FILE), &index_file)?;
    if let Some(manifest) = manifest {
        write_json(&staging.join(MANIFEST_FILE), manifest)?;
    }
    Ok(())
}

fn read_manifest(location: &Path) -> Option<IndexManifest> {
    let path = location.join(MANIFEST_FILE);
    if !path.is_file() {
        return None;
    }
    match read_json::<IndexManifest>(&path) {
        Ok(manifest) => Some(manifest),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "ignoring unreadable index manifest");
            None
        }
    }
}

fn restore_interrupted_save(location: &Path) -> Result<(), IndexError> {
    if location.exists() {
        return Ok(());
    }
    let Ok((parent, name)) = split_location(location) else {
        return Ok(());
    };
    let Ok(listing) = fs::read_dir(&parent) else {
        return Ok(());
    };

    let prefix = format!(".{name}.{PREVIOUS_MARKER}-");
    let newest = listing
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|meta| meta.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified);

    if let Some((_, previous)) = newest {
        warn!(
            path = %location.display(),
            from = %previous.display(),
            "restoring index left behind by an interrupted save"
        );
        fs::rename(&previous, location)?;
    }
    Ok(())
}

fn sweep_leftovers(parent: &Path, name: &str, target_exists: bool) {
    let Ok(listing) = fs::read_dir(parent) else {
        return;
    };
    let staging = format!(".{name}.{STAGING_MARKER}-");
    let previous = format!(".{name}.{PREVIOUS_MARKER}-");

    for entry in listing.filter_map(|entry| entry.ok()) {
        let file_name = entry.file_name().to_string_lossy().to_string();
        // A previous copy is only garbage once the target is back in place.
        let stale = file_name.starts_with(&staging)
            || (target_exists && file_name.starts_with(&previous));
        if stale {
            if let Err(error) = fs::remove_dir_all(entry.path()) {
                warn!(path = %entry.path().display(), error = %error, "could not remove leftover");
            }
        }
    }
}

fn split_location(location: &Path) -> Result<(PathBuf, String), IndexError> {
    let name = location
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("index location has no directory name: {}", location.display()),
            ))
        })?;
    let parent = match location.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, IndexError> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|error| corrupt(path, error.to_string()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn sync_dir(path: &Path) {
    if let Ok(handle) = File::open(path) {
        let _ = handle.sync_all();
    }
}

fn corrupt(path: &Path, details: impl Into<String>) -> IndexError {
    IndexError::Corrupt {
        path: path.to_path_buf(),
        details: details.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::tests::chunk;
    use tempfile::tempdir;

    fn sample_index() -> FlatIndex {
        let mut index = FlatIndex::new(SimilarityMetric::Cosine).with_embedder("ngram-4");
        index
            .insert_batch(vec![
                (vec![0.1, 0.2, 0.3, 0.4], chunk("a", "alpha")),
                (vec![0.4, 0.3, 0.2, 0.1], chunk("b", "beta")),
                (vec![0.3, 0.3, 0.3, 0.3], chunk("c", "gamma")),
            ])
            .unwrap();
        index
    }

    #[test]
    fn save_then_load_round_trips_entries_and_search() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().join("vector_store");
        let index = sample_index();

        index.save(&location)?;
        let loaded = FlatIndex::load(&location)?;

        assert_eq!(loaded, index);
        let query = [0.2, 0.2, 0.3, 0.3];
        assert_eq!(loaded.search(&query, 3)?, index.search(&query, 3)?);
        Ok(())
    }

    #[test]
    fn missing_location_is_not_found() {
        let dir = tempdir().unwrap();
        let result = FlatIndex::load(&dir.path().join("absent"));
        assert!(matches!(result, Err(IndexError::NotFound(_))));
    }

    #[test]
    fn missing_docstore_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().join("vector_store");
        sample_index().save(&location)?;
        fs::remove_file(location.join(DOCSTORE_FILE))?;

        assert!(matches!(FlatIndex::load(&location), Err(IndexError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn garbage_index_file_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().join("vector_store");
        sample_index().save(&location)?;
        fs::write(location.join(INDEX_FILE), b"{not json")?;

        assert!(matches!(FlatIndex::load(&location), Err(IndexError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn manifest_is_optional() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().join("vector_store");
        let mut manifest = IndexManifest::new();
        manifest.record(IndexedDocument {
            document_id: "doc".to_string(),
            title: "doc.pdf".to_string(),
            source_path: "/tmp/doc.pdf".to_string(),
            checksum: "abc".to_string(),
            chunk_count: 3,
            indexed_at: Utc::now(),
        });
        save_index(&location, &sample_index(), Some(&manifest))?;

        let loaded = load_index(&location)?;
        assert_eq!(loaded.manifest.as_ref().map(|m| m.documents.len()), Some(1));

        fs::write(location.join(MANIFEST_FILE), b"oops")?;
        let loaded = load_index(&location)?;
        assert!(loaded.manifest.is_none());
        assert_eq!(loaded.index.len(), 3);
        Ok(())
    }

    #[test]
    fn overwrite_replaces_contents_and_leaves_no_siblings() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().join("vector_store");
        let mut index = sample_index();
        index.save(&location)?;

        index.insert_batch(vec![(vec![1.0, 0.0, 0.0, 0.0], chunk("d", "delta"))])?;
        index.save(&location)?;

        assert_eq!(FlatIndex::load(&location)?.len(), 4);
        let siblings: Vec<_> = fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(siblings, vec!["vector_store".to_string()]);
        Ok(())
    }

    #[test]
    fn interrupted_swap_restores_previous_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().join("vector_store");
        sample_index().save(&location)?;

        // Simulate a crash after the old directory was moved aside.
        let aside = dir.path().join(".vector_store.previous-crashed");
        fs::rename(&location, &aside)?;

        let restored = FlatIndex::load(&location)?;
        assert_eq!(restored.len(), 3);
        assert!(!aside.exists());
        Ok(())
    }
}
