use crate::error::IndexError;
use crate::models::{Chunk, EntryId, IndexEntry, SearchHit, SimilarityMetric};
use std::cmp::Ordering;

/// Append-only exact nearest-neighbour index.
///
/// The first inserted vector fixes the dimension. Entries keep insertion
/// order, which is also the tie-break order for search.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    metric: SimilarityMetric,
    dimension: Option<usize>,
    next_id: u64,
    embedder: Option<String>,
    entries: Vec<IndexEntry>,
}

impl FlatIndex {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self {
            metric,
            dimension: None,
            next_id: 0,
            embedder: None,
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(metric: SimilarityMetric, capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            ..Self::new(metric)
        }
    }

    pub fn with_embedder(mut self, embedder: impl Into<String>) -> Self {
        self.embedder = Some(embedder.into());
        self
    }

    pub(crate) fn from_parts(
        metric: SimilarityMetric,
        dimension: Option<usize>,
        next_id: u64,
        embedder: Option<String>,
        entries: Vec<IndexEntry>,
    ) -> Self {
        Self {
            metric,
            dimension,
            next_id,
            embedder,
            entries,
        }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn embedder(&self) -> Option<&str> {
        self.embedder.as_deref()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<IndexEntry> {
        self.entries
    }

    pub fn insert_batch(
        &mut self,
        entries: Vec<(Vec<f32>, Chunk)>,
    ) -> Result<Vec<EntryId>, IndexError> {
        let mut dimension = self.dimension;
        for (vector, _) in &entries {
            match dimension {
                None => dimension = Some(vector.len()),
                Some(expected) if expected != vector.len() => {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        found: vector.len(),
                    });
                }
                Some(_) => {}
            }
        }

        self.dimension = dimension;
        self.entries.reserve(entries.len());

        let mut ids = Vec::with_capacity(entries.len());
        for (vector, chunk) in entries {
            let id = EntryId(self.next_id);
            self.next_id += 1;
            self.entries.push(IndexEntry { id, vector, chunk });
            ids.push(id);
        }

        Ok(ids)
    }

    /// Returns at most `k` hits, best first, earlier entries winning ties.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.entries.is_empty() {
            return Err(IndexError::EmptyIndex);
        }
        if let Some(expected) = self.dimension {
            if expected != query.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    found: query.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, self.score(query, &entry.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|left, right| self.rank(left.1, right.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| {
                let entry = &self.entries[position];
                SearchHit {
                    id: entry.id,
                    chunk: entry.chunk.clone(),
                    score,
                }
            })
            .collect())
    }

    fn score(&self, query: &[f32], vector: &[f32]) -> f32 {
        match self.metric {
            SimilarityMetric::Cosine => cosine_similarity(query, vector),
            SimilarityMetric::L2 => l2_distance(query, vector),
        }
    }

    fn rank(&self, left: f32, right: f32) -> Ordering {
        match self.metric {
            SimilarityMetric::Cosine => right.total_cmp(&left),
            SimilarityMetric::L2 => left.total_cmp(&right),
        }
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut left_norm = 0f32;
    let mut right_norm = 0f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub fn l2_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            source_path: "/tmp/doc.pdf".to_string(),
            title: "doc.pdf".to_string(),
            page_start: 1,
            page_end: 1,
            char_start: 0,
            char_end: text.chars().count(),
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    fn populated(metric: SimilarityMetric) -> FlatIndex {
        let mut index = FlatIndex::new(metric);
        index
            .insert_batch(vec![
                (vec![1.0, 0.0], chunk("a", "east")),
                (vec![0.0, 1.0], chunk("b", "north")),
                (vec![1.0, 0.0], chunk("c", "east again")),
                (vec![-1.0, 0.0], chunk("d", "west")),
            ])
            .unwrap();
        index
    }

    #[test]
    fn ids_are_sequential_and_never_reused() {
        let mut index = FlatIndex::new(SimilarityMetric::Cosine);
        let first = index.insert_batch(vec![(vec![1.0], chunk("a", "a"))]).unwrap();
        let second = index
            .insert_batch(vec![(vec![2.0], chunk("b", "b")), (vec![3.0], chunk("c", "c"))])
            .unwrap();
        assert_eq!(first, vec![EntryId(0)]);
        assert_eq!(second, vec![EntryId(1), EntryId(2)]);
    }

    #[test]
    fn dimension_mismatch_leaves_index_untouched() {
        let mut index = populated(SimilarityMetric::Cosine);
        let before = index.clone();

        let result = index.insert_batch(vec![
            (vec![0.5, 0.5], chunk("e", "ok")),
            (vec![0.5, 0.5, 0.5], chunk("f", "bad")),
        ]);

        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 2, found: 3 })
        ));
        assert_eq!(index, before);
    }

    #[test]
    fn mismatch_within_first_batch_is_rejected() {
        let mut index = FlatIndex::new(SimilarityMetric::Cosine);
        let result = index.insert_batch(vec![
            (vec![1.0, 0.0], chunk("a", "a")),
            (vec![1.0], chunk("b", "b")),
        ]);
        assert!(result.is_err());
        assert_eq!(index.dimension(), None);
        assert!(index.is_empty());
    }

    #[test]
    fn empty_index_refuses_search() {
        let index = FlatIndex::new(SimilarityMetric::Cosine);
        assert!(matches!(index.search(&[1.0], 3), Err(IndexError::EmptyIndex)));
    }

    #[test]
    fn cosine_search_orders_by_similarity_with_insertion_tiebreak() {
        let index = populated(SimilarityMetric::Cosine);
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<_> = hits.iter().map(|hit| hit.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_search_orders_by_ascending_distance() {
        let index = populated(SimilarityMetric::L2);
        let hits = index.search(&[-0.9, 0.0], 2).unwrap();
        assert_eq!(hits[0].chunk.chunk_id, "d");
        assert!(hits[0].score < hits[1].score);
    }

    #[test]
    fn search_never_exceeds_k_or_entry_count() {
        let index = populated(SimilarityMetric::Cosine);
        assert_eq!(index.search(&[0.0, 1.0], 2).unwrap().len(), 2);
        assert_eq!(index.search(&[0.0, 1.0], 50).unwrap().len(), 4);
        assert!(index.search(&[0.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn query_dimension_is_checked() {
        let index = populated(SimilarityMetric::Cosine);
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn zero_vectors_score_zero_cosine() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
