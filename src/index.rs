//! Flat (exhaustive) inner-product similarity index over fixed-dimension
//! vectors, with chunk metadata tracking and binary persistence.
//!
//! Vectors are L2-normalized on insertion (on by default), so the inner
//! product of two stored vectors equals their cosine similarity. Search is
//! a brute-force scan of every row, parallelized with rayon; ordering is
//! fully deterministic, with score ties broken by ascending internal id.
//!
//! The borrow checker enforces the index's reader/writer discipline:
//! [`VectorIndex::add`], [`VectorIndex::clear`] and [`VectorIndex::load`]
//! take `&mut self`, while [`VectorIndex::search`], [`VectorIndex::save`]
//! and [`VectorIndex::stats`] take `&self`. Callers sharing an index across
//! threads wrap it in `std::sync::RwLock`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunking::Chunk;
use crate::error::{Error, Result};

/// Header size of the vector artifact: u32 row count + u32 dimension.
const VECTOR_HEADER_SIZE: usize = 8;

/// A ranked search hit. The score is derived per query, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Similarity in `[0, 1]`: the normalized inner product mapped through
    /// `(d + 1) / 2`.
    pub score: f32,
    pub document_id: String,
    pub chunk_id: String,
}

/// Snapshot of index counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub unique_documents: usize,
    pub metadata_count: usize,
}

/// Metadata bundle persisted next to the raw vector artifact.
#[derive(Serialize, Deserialize)]
struct IndexMetadata {
    chunks: BTreeMap<u64, Chunk>,
    chunk_ids: HashMap<String, u64>,
    next_id: u64,
    dimension: usize,
}

/// Append-only-by-batch flat similarity index.
///
/// Internal ids are dense, assigned sequentially from 0 and never reused,
/// so row `i` of the backing store always belongs to internal id `i`.
///
/// # Examples
///
/// ```
/// use passim::{Chunk, VectorIndex};
/// use std::collections::BTreeMap;
///
/// let chunk = Chunk {
///     chunk_id: "doc_chunk_0".into(),
///     document_id: "doc".into(),
///     text: "hello world".into(),
///     start_char: 0,
///     end_char: 11,
///     chunk_index: 0,
///     metadata: BTreeMap::new(),
/// };
///
/// let mut index = VectorIndex::new(3);
/// index.add(vec![(vec![1.0, 0.0, 0.0], chunk)]).unwrap();
///
/// let results = index.search(&[1.0, 0.0, 0.0], 5).unwrap();
/// assert_eq!(results[0].chunk_id, "doc_chunk_0");
/// assert!((results[0].score - 1.0).abs() < 1e-4);
/// ```
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    normalize: bool,
    /// Row-major backing store, `len == total_vectors * dimension`.
    vectors: Vec<f32>,
    chunks: BTreeMap<u64, Chunk>,
    chunk_ids: HashMap<String, u64>,
    next_id: u64,
}

impl VectorIndex {
    /// Create an empty index with L2 normalization enabled.
    pub fn new(dimension: usize) -> Self {
        Self::with_normalization(dimension, true)
    }

    /// Create an empty index, choosing whether vectors are L2-normalized.
    /// Without normalization, scores are raw inner products mapped through
    /// `(d + 1) / 2` and may fall outside `[0, 1]` for unnormalized input.
    pub fn with_normalization(dimension: usize, normalize: bool) -> Self {
        Self {
            dimension,
            normalize,
            vectors: Vec::new(),
            chunks: BTreeMap::new(),
            chunk_ids: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            return 0;
        }
        self.vectors.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Look up a chunk by its public id.
    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunk_ids
            .get(chunk_id)
            .and_then(|id| self.chunks.get(id))
    }

    /// Append a batch of `(vector, chunk)` records.
    ///
    /// Each record gets the next sequential internal id. An empty batch is
    /// a logged no-op; a vector of the wrong length fails with
    /// [`Error::Dimension`] before any record is applied.
    pub fn add(&mut self, records: Vec<(Vec<f32>, Chunk)>) -> Result<()> {
        if records.is_empty() {
            warn!("add called with an empty batch");
            return Ok(());
        }

        for (vector, _) in &records {
            if vector.len() != self.dimension {
                return Err(Error::Dimension {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        let added = records.len();
        for (mut vector, chunk) in records {
            if self.normalize {
                l2_normalize(&mut vector);
            }
            let id = self.next_id;
            self.next_id += 1;
            self.vectors.extend_from_slice(&vector);
            self.chunk_ids.insert(chunk.chunk_id.clone(), id);
            self.chunks.insert(id, chunk);
        }

        info!(added, total = self.len(), "added vectors to index");
        Ok(())
    }

    /// Exhaustively score every stored vector against `query` and return
    /// the `top_k` best hits, ranked by score descending with ties broken
    /// by ascending internal id.
    ///
    /// An empty index yields an empty result, not an error.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        if self.is_empty() {
            warn!("search on an empty index");
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::Dimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        if self.normalize {
            l2_normalize(&mut query);
        }

        let dimension = self.dimension;
        let mut scored: Vec<(f32, u64)> = (0..self.len())
            .into_par_iter()
            .map(|row| {
                let offset = row * dimension;
                let stored = &self.vectors[offset..offset + dimension];
                let dot: f32 =
                    stored.iter().zip(&query).map(|(a, b)| a * b).sum();
                (dot, row as u64)
            })
            .collect();

        scored.sort_unstable_by(|a, b| {
            b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
        });

        let top_k = top_k.min(self.len());
        let mut results = Vec::with_capacity(top_k);
        for &(dot, id) in scored.iter().take(top_k) {
            let Some(chunk) = self.chunks.get(&id) else {
                warn!(id, "no chunk metadata for internal id, skipping hit");
                continue;
            };
            results.push(SearchResult {
                score: ((dot + 1.0) / 2.0).clamp(0.0, 1.0),
                document_id: chunk.document_id.clone(),
                chunk_id: chunk.chunk_id.clone(),
                chunk: chunk.clone(),
            });
        }

        Ok(results)
    }

    /// Persist the index as two companion artifacts: `<base>.vec` holding
    /// the raw vector rows and `<base>.meta.json` holding the metadata
    /// bundle. Parent directories are created as needed.
    pub fn save(&self, base: &Path) -> Result<()> {
        if let Some(parent) = base.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut buf =
            Vec::with_capacity(VECTOR_HEADER_SIZE + self.vectors.len() * 4);
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        buf.extend_from_slice(bytemuck::cast_slice(&self.vectors));
        fs::write(vectors_path(base), &buf)?;

        let metadata = IndexMetadata {
            chunks: self.chunks.clone(),
            chunk_ids: self.chunk_ids.clone(),
            next_id: self.next_id,
            dimension: self.dimension,
        };
        fs::write(metadata_path(base), serde_json::to_vec(&metadata)?)?;

        info!(total = self.len(), base = %base.display(), "index saved");
        Ok(())
    }

    /// Restore the index from the two artifacts written by [`save`].
    ///
    /// Both artifacts must be present; a missing one is [`Error::NotFound`].
    /// A dimension differing from the configured one is logged as a warning
    /// and the stored vectors win.
    ///
    /// [`save`]: VectorIndex::save
    pub fn load(&mut self, base: &Path) -> Result<()> {
        let vectors_path = vectors_path(base);
        let metadata_path = metadata_path(base);
        if !vectors_path.exists() {
            return Err(Error::NotFound {
                kind: "vector store",
                path: vectors_path,
            });
        }
        if !metadata_path.exists() {
            return Err(Error::NotFound {
                kind: "index metadata",
                path: metadata_path,
            });
        }

        let bytes = fs::read(&vectors_path)?;
        if bytes.len() < VECTOR_HEADER_SIZE {
            return Err(Error::Corrupt(format!(
                "vector store truncated: {} bytes",
                bytes.len()
            )));
        }
        let mut header = [0u8; 4];
        header.copy_from_slice(&bytes[0..4]);
        let count = u32::from_le_bytes(header) as usize;
        header.copy_from_slice(&bytes[4..8]);
        let dimension = u32::from_le_bytes(header) as usize;

        let expected = VECTOR_HEADER_SIZE + count * dimension * 4;
        if bytes.len() != expected {
            return Err(Error::Corrupt(format!(
                "vector store length {} does not match header ({count} rows \
                 of dimension {dimension})",
                bytes.len()
            )));
        }
        let vectors: Vec<f32> =
            bytemuck::pod_collect_to_vec(&bytes[VECTOR_HEADER_SIZE..]);

        let metadata: IndexMetadata =
            serde_json::from_slice(&fs::read(&metadata_path)?)?;
        if metadata.dimension != self.dimension {
            warn!(
                configured = self.dimension,
                loaded = metadata.dimension,
                "dimension mismatch on load, stored vectors win"
            );
        }

        self.dimension = dimension;
        self.vectors = vectors;
        self.chunks = metadata.chunks;
        self.chunk_ids = metadata.chunk_ids;
        self.next_id = metadata.next_id;

        info!(total = self.len(), base = %base.display(), "index loaded");
        Ok(())
    }

    /// Discard all vectors and metadata and reset the id counter to 0.
    pub fn clear(&mut self) {
        self.vectors.clear();
        self.chunks.clear();
        self.chunk_ids.clear();
        self.next_id = 0;
        info!("index cleared");
    }

    pub fn stats(&self) -> IndexStats {
        let unique_documents = self
            .chunks
            .values()
            .map(|chunk| chunk.document_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        IndexStats {
            total_vectors: self.len(),
            dimension: self.dimension,
            unique_documents,
            metadata_count: self.chunks.len(),
        }
    }
}

/// Scale a vector to unit L2 norm. Zero vectors are left untouched.
fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn vectors_path(base: &Path) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".vec");
    path.into()
}

fn metadata_path(base: &Path) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".meta.json");
    path.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::chunk_id;

    fn chunk(document_id: &str, index: usize) -> Chunk {
        Chunk {
            chunk_id: chunk_id(document_id, index),
            document_id: document_id.to_string(),
            text: format!("chunk {index} of {document_id}"),
            start_char: index * 10,
            end_char: index * 10 + 10,
            chunk_index: index,
            metadata: BTreeMap::new(),
        }
    }

    fn small_index() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index
            .add(vec![
                (vec![1.0, 0.0, 0.0], chunk("a", 0)),
                (vec![0.0, 1.0, 0.0], chunk("a", 1)),
                (vec![0.8, 0.2, 0.0], chunk("b", 0)),
            ])
            .unwrap();
        index
    }

    #[test]
    fn self_match_scores_one_at_rank_zero() {
        let index = small_index();
        let results = index.search(&[1.0, 0.0, 0.0], 3).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk_id, "a_chunk_0");
        assert!((results[0].score - 1.0).abs() < 1e-4);
        for result in &results {
            assert!((0.0..=1.0).contains(&result.score));
        }
    }

    #[test]
    fn results_ranked_by_descending_score() {
        let index = small_index();
        let results = index.search(&[1.0, 0.0, 0.0], 3).unwrap();

        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // The near-parallel vector outranks the orthogonal one.
        assert_eq!(results[1].chunk_id, "b_chunk_0");
        assert_eq!(results[2].chunk_id, "a_chunk_1");
    }

    #[test]
    fn ties_break_by_ascending_internal_id() {
        let mut index = VectorIndex::new(2);
        index
            .add(vec![
                (vec![1.0, 0.0], chunk("first", 0)),
                (vec![2.0, 0.0], chunk("second", 0)),
            ])
            .unwrap();

        // Both normalize to the same unit vector, so scores tie exactly
        // and insertion order decides.
        let results = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].score, results[1].score);
        assert_eq!(results[0].chunk_id, "first_chunk_0");
        assert_eq!(results[1].chunk_id, "second_chunk_0");
    }

    #[test]
    fn top_k_is_clamped_to_record_count() {
        let index = small_index();
        let results = index.search(&[1.0, 0.0, 0.0], 50).unwrap();
        assert_eq!(results.len(), 3);

        let results = index.search(&[1.0, 0.0, 0.0], 0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn empty_index_search_returns_empty() {
        let index = VectorIndex::new(4);
        let results = index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn empty_batch_add_is_a_noop() {
        let mut index = VectorIndex::new(4);
        index.add(Vec::new()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.stats().total_vectors, 0);
    }

    #[test]
    fn wrong_dimension_is_rejected_before_mutation() {
        let mut index = VectorIndex::new(3);
        let err = index
            .add(vec![
                (vec![1.0, 0.0, 0.0], chunk("a", 0)),
                (vec![1.0, 0.0], chunk("a", 1)),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Dimension {
                expected: 3,
                actual: 2
            }
        ));
        assert!(index.is_empty(), "batch must not partially apply");

        let index = small_index();
        assert!(matches!(
            index.search(&[1.0, 0.0], 3),
            Err(Error::Dimension { .. })
        ));
    }

    #[test]
    fn get_resolves_public_chunk_ids() {
        let index = small_index();
        assert_eq!(index.get("b_chunk_0").unwrap().document_id, "b");
        assert!(index.get("missing_chunk_9").is_none());
    }

    #[test]
    fn stats_counts_documents_and_metadata() {
        let index = small_index();
        let stats = index.stats();
        assert_eq!(stats.total_vectors, 3);
        assert_eq!(stats.dimension, 3);
        assert_eq!(stats.unique_documents, 2);
        assert_eq!(stats.metadata_count, 3);
    }

    #[test]
    fn clear_resets_ids_to_zero() {
        let mut index = small_index();
        index.clear();
        assert_eq!(index.stats().total_vectors, 0);
        assert!(index.search(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());

        // The next add starts over at internal id 0, which rank 0 of an
        // exact search resolves to.
        index
            .add(vec![(vec![0.0, 0.0, 1.0], chunk("fresh", 0))])
            .unwrap();
        let results = index.search(&[0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(results[0].chunk_id, "fresh_chunk_0");
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn save_load_round_trip_preserves_search_results() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("store").join("main");

        let index = small_index();
        index.save(&base).unwrap();

        let mut restored = VectorIndex::new(3);
        restored.load(&base).unwrap();

        assert_eq!(restored.stats(), index.stats());
        let before = index.search(&[0.6, 0.4, 0.0], 3).unwrap();
        let after = restored.search(&[0.6, 0.4, 0.0], 3).unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.chunk_id, a.chunk_id);
            assert!((b.score - a.score).abs() < 1e-3);
        }
    }

    #[test]
    fn load_fails_when_either_artifact_is_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("main");

        let mut index = VectorIndex::new(3);
        assert!(matches!(
            index.load(&base),
            Err(Error::NotFound { kind: "vector store", .. })
        ));

        // Vector artifact alone is not enough.
        small_index().save(&base).unwrap();
        fs::remove_file(metadata_path(&base)).unwrap();
        assert!(matches!(
            index.load(&base),
            Err(Error::NotFound { kind: "index metadata", .. })
        ));
    }

    #[test]
    fn load_rejects_corrupt_vector_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("main");
        small_index().save(&base).unwrap();

        // Truncate the payload so it no longer matches the header.
        let bytes = fs::read(vectors_path(&base)).unwrap();
        fs::write(vectors_path(&base), &bytes[..bytes.len() - 4]).unwrap();

        let mut index = VectorIndex::new(3);
        assert!(matches!(index.load(&base), Err(Error::Corrupt(_))));
    }

    #[test]
    fn load_with_mismatched_dimension_keeps_stored_vectors() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("main");
        small_index().save(&base).unwrap();

        let mut index = VectorIndex::new(8);
        index.load(&base).unwrap();
        assert_eq!(index.dimension(), 3);
        assert_eq!(index.len(), 3);
        assert!(!index.search(&[1.0, 0.0, 0.0], 1).unwrap().is_empty());
    }

    #[test]
    fn ids_continue_after_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("main");
        small_index().save(&base).unwrap();

        let mut index = VectorIndex::new(3);
        index.load(&base).unwrap();
        index
            .add(vec![(vec![0.0, 0.0, 1.0], chunk("c", 0))])
            .unwrap();

        assert_eq!(index.len(), 4);
        let results = index.search(&[0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(results[0].chunk_id, "c_chunk_0");
    }

    #[test]
    fn unnormalized_index_keeps_raw_magnitudes() {
        let mut index = VectorIndex::with_normalization(2, false);
        index
            .add(vec![
                (vec![0.5, 0.0], chunk("a", 0)),
                (vec![1.0, 0.0], chunk("a", 1)),
            ])
            .unwrap();

        let results = index.search(&[1.0, 0.0], 2).unwrap();
        // Raw inner products 1.0 and 0.5 map to 1.0 and 0.75.
        assert_eq!(results[0].chunk_id, "a_chunk_1");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn chunk_metadata_survives_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("main");

        let mut rich = chunk("doc", 0);
        rich.metadata
            .insert("section".into(), serde_json::Value::from("Intro"));
        rich.metadata
            .insert("sentence_count".into(), serde_json::Value::from(4));

        let mut index = VectorIndex::new(2);
        index.add(vec![(vec![1.0, 1.0], rich.clone())]).unwrap();
        index.save(&base).unwrap();

        let mut restored = VectorIndex::new(2);
        restored.load(&base).unwrap();
        assert_eq!(restored.get("doc_chunk_0"), Some(&rich));
    }
}
