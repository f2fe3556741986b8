//! Query-time composition of an external embedder with the vector index.

use tracing::{debug, info};

use crate::chunking::Chunk;
use crate::error::Result;
use crate::index::{SearchResult, VectorIndex};

/// Results scoring below this similarity floor are dropped by default.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;

/// Contract for the external embedding model, consumed as a black box.
///
/// Implementations must produce vectors of a fixed dimension matching the
/// index they feed. Failures surface as [`crate::Error::Embedding`].
pub trait Embedder {
    /// The fixed dimension of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed one piece of text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of chunks, one vector per chunk, same order.
    fn embed_batch(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        chunks.iter().map(|chunk| self.embed(&chunk.text)).collect()
    }
}

/// Answers "given a query string, return ranked chunks above a similarity
/// floor" by delegating vectorization to the embedder and ranking to the
/// index. Adds no failure modes of its own.
pub struct Retriever<E> {
    index: VectorIndex,
    embedder: E,
    min_similarity: f32,
}

impl<E: Embedder> Retriever<E> {
    pub fn new(index: VectorIndex, embedder: E) -> Self {
        Self {
            index,
            embedder,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    /// Replace the similarity floor below which results are dropped.
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Mutable access to the index, for ingestion and persistence.
    pub fn index_mut(&mut self) -> &mut VectorIndex {
        &mut self.index
    }

    /// Embed a batch of chunks and append them to the index. Returns the
    /// number of records added.
    pub fn index_chunks(&mut self, chunks: Vec<Chunk>) -> Result<usize> {
        let vectors = self.embedder.embed_batch(&chunks)?;
        let added = chunks.len();
        self.index
            .add(vectors.into_iter().zip(chunks).collect())?;
        Ok(added)
    }

    /// Retrieve the `top_k` most similar chunks for `query`, dropping any
    /// below the similarity floor. An empty result is logged, not an error;
    /// index and embedder failures propagate unchanged.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        debug!(top_k, "retrieving chunks for query");

        let query_vector = self.embedder.embed(query)?;
        let candidates = self.index.search(&query_vector, top_k)?;

        let candidate_count = candidates.len();
        let results: Vec<SearchResult> = candidates
            .into_iter()
            .filter(|r| r.score >= self.min_similarity)
            .collect();

        if results.is_empty() {
            info!(
                candidates = candidate_count,
                min_similarity = self.min_similarity,
                "no results above similarity floor"
            );
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::chunking::chunk_id;
    use crate::error::Error;

    /// Deterministic toy embedder: buckets chars by code point.
    struct CharGramEmbedder {
        dimension: usize,
    }

    impl Embedder for CharGramEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vector = vec![0.0; self.dimension];
            for c in text.chars().filter(|c| c.is_alphanumeric()) {
                vector[(c as usize) % self.dimension] += 1.0;
            }
            Ok(vector)
        }
    }

    /// Embedder that always fails, for propagation tests.
    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn dimension(&self) -> usize {
            4
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("model unavailable".into()))
        }
    }

    fn chunk(document_id: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id(document_id, index),
            document_id: document_id.to_string(),
            text: text.to_string(),
            start_char: 0,
            end_char: text.chars().count(),
            chunk_index: index,
            metadata: BTreeMap::new(),
        }
    }

    fn retriever_with_corpus() -> Retriever<CharGramEmbedder> {
        let embedder = CharGramEmbedder { dimension: 16 };
        let mut retriever =
            Retriever::new(VectorIndex::new(16), embedder)
                .with_min_similarity(0.0);
        retriever
            .index_chunks(vec![
                chunk("animals", 0, "aardvark albatross antelope"),
                chunk("animals", 1, "zebra zebu zorilla"),
                chunk("tools", 0, "mmmm nnnn oooo pppp"),
            ])
            .unwrap();
        retriever
    }

    #[test]
    fn retrieves_exact_match_first() {
        let retriever = retriever_with_corpus();
        let results = retriever
            .retrieve("aardvark albatross antelope", 3)
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk_id, "animals_chunk_0");
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn similarity_floor_filters_results() {
        let retriever = retriever_with_corpus();
        let unfiltered = retriever
            .retrieve("aardvark albatross antelope", 3)
            .unwrap();
        assert_eq!(unfiltered.len(), 3);

        let strict = Retriever {
            min_similarity: 0.99,
            ..retriever
        };
        let filtered = strict
            .retrieve("aardvark albatross antelope", 3)
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk_id, "animals_chunk_0");
    }

    #[test]
    fn empty_index_retrieval_is_empty_not_an_error() {
        let retriever = Retriever::new(
            VectorIndex::new(16),
            CharGramEmbedder { dimension: 16 },
        );
        let results = retriever.retrieve("anything", 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn embedder_failures_propagate_unchanged() {
        let mut retriever =
            Retriever::new(VectorIndex::new(4), BrokenEmbedder);

        let err = retriever
            .index_chunks(vec![chunk("doc", 0, "text")])
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));

        let err = retriever.retrieve("query", 3).unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn index_chunks_reports_count_and_uses_batch_order() {
        let mut retriever = Retriever::new(
            VectorIndex::new(16),
            CharGramEmbedder { dimension: 16 },
        );
        let added = retriever
            .index_chunks(vec![
                chunk("doc", 0, "first chunk"),
                chunk("doc", 1, "second chunk"),
            ])
            .unwrap();

        assert_eq!(added, 2);
        assert_eq!(retriever.index().stats().total_vectors, 2);
        assert!(retriever.index().get("doc_chunk_0").is_some());
        assert!(retriever.index().get("doc_chunk_1").is_some());
    }
}
