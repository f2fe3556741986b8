//! passim - boundary-aware text chunking and flat vector retrieval for
//! semantic search pipelines.
//!
//! passim splits raw document text into bounded, overlapping [`Chunk`]s
//! (fixed-width, sentence-aware, or paragraph/section-aware), indexes their
//! embedding vectors in a persistent exhaustive similarity index, and
//! answers queries with ranked chunks above a similarity floor. The
//! embedding model itself is a collaborator supplied by the caller through
//! the [`Embedder`] trait.
//!
//! # Quick start
//!
//! ```
//! use passim::{ChunkingConfig, Strategy, VectorIndex};
//!
//! let config = ChunkingConfig::new(200, 40, 20)?;
//! let chunker = Strategy::Sentence.build(config);
//!
//! let text = "Rust is a systems programming language. It achieves memory \
//!             safety without garbage collection. Ownership rules are \
//!             checked at compile time.";
//! let chunks = chunker.chunk(text, "rust-notes");
//! assert!(!chunks.is_empty());
//!
//! // Vectors come from an external embedder; any fixed dimension works.
//! let mut index = VectorIndex::new(4);
//! let records = chunks
//!     .into_iter()
//!     .map(|chunk| (vec![1.0, 0.0, 0.0, 0.0], chunk))
//!     .collect();
//! index.add(records)?;
//!
//! let results = index.search(&[1.0, 0.0, 0.0, 0.0], 5)?;
//! assert!((results[0].score - 1.0).abs() < 1e-4);
//! # Ok::<(), passim::Error>(())
//! ```

pub mod chunking;
pub mod error;
pub mod index;
pub mod retriever;

pub use chunking::{
    Chunk, Chunker, ChunkingConfig, FixedChunker, ParagraphChunker,
    SentenceChunker, Strategy,
};
pub use error::{Error, Result};
pub use index::{IndexStats, SearchResult, VectorIndex};
pub use retriever::{DEFAULT_MIN_SIMILARITY, Embedder, Retriever};
