//! Splitting raw document text into bounded, overlapping chunks.
//!
//! Three interchangeable strategies share a common contract: given the full
//! text of a document and a [`ChunkingConfig`], produce an ordered sequence
//! of [`Chunk`]s with gapless indices and char-accurate source offsets.
//!
//! - [`Strategy::Fixed`] slides a plain character window, ignoring
//!   word and sentence boundaries.
//! - [`Strategy::Sentence`] accumulates whole sentences and rebuilds
//!   overlap from the trailing sentences of the previous chunk.
//! - [`Strategy::Paragraph`] accumulates whole paragraphs, tracks section
//!   headings, and delegates oversized paragraphs to the sentence strategy.
//!
//! All offsets are char offsets into the source text, so multi-byte input
//! (emoji, CJK, combining marks) never splits inside a code point.

mod fixed;
mod paragraph;
mod sentence;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub use fixed::FixedChunker;
pub use paragraph::ParagraphChunker;
pub use sentence::SentenceChunker;

/// A bounded, positioned span of a document's text: the unit of retrieval.
///
/// Chunks are immutable once emitted. `start_char` and `end_char` are char
/// offsets into the source text covering the region the chunk was cut from
/// (the stored `text` is trimmed, so its length may be slightly smaller than
/// the covered region).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within an index: `"{document_id}_chunk_{chunk_index}"`.
    pub chunk_id: String,
    pub document_id: String,
    /// Trimmed chunk text.
    pub text: String,
    /// Char offset of the chunk's region start in the source text.
    pub start_char: usize,
    /// Char offset one past the chunk's region end in the source text.
    pub end_char: usize,
    /// 0-based position within the document, gapless in emission order.
    pub chunk_index: usize,
    /// Base keys (`chunk_index`, `char_count`, `start_char`, `end_char`)
    /// plus strategy-specific keys such as `sentence_count` or `section`.
    pub metadata: BTreeMap<String, Value>,
}

/// Format a chunk id from its document id and position.
pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
    format!("{document_id}_chunk_{chunk_index}")
}

/// Sizing policy shared by all chunking strategies.
///
/// Validated at construction: `chunk_overlap` must be smaller than
/// `chunk_size` and `min_chunk_size` must not exceed it. Strategies never
/// re-validate, so an invalid combination can only fail here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in chars.
    pub chunk_size: usize,
    /// Overlap carried between consecutive chunks, in chars.
    pub chunk_overlap: usize,
    /// Chunks whose trimmed text is shorter than this are dropped.
    pub min_chunk_size: usize,
}

impl ChunkingConfig {
    pub fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        min_chunk_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than \
                 chunk_size ({chunk_size})"
            )));
        }
        if min_chunk_size > chunk_size {
            return Err(Error::Config(format!(
                "min_chunk_size ({min_chunk_size}) must not exceed \
                 chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        })
    }

    /// Window stride for fixed-width splitting. Always at least 1 because
    /// `chunk_overlap < chunk_size` holds by construction.
    pub(crate) fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 150,
            min_chunk_size: 100,
        }
    }
}

/// A chunking strategy: a pure, deterministic function from document text
/// to an ordered chunk sequence. Total over its input; text shorter than
/// the configured minimum yields an empty sequence, never an error.
pub trait Chunker {
    fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk>;
}

/// Names the three built-in strategies.
///
/// # Examples
///
/// ```
/// use passim::{ChunkingConfig, Strategy};
///
/// let config = ChunkingConfig::new(200, 40, 10).unwrap();
/// let chunker = Strategy::Fixed.build(config);
/// let chunks = chunker.chunk(&"word ".repeat(100), "doc-1");
/// assert!(!chunks.is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Fixed,
    Sentence,
    Paragraph,
}

impl Strategy {
    /// Registry of every strategy and its selector name.
    pub const ALL: [(&'static str, Strategy); 3] = [
        ("fixed", Strategy::Fixed),
        ("sentence", Strategy::Sentence),
        ("paragraph", Strategy::Paragraph),
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Fixed => "fixed",
            Strategy::Sentence => "sentence",
            Strategy::Paragraph => "paragraph",
        }
    }

    /// Construct the chunker this name selects.
    pub fn build(&self, config: ChunkingConfig) -> Box<dyn Chunker> {
        match self {
            Strategy::Fixed => Box::new(FixedChunker::new(config)),
            Strategy::Sentence => Box::new(SentenceChunker::new(config)),
            Strategy::Paragraph => Box::new(ParagraphChunker::new(config)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Strategy::ALL
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, strategy)| *strategy)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown chunking strategy: {s} (available: fixed, \
                     sentence, paragraph)"
                ))
            })
    }
}

/// Char-index to byte-index map for O(1) slicing by char offsets.
///
/// `byte_of[i]` is the byte offset of the i-th char; a final sentinel entry
/// equals `text.len()` so `slice(text, a, b)` works for `b == char count`.
pub(crate) struct CharMap {
    byte_of: Vec<usize>,
}

impl CharMap {
    pub(crate) fn new(text: &str) -> Self {
        let byte_of = text
            .char_indices()
            .map(|(byte_idx, _)| byte_idx)
            .chain(std::iter::once(text.len()))
            .collect();
        Self { byte_of }
    }

    /// Number of chars in the mapped text.
    pub(crate) fn len(&self) -> usize {
        self.byte_of.len() - 1
    }

    /// Slice `text` by char offsets `[start, end)`.
    pub(crate) fn slice<'a>(
        &self,
        text: &'a str,
        start: usize,
        end: usize,
    ) -> &'a str {
        &text[self.byte_of[start]..self.byte_of[end]]
    }
}

/// A sub-unit of text (sentence or paragraph) with its char offsets in the
/// source text. `text` is trimmed; `start`/`end` cover the untrimmed region.
#[derive(Debug, Clone)]
pub(crate) struct Span {
    pub(crate) text: String,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl Span {
    pub(crate) fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Stamp a chunk with its id and base metadata. Shared by all strategies.
pub(crate) fn build_chunk(
    text: &str,
    chunk_index: usize,
    document_id: &str,
    start_char: usize,
    end_char: usize,
    extra: Vec<(&'static str, Value)>,
) -> Chunk {
    let trimmed = text.trim();
    let mut metadata = BTreeMap::new();
    metadata.insert("chunk_index".to_string(), Value::from(chunk_index));
    metadata.insert(
        "char_count".to_string(),
        Value::from(trimmed.chars().count()),
    );
    metadata.insert("start_char".to_string(), Value::from(start_char));
    metadata.insert("end_char".to_string(), Value::from(end_char));
    for (key, value) in extra {
        metadata.insert(key.to_string(), value);
    }

    Chunk {
        chunk_id: chunk_id(document_id, chunk_index),
        document_id: document_id.to_string(),
        text: trimmed.to_string(),
        start_char,
        end_char,
        chunk_index,
        metadata,
    }
}
