use tracing::debug;

use super::{CharMap, Chunk, Chunker, ChunkingConfig, build_chunk};

/// Fixed-width chunking: a plain character window slid across the text with
/// stride `chunk_size - chunk_overlap`.
///
/// Fast and predictable, but cuts straight through words and sentences.
/// Windows whose trimmed text is shorter than `min_chunk_size` are dropped.
#[derive(Debug, Clone)]
pub struct FixedChunker {
    config: ChunkingConfig,
}

impl FixedChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }
}

impl Chunker for FixedChunker {
    fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let map = CharMap::new(text);
        let total = map.len();
        let stride = self.config.stride();

        let mut chunks = Vec::new();
        let mut chunk_index = 0;
        let mut start = 0;

        while start < total {
            let end = (start + self.config.chunk_size).min(total);
            let window = map.slice(text, start, end);

            if window.trim().chars().count() >= self.config.min_chunk_size {
                chunks.push(build_chunk(
                    window,
                    chunk_index,
                    document_id,
                    start,
                    end,
                    Vec::new(),
                ));
                chunk_index += 1;
            }

            start += stride;
        }

        debug!(
            document_id,
            chunks = chunks.len(),
            "fixed-width chunking complete"
        );
        chunks
    }
}
