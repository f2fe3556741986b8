use serde_json::Value;
use tracing::debug;

use super::{CharMap, Chunk, Chunker, ChunkingConfig, Span, build_chunk};

/// Last words that end in terminal punctuation without ending a sentence:
/// titles, academic degrees, and common citation markers. Compared against
/// the lowercased last word with trailing punctuation stripped.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "rev", "gen", "sen", "rep", "st", "jr",
    "sr", "inc", "ltd", "corp", "co", "dept", "univ", "etc", "vs", "approx",
    "e.g", "i.e", "cf", "al", "ph.d", "m.d", "b.a", "m.a", "b.s", "m.s",
];

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

/// True when `sentence` really ends here, i.e. its last word is not a known
/// abbreviation.
fn is_real_sentence_end(sentence: &str) -> bool {
    let Some(last_word) = sentence.split_whitespace().next_back() else {
        return true;
    };
    let stripped = last_word.trim_end_matches(is_terminal).to_lowercase();
    !ABBREVIATIONS.contains(&stripped.as_str())
}

/// Split text into sentences with their char offsets.
///
/// A sentence boundary is a run of terminal punctuation followed by
/// whitespace (or the end of the text), unless the preceding word is a
/// known abbreviation. Each span's `end` sits after the trailing
/// whitespace, so consecutive spans tile the text.
pub(crate) fn split_sentences(text: &str, map: &CharMap) -> Vec<Span> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut spans = Vec::new();
    let mut sentence_start = 0;
    let mut i = 0;

    while i < total {
        if !is_terminal(chars[i]) {
            i += 1;
            continue;
        }

        // Extend over the punctuation run, then any trailing whitespace.
        let mut punct_end = i + 1;
        while punct_end < total && is_terminal(chars[punct_end]) {
            punct_end += 1;
        }
        let mut ws_end = punct_end;
        while ws_end < total && chars[ws_end].is_whitespace() {
            ws_end += 1;
        }

        let at_text_end = punct_end == total;
        if ws_end == punct_end && !at_text_end {
            // Punctuation embedded in a token, e.g. "3.14" or "v1.2".
            i = punct_end;
            continue;
        }

        let candidate = map.slice(text, sentence_start, ws_end);
        if is_real_sentence_end(candidate) {
            let trimmed = candidate.trim();
            if !trimmed.is_empty() {
                spans.push(Span {
                    text: trimmed.to_string(),
                    start: sentence_start,
                    end: ws_end,
                });
            }
            sentence_start = ws_end;
        }
        i = ws_end;
    }

    if sentence_start < total {
        let remainder = map.slice(text, sentence_start, total);
        let trimmed = remainder.trim();
        if !trimmed.is_empty() {
            spans.push(Span {
                text: trimmed.to_string(),
                start: sentence_start,
                end: total,
            });
        }
    }

    spans
}

/// Sentence-aware chunking.
///
/// Sentences are accumulated until the next one would push the chunk past
/// `chunk_size`. The chunk is then closed and the next one is seeded with
/// as many trailing sentences of the closed chunk as fit inside
/// `chunk_overlap` (at most the last three), so overlap is rebuilt from
/// whole sentences rather than re-sliced characters. A single sentence
/// longer than `chunk_size` falls back to fixed-width splitting and its
/// pieces are tagged `is_long_sentence`.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    config: ChunkingConfig,
}

/// Number of trailing sentences considered when rebuilding overlap.
const OVERLAP_TAIL: usize = 3;

impl SentenceChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Fixed-width split for one sentence that exceeds `chunk_size` on its
    /// own. Offsets are translated back into the source text's coordinates.
    fn split_long_sentence(
        &self,
        sentence: &Span,
        document_id: &str,
        chunk_index: &mut usize,
        chunks: &mut Vec<Chunk>,
    ) {
        let map = CharMap::new(&sentence.text);
        let total = map.len();
        let stride = self.config.stride();

        let mut sub_start = 0;
        while sub_start < total {
            let sub_end = (sub_start + self.config.chunk_size).min(total);
            let piece = map.slice(&sentence.text, sub_start, sub_end);

            if piece.trim().chars().count() >= self.config.min_chunk_size {
                chunks.push(build_chunk(
                    piece,
                    *chunk_index,
                    document_id,
                    sentence.start + sub_start,
                    sentence.start + sub_end,
                    vec![("is_long_sentence", Value::Bool(true))],
                ));
                *chunk_index += 1;
            }

            sub_start += stride;
        }
    }
}

fn join_sentences(sentences: &[Span]) -> String {
    sentences
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let map = CharMap::new(text);
        let sentences = split_sentences(text, &map);

        let mut chunks = Vec::new();
        let mut chunk_index = 0;
        let mut current: Vec<Span> = Vec::new();
        let mut current_len = 0;
        let mut current_start = 0;

        for sentence in sentences {
            let sentence_len = sentence.char_len();

            if sentence_len > self.config.chunk_size {
                // Close whatever accumulated before the oversized sentence.
                if !current.is_empty() {
                    chunks.push(build_chunk(
                        &join_sentences(&current),
                        chunk_index,
                        document_id,
                        current_start,
                        sentence.start,
                        vec![("sentence_count", Value::from(current.len()))],
                    ));
                    chunk_index += 1;
                    current.clear();
                    current_len = 0;
                }

                self.split_long_sentence(
                    &sentence,
                    document_id,
                    &mut chunk_index,
                    &mut chunks,
                );
                current_start = sentence.end;
                continue;
            }

            if current_len + sentence_len > self.config.chunk_size
                && !current.is_empty()
            {
                let chunk_end = current[current.len() - 1].end;
                chunks.push(build_chunk(
                    &join_sentences(&current),
                    chunk_index,
                    document_id,
                    current_start,
                    chunk_end,
                    vec![("sentence_count", Value::from(current.len()))],
                ));
                chunk_index += 1;

                // Seed the next chunk from the tail of the closed one,
                // newest-first, while the overlap budget lasts.
                let tail_from = current.len().saturating_sub(OVERLAP_TAIL);
                let mut seeded: Vec<Span> = Vec::new();
                let mut seeded_len = 0;
                let mut seeded_start = current_start;
                for prev in current[tail_from..].iter().rev() {
                    let prev_len = prev.char_len();
                    if seeded_len + prev_len > self.config.chunk_overlap {
                        break;
                    }
                    seeded.insert(0, prev.clone());
                    seeded_len += prev_len;
                    seeded_start = prev.start;
                }

                current_start = if seeded.is_empty() {
                    sentence.start
                } else {
                    seeded_start
                };
                current = seeded;
                current_len = seeded_len;
            }

            current_len += sentence.char_len();
            current.push(sentence);
        }

        if !current.is_empty() {
            let joined = join_sentences(&current);
            if joined.trim().chars().count() >= self.config.min_chunk_size {
                chunks.push(build_chunk(
                    &joined,
                    chunk_index,
                    document_id,
                    current_start,
                    map.len(),
                    vec![("sentence_count", Value::from(current.len()))],
                ));
            }
        }

        debug!(
            document_id,
            chunks = chunks.len(),
            "sentence-aware chunking complete"
        );
        chunks
    }
}
