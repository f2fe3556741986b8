use serde_json::Value;
use tracing::debug;

use super::{
    CharMap, Chunk, Chunker, ChunkingConfig, SentenceChunker, Span,
    build_chunk, chunk_id,
};

/// Split text into paragraphs with their char offsets.
///
/// A paragraph boundary is any whitespace run containing at least two
/// newlines. Each span's `end` sits at the separator start; `start` of the
/// next span sits after the separator's last newline.
pub(crate) fn split_paragraphs(text: &str, map: &CharMap) -> Vec<Span> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut spans = Vec::new();
    let mut para_start = 0;
    let mut i = 0;

    while i < total {
        if chars[i] != '\n' {
            i += 1;
            continue;
        }

        // Walk the whitespace run starting at this newline and remember
        // where its last newline sits.
        let mut newlines = 1;
        let mut last_newline = i;
        let mut j = i + 1;
        while j < total && chars[j].is_whitespace() {
            if chars[j] == '\n' {
                newlines += 1;
                last_newline = j;
            }
            j += 1;
        }

        if newlines >= 2 {
            let raw = map.slice(text, para_start, i);
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                spans.push(Span {
                    text: trimmed.to_string(),
                    start: para_start,
                    end: i,
                });
            }
            para_start = last_newline + 1;
        }
        i = j;
    }

    if para_start < total {
        let raw = map.slice(text, para_start, total);
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            spans.push(Span {
                text: trimmed.to_string(),
                start: para_start,
                end: total,
            });
        }
    }

    spans
}

/// Extract a section title when the paragraph's first line looks like a
/// heading: markdown `#` headers, `Chapter N` / `Section N`, numbered
/// headings (`3. Results`), or ALL-CAPS lines of four or more chars.
pub(crate) fn section_title(paragraph: &str) -> Option<String> {
    let first_line = paragraph.lines().next()?.trim_end();

    // Markdown header: one to six '#' followed by a space.
    let hashes = first_line.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) {
        let rest = first_line[hashes..].trim();
        if !rest.is_empty() && first_line.as_bytes().get(hashes) == Some(&b' ')
        {
            return Some(rest.to_string());
        }
    }

    // "Chapter 7" / "Section 2" style.
    for marker in ["Chapter ", "Section "] {
        if let Some(rest) = first_line.strip_prefix(marker)
            && rest.chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            return Some(first_line.to_string());
        }
    }

    // Numbered heading: digits, a dot, whitespace, then an uppercase word.
    let digits = first_line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &first_line[digits..];
        if let Some(rest) = rest.strip_prefix('.') {
            let body = rest.trim_start();
            if rest.len() > body.len()
                && body.chars().next().is_some_and(char::is_uppercase)
            {
                return Some(first_line.to_string());
            }
        }
    }

    // ALL-CAPS heading: an uppercase-and-spaces prefix of at least 4 chars.
    if first_line.chars().next().is_some_and(char::is_uppercase) {
        let caps: String = first_line
            .chars()
            .take_while(|c| c.is_uppercase() || *c == ' ')
            .collect();
        if caps.chars().count() >= 4 && !caps.trim().is_empty() {
            return Some(caps.trim().to_string());
        }
    }

    None
}

/// Paragraph- and section-aware chunking.
///
/// Paragraphs are accumulated whole, the way the sentence strategy
/// accumulates sentences. Heading-style paragraphs set the `section`
/// metadata applied to every subsequent chunk. Overlap carries at most the
/// single trailing paragraph, and only when it fits `chunk_overlap`; a
/// paragraph larger than `chunk_size` is delegated to [`SentenceChunker`]
/// with offsets translated back into this document's coordinates and its
/// pieces tagged `from_long_paragraph`.
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    config: ChunkingConfig,
}

impl ParagraphChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    fn flush(
        &self,
        current: &[Span],
        chunk_index: usize,
        document_id: &str,
        start_char: usize,
        end_char: usize,
        section: Option<&str>,
    ) -> Chunk {
        let joined = current
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut extra = vec![("paragraph_count", Value::from(current.len()))];
        if let Some(section) = section {
            extra.push(("section", Value::from(section)));
        }
        build_chunk(&joined, chunk_index, document_id, start_char, end_char, extra)
    }

    /// Delegate one oversized paragraph to the sentence strategy and fold
    /// its output back into the parent sequence.
    fn split_long_paragraph(
        &self,
        paragraph: &Span,
        ordinal: usize,
        document_id: &str,
        section: Option<&str>,
        chunk_index: &mut usize,
        chunks: &mut Vec<Chunk>,
    ) {
        let scratch_id = format!("{document_id}_para{ordinal}");
        let sub_chunks = SentenceChunker::new(self.config)
            .chunk(&paragraph.text, &scratch_id);

        for mut sub in sub_chunks {
            sub.chunk_index = *chunk_index;
            sub.chunk_id = chunk_id(document_id, *chunk_index);
            sub.document_id = document_id.to_string();
            sub.start_char += paragraph.start;
            sub.end_char += paragraph.start;

            sub.metadata
                .insert("chunk_index".into(), Value::from(*chunk_index));
            sub.metadata
                .insert("start_char".into(), Value::from(sub.start_char));
            sub.metadata
                .insert("end_char".into(), Value::from(sub.end_char));
            sub.metadata
                .insert("from_long_paragraph".into(), Value::Bool(true));
            if let Some(section) = section {
                sub.metadata.insert("section".into(), Value::from(section));
            }

            chunks.push(sub);
            *chunk_index += 1;
        }
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let map = CharMap::new(text);
        let paragraphs = split_paragraphs(text, &map);

        let mut chunks = Vec::new();
        let mut chunk_index = 0;
        let mut current: Vec<Span> = Vec::new();
        let mut current_len = 0;
        let mut current_start = 0;
        let mut section: Option<String> = None;

        for (ordinal, paragraph) in paragraphs.into_iter().enumerate() {
            // A heading takes effect with the paragraph that carries it:
            // a chunk closed on this iteration keeps the section its
            // paragraphs were written under.
            let new_title = section_title(&paragraph.text);
            let paragraph_len = paragraph.char_len();

            if paragraph_len > self.config.chunk_size {
                if !current.is_empty() {
                    chunks.push(self.flush(
                        &current,
                        chunk_index,
                        document_id,
                        current_start,
                        paragraph.start,
                        section.as_deref(),
                    ));
                    chunk_index += 1;
                    current.clear();
                    current_len = 0;
                }

                if let Some(title) = new_title {
                    section = Some(title);
                }
                self.split_long_paragraph(
                    &paragraph,
                    ordinal,
                    document_id,
                    section.as_deref(),
                    &mut chunk_index,
                    &mut chunks,
                );
                current_start = paragraph.end;
                continue;
            }

            if current_len + paragraph_len > self.config.chunk_size
                && !current.is_empty()
            {
                chunks.push(self.flush(
                    &current,
                    chunk_index,
                    document_id,
                    current_start,
                    paragraph.start,
                    section.as_deref(),
                ));
                chunk_index += 1;

                // Overlap carries only the single trailing paragraph, and
                // only when it fits the budget. Never more than one.
                let last = current[current.len() - 1].clone();
                let last_len = last.char_len();
                if self.config.chunk_overlap > 0
                    && last_len <= self.config.chunk_overlap
                {
                    current_start = last.start;
                    current.clear();
                    current.push(last);
                    current_len = last_len;
                } else {
                    current.clear();
                    current_len = 0;
                    current_start = paragraph.start;
                }
            }

            if let Some(title) = new_title {
                section = Some(title);
            }
            current_len += paragraph.char_len();
            current.push(paragraph);
        }

        if !current.is_empty() {
            let joined = current
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            if joined.trim().chars().count() >= self.config.min_chunk_size {
                chunks.push(self.flush(
                    &current,
                    chunk_index,
                    document_id,
                    current_start,
                    map.len(),
                    section.as_deref(),
                ));
            }
        }

        debug!(
            document_id,
            chunks = chunks.len(),
            "paragraph-aware chunking complete"
        );
        chunks
    }
}
