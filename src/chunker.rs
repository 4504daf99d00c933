//! Splits sanitized document text into embedding-sized chunks.
//!
//! Sizes are measured in characters; offsets on [`TextChunk`] are byte offsets into the text
//! that was chunked.

use serde::Serialize;

use crate::config::{ChunkStrategy, IngestionSettings};

/// Sentence endings the fixed-size chunker snaps to, in priority order.
const SENTENCE_ENDINGS: [&str; 6] = [". ", ".\n", "! ", "!\n", "? ", "?\n"];

/// Characters past the nominal window end that may still hold a sentence ending.
const LOOKAHEAD_CHARS: usize = 50;

/// Default separator hierarchy for [`RecursiveChunker`].
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Chunk emitted for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Position of the chunk within its document.
    pub index: usize,
    /// Trimmed chunk text.
    pub text: String,
    /// Start byte offset within the chunked text.
    pub byte_start: usize,
    /// Exclusive end byte offset within the chunked text.
    pub byte_end: usize,
}

/// A chunking strategy.
pub trait Chunker: Send + Sync {
    /// Splits `text` into chunks. Whitespace-only input yields no chunks.
    fn chunk(&self, text: &str) -> Vec<TextChunk>;
}

/// Builds the chunker selected in the ingestion settings.
pub fn build_chunker(settings: &IngestionSettings) -> Box<dyn Chunker> {
    match settings.strategy {
        ChunkStrategy::Fixed => Box::new(FixedSizeChunker::new(
            settings.chunk_size,
            settings.chunk_overlap,
        )),
        ChunkStrategy::Semantic => Box::new(SemanticChunker::new(
            settings.max_chunk_size,
            settings.min_chunk_size,
        )),
        ChunkStrategy::Recursive => Box::new(RecursiveChunker::new(
            settings.chunk_size,
            settings.chunk_overlap,
        )),
    }
}

/// Fixed-size windows with overlap, snapped to the nearest sentence ending.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let bounds = char_bounds(text);
        let total = bounds.len() - 1;
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < total {
            let mut end = (start + self.chunk_size).min(total);
            if end < total {
                let search_start = end - self.chunk_size / 5;
                let search_end = (end + LOOKAHEAD_CHARS).min(total);
                let window = &text[bounds[search_start]..bounds[search_end]];
                if let Some(offset) = last_sentence_end(window) {
                    let byte = bounds[search_start] + offset;
                    end = bounds.binary_search(&byte).unwrap_or_else(|idx| idx);
                }
            }

            push_span(&mut chunks, text, bounds[start], bounds[end]);
            if end >= total {
                break;
            }

            let next = end.saturating_sub(self.chunk_overlap);
            start = if next <= start { end } else { next };
        }

        tracing::debug!(chunks = chunks.len(), "created fixed-size chunks");
        chunks
    }
}

fn last_sentence_end(window: &str) -> Option<usize> {
    SENTENCE_ENDINGS
        .iter()
        .find_map(|pattern| window.rfind(pattern).map(|pos| pos + pattern.len()))
}

/// Groups whole sentences into chunks bounded by a max size, flushing only once the pending
/// text reaches the min size.
#[derive(Debug, Clone)]
pub struct SemanticChunker {
    max_chunk_size: usize,
    min_chunk_size: usize,
}

impl SemanticChunker {
    /// Builds a sentence-grouping chunker.
    pub fn new(max_chunk_size: usize, min_chunk_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
            min_chunk_size,
        }
    }
}

impl Chunker for SemanticChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut pending: Vec<(usize, usize)> = Vec::new();
        let mut pending_size = 0usize;

        for sentence in sentence_spans(text) {
            let size = text[sentence.0..sentence.1].chars().count();
            if pending_size + size > self.max_chunk_size && !pending.is_empty() {
                let joined = join_sentences(text, &pending);
                if joined.chars().count() >= self.min_chunk_size {
                    push_joined(&mut chunks, joined, &pending);
                    pending.clear();
                    pending_size = 0;
                }
            }
            pending.push(sentence);
            pending_size += size;
        }

        if !pending.is_empty() {
            let joined = join_sentences(text, &pending);
            if !joined.is_empty() {
                push_joined(&mut chunks, joined, &pending);
            }
        }

        tracing::debug!(chunks = chunks.len(), "created semantic chunks");
        chunks
    }
}

/// Sentence spans: a boundary is `.`, `!` or `?`, then whitespace, then an ASCII capital.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut spans = Vec::new();
    let mut sentence_start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, ch) = chars[i];
        if matches!(ch, '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
            }
            if j > i + 1 && j < chars.len() && chars[j].1.is_ascii_uppercase() {
                let end = pos + ch.len_utf8();
                if let Some(span) = trim_span(text, (sentence_start, end)) {
                    spans.push(span);
                }
                sentence_start = chars[j].0;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    if let Some(span) = trim_span(text, (sentence_start, text.len())) {
        spans.push(span);
    }
    spans
}

fn join_sentences(text: &str, sentences: &[(usize, usize)]) -> String {
    sentences
        .iter()
        .map(|&(start, end)| &text[start..end])
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

fn push_joined(chunks: &mut Vec<TextChunk>, joined: String, sentences: &[(usize, usize)]) {
    let (Some(first), Some(last)) = (sentences.first(), sentences.last()) else {
        return;
    };
    chunks.push(TextChunk {
        index: chunks.len(),
        text: joined,
        byte_start: first.0,
        byte_end: last.1,
    });
}

/// Hierarchical splitter: paragraphs, then lines, sentences, words and finally characters.
///
/// Adjacent chunks at the same level share up to `chunk_overlap` characters of trailing pieces.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Uses [`DEFAULT_SEPARATORS`].
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self::with_separators(chunk_size, chunk_overlap, &DEFAULT_SEPARATORS)
    }

    /// Uses a custom separator hierarchy, most preferred first.
    pub fn with_separators(chunk_size: usize, chunk_overlap: usize, separators: &[&str]) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: separators.iter().map(|sep| sep.to_string()).collect(),
        }
    }

    fn split(
        &self,
        text: &str,
        span: (usize, usize),
        separators: &[String],
        out: &mut Vec<(usize, usize)>,
    ) {
        let Some((separator, remaining)) = separators.split_first() else {
            out.push(span);
            return;
        };
        let separator_len = separator.chars().count();
        let mut current: Vec<(usize, usize)> = Vec::new();
        let mut current_size = 0usize;

        for piece in split_span(text, span, separator) {
            let piece_size = span_chars(text, piece);
            if current_size + piece_size <= self.chunk_size {
                current.push(piece);
                current_size += piece_size + separator_len;
                continue;
            }
            if !current.is_empty() {
                self.flush(text, &current, remaining, out);
            }
            current = self.overlap_tail(text, &current, separator_len, piece_size);
            current_size = current
                .iter()
                .map(|&p| span_chars(text, p) + separator_len)
                .sum();
            current.push(piece);
            current_size += piece_size + separator_len;
        }

        if !current.is_empty() {
            self.flush(text, &current, remaining, out);
        }
    }

    fn flush(
        &self,
        text: &str,
        pieces: &[(usize, usize)],
        remaining: &[String],
        out: &mut Vec<(usize, usize)>,
    ) {
        let (Some(first), Some(last)) = (pieces.first(), pieces.last()) else {
            return;
        };
        let merged = (first.0, last.1);
        if span_chars(text, merged) > self.chunk_size && !remaining.is_empty() {
            self.split(text, merged, remaining, out);
        } else {
            out.push(merged);
        }
    }

    fn overlap_tail(
        &self,
        text: &str,
        pieces: &[(usize, usize)],
        separator_len: usize,
        next_piece_size: usize,
    ) -> Vec<(usize, usize)> {
        if self.chunk_overlap == 0 {
            return Vec::new();
        }
        let mut retained = Vec::new();
        let mut retained_size = 0usize;
        for &piece in pieces.iter().rev() {
            let size = span_chars(text, piece) + separator_len;
            if retained_size + size > self.chunk_overlap {
                break;
            }
            retained.push(piece);
            retained_size += size;
        }
        if retained_size + next_piece_size > self.chunk_size {
            return Vec::new();
        }
        retained.reverse();
        retained
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let mut spans = Vec::new();
        self.split(text, (0, text.len()), &self.separators, &mut spans);

        let mut chunks = Vec::new();
        for (start, end) in spans {
            push_span(&mut chunks, text, start, end);
        }
        tracing::debug!(chunks = chunks.len(), "created recursive chunks");
        chunks
    }
}

fn split_span(text: &str, span: (usize, usize), separator: &str) -> Vec<(usize, usize)> {
    let (start, end) = span;
    let slice = &text[start..end];
    if separator.is_empty() {
        return slice
            .char_indices()
            .map(|(idx, ch)| (start + idx, start + idx + ch.len_utf8()))
            .collect();
    }
    let mut pieces = Vec::new();
    let mut cursor = start;
    for (idx, _) in slice.match_indices(separator) {
        pieces.push((cursor, start + idx));
        cursor = start + idx + separator.len();
    }
    pieces.push((cursor, end));
    pieces
}

fn span_chars(text: &str, span: (usize, usize)) -> usize {
    text[span.0..span.1].chars().count()
}

/// Byte offset of every char boundary, including `text.len()`.
fn char_bounds(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect()
}

fn trim_span(text: &str, span: (usize, usize)) -> Option<(usize, usize)> {
    let slice = &text[span.0..span.1];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = slice.len() - slice.trim_start().len();
    let start = span.0 + lead;
    Some((start, start + trimmed.len()))
}

fn push_span(chunks: &mut Vec<TextChunk>, text: &str, start: usize, end: usize) {
    let Some((start, end)) = trim_span(text, (start, end)) else {
        return;
    };
    chunks.push(TextChunk {
        index: chunks.len(),
        text: text[start..end].to_string(),
        byte_start: start,
        byte_end: end,
    });
}
