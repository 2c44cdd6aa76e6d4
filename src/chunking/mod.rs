//! Kind-aware text segmentation.
//!
//! Each source kind has its own strategy for producing indivisible units
//! (markdown paragraphs/sentences, repository file blocks, transcript
//! segments); a shared accumulator then assembles units into chunks
//! within the configured token bounds, carrying a tail overlap between
//! adjacent chunks.

pub mod code;
pub mod markdown;
pub mod transcript;

use crate::config::ChunkingConfig;
use crate::models::{FetchedDocument, SourceKind};

/// A chunk of source text ready for embedding and enrichment.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    /// Nearest markdown heading, or the repository file path
    pub heading: Option<String>,
    /// Timestamp of the first transcript segment covered
    pub timestamp_start: Option<f64>,
    pub token_count: usize,
}

/// An indivisible piece of text produced by a kind-specific strategy.
#[derive(Debug, Clone)]
pub(crate) struct Unit {
    pub text: String,
    pub heading: Option<String>,
    pub timestamp: Option<f64>,
    /// Force a chunk boundary before this unit (file boundaries)
    pub hard_break: bool,
}

impl Unit {
    pub(crate) fn new(text: String) -> Self {
        Self {
            text,
            heading: None,
            timestamp: None,
            hard_break: false,
        }
    }
}

/// Whitespace-term token approximation, dimensionally compatible with the
/// embedder's budget.
pub fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Cheap signal for whether a chunk carries example code.
pub fn has_code(text: &str) -> bool {
    const INDICATORS: [&str; 8] = [
        "```", "fn ", "def ", "class ", "function ", "import ", "const ", "let ",
    ];
    INDICATORS.iter().any(|marker| text.contains(marker))
}

/// Split a fetched document into ordered chunks using the strategy for
/// its kind.
pub fn chunk_document(doc: &FetchedDocument, config: &ChunkingConfig) -> Vec<TextChunk> {
    if doc.text.trim().is_empty() && doc.segments.is_empty() {
        return Vec::new();
    }

    let units = match doc.kind {
        SourceKind::WebPage | SourceKind::DocSitePage => markdown::units(&doc.text, config),
        SourceKind::Repo => code::units(&doc.text, config),
        SourceKind::Video => {
            if doc.segments.is_empty() {
                markdown::units(&doc.text, config)
            } else {
                transcript::units(&doc.segments)
            }
        }
        // channel entries never carry a chunkable document
        SourceKind::VideoChannel => Vec::new(),
    };

    assemble(units, config)
}

/// Accumulate units into chunks: flush when the next unit would push the
/// buffer past `max_tokens` and at least `min_tokens` are buffered, so
/// undersized sections merge forward instead of standing alone. The tail
/// `overlap_tokens` words of each flushed chunk seed the next one; hard
/// breaks reset the carry so overlap never crosses file boundaries.
pub(crate) fn assemble(units: Vec<Unit>, config: &ChunkingConfig) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut buffer: Vec<Unit> = Vec::new();
    let mut buffered_tokens = 0usize;
    let mut carry: Option<String> = None;

    for unit in units {
        let unit_tokens = token_count(&unit.text);
        if unit_tokens == 0 {
            continue;
        }

        if unit.hard_break {
            if !buffer.is_empty() {
                flush(&mut chunks, &mut buffer, carry.take());
                buffered_tokens = 0;
            }
            carry = None;
        } else if buffered_tokens >= config.min_tokens
            && buffered_tokens + unit_tokens > config.max_tokens
        {
            let tail = tail_words(&buffer, config.overlap_tokens);
            flush(&mut chunks, &mut buffer, carry.take());
            buffered_tokens = 0;
            carry = tail;
        }

        buffered_tokens += unit_tokens;
        buffer.push(unit);
    }

    if !buffer.is_empty() {
        flush(&mut chunks, &mut buffer, carry.take());
    }

    chunks
}

fn flush(chunks: &mut Vec<TextChunk>, buffer: &mut Vec<Unit>, carry: Option<String>) {
    if buffer.is_empty() {
        return;
    }

    let heading = buffer.iter().find_map(|u| u.heading.clone());
    let timestamp_start = buffer.iter().find_map(|u| u.timestamp);

    let body = buffer
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let text = match carry {
        Some(prefix) => format!("{prefix}\n\n{body}"),
        None => body,
    };

    let tokens = token_count(&text);
    chunks.push(TextChunk {
        text,
        heading,
        timestamp_start,
        token_count: tokens,
    });
    buffer.clear();
}

/// Last `n` whitespace words of the buffered text, for overlap carry.
fn tail_words(buffer: &[Unit], n: usize) -> Option<String> {
    if n == 0 {
        return None;
    }
    let joined = buffer
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let words: Vec<&str> = joined.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let start = words.len().saturating_sub(n);
    Some(words[start..].join(" "))
}
