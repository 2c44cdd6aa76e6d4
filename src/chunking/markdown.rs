//! Markdown strategy: heading boundaries first, then paragraphs, then
//! sentences. Leaves are whole sentences; a chunk never splits one.

use super::{token_count, Unit};
use crate::config::ChunkingConfig;

pub(crate) fn units(text: &str, config: &ChunkingConfig) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut current_heading: Option<String> = None;

    for block in split_paragraphs(text) {
        if let Some(heading) = heading_of(&block) {
            current_heading = Some(heading);
            let mut unit = Unit::new(block);
            unit.heading = current_heading.clone();
            units.push(unit);
            continue;
        }

        if token_count(&block) > config.max_tokens {
            for sentence in split_sentences(&block) {
                let mut unit = Unit::new(sentence);
                unit.heading = current_heading.clone();
                units.push(unit);
            }
        } else {
            let mut unit = Unit::new(block);
            unit.heading = current_heading.clone();
            units.push(unit);
        }
    }

    units
}

/// Blank-line separated blocks, trimmed.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }

    blocks
}

/// Title of a heading block (levels 1-3), if the block is one.
fn heading_of(block: &str) -> Option<String> {
    let first = block.lines().next()?;
    let trimmed = first.trim_start();
    for level in 1..=3usize {
        let marker = "#".repeat(level);
        if let Some(rest) = trimmed.strip_prefix(&format!("{marker} ")) {
            return Some(rest.trim().to_string());
        }
    }
    None
}

/// Split on sentence terminators followed by whitespace, keeping the
/// terminator with the sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            if chars.peek().map_or(true, |next| next.is_whitespace()) {
                let sentence = current.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
            }
        }
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkingConfig {
        ChunkingConfig {
            min_tokens: 100,
            max_tokens: 512,
            overlap_tokens: 50,
        }
    }

    #[test]
    fn test_paragraph_split() {
        let blocks = split_paragraphs("one\ntwo\n\nthree\n\n\nfour");
        assert_eq!(blocks, vec!["one\ntwo", "three", "four"]);
    }

    #[test]
    fn test_heading_detection() {
        assert_eq!(heading_of("# Intro"), Some("Intro".to_string()));
        assert_eq!(heading_of("### Deep dive"), Some("Deep dive".to_string()));
        assert_eq!(heading_of("#### too deep"), None);
        assert_eq!(heading_of("#hashtag"), None);
        assert_eq!(heading_of("plain text"), None);
    }

    #[test]
    fn test_sentence_split_keeps_terminators() {
        let sentences = split_sentences("First one. Second? Third!");
        assert_eq!(sentences, vec!["First one.", "Second?", "Third!"]);
    }

    #[test]
    fn test_sentence_split_ignores_inline_dots() {
        let sentences = split_sentences("Use tokio.spawn for tasks. Done.");
        assert_eq!(sentences, vec!["Use tokio.spawn for tasks.", "Done."]);
    }

    #[test]
    fn test_units_carry_headings() {
        let text = "# Setup\n\nInstall the thing.\n\n## Usage\n\nRun the thing.";
        let units = units(text, &config());
        assert_eq!(units.len(), 4);
        assert_eq!(units[1].heading.as_deref(), Some("Setup"));
        assert_eq!(units[3].heading.as_deref(), Some("Usage"));
    }

    #[test]
    fn test_oversized_paragraph_becomes_sentences() {
        let sentence = format!("{} end.", (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" "));
        let paragraph = (0..20).map(|_| sentence.clone()).collect::<Vec<_>>().join(" ");
        let units = units(&paragraph, &config());
        assert!(units.len() > 1, "oversized paragraph should split into sentences");
    }
}
