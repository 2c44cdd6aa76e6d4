//! Repository strategy: file boundaries first (the fetcher emits
//! `# File: path` headers), then blank-line separated blocks, then
//! fixed-size line windows for anything still oversized.

use super::{token_count, Unit};
use crate::config::ChunkingConfig;

const FILE_HEADER: &str = "# File: ";

pub(crate) fn units(text: &str, config: &ChunkingConfig) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut current_file: Option<String> = None;
    let mut block: Vec<&str> = Vec::new();

    let flush_block = |block: &mut Vec<&str>, file: &Option<String>, units: &mut Vec<Unit>| {
        if block.is_empty() {
            return;
        }
        let text = block.join("\n");
        block.clear();
        if text.trim().is_empty() {
            return;
        }
        if token_count(&text) > config.max_tokens {
            for window in line_windows(&text, config.max_tokens) {
                let mut unit = Unit::new(window);
                unit.heading = file.clone();
                units.push(unit);
            }
        } else {
            let mut unit = Unit::new(text);
            unit.heading = file.clone();
            units.push(unit);
        }
    };

    for line in text.lines() {
        if let Some(path) = line.strip_prefix(FILE_HEADER) {
            flush_block(&mut block, &current_file, &mut units);
            current_file = Some(path.trim().to_string());
            // the header itself opens the file's first chunk
            let mut unit = Unit::new(line.to_string());
            unit.heading = current_file.clone();
            unit.hard_break = true;
            units.push(unit);
            continue;
        }
        if line.trim().is_empty() {
            flush_block(&mut block, &current_file, &mut units);
        } else {
            block.push(line);
        }
    }
    flush_block(&mut block, &current_file, &mut units);

    units
}

/// Fixed-size fallback: split a block into windows of at most
/// `max_tokens`, breaking at line boundaries.
fn line_windows(text: &str, max_tokens: usize) -> Vec<String> {
    let mut windows = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut tokens = 0usize;

    for line in text.lines() {
        let line_tokens = token_count(line).max(1);
        if tokens + line_tokens > max_tokens && !current.is_empty() {
            windows.push(current.join("\n"));
            current.clear();
            tokens = 0;
        }
        current.push(line);
        tokens += line_tokens;
    }
    if !current.is_empty() {
        windows.push(current.join("\n"));
    }

    windows
}
