//! Per-chunk metadata extraction through the LLM.
//!
//! The prompt is a versioned string resource with a strict JSON output
//! contract. An invalid or missing response degrades to frequency-based
//! keyword metadata; enrichment never fails the ingestion of a chunk.

use serde::Deserialize;
use std::collections::HashMap;

use crate::config::LlmConfig;
use crate::llm::client::{clip_to_boundary, extract_json_object, generate};
use crate::models::{Difficulty, EnrichedMetadata};

/// Characters of chunk text shown to the model.
const SAMPLE_CHARS: usize = 1_000;

const ENRICH_PROMPT: &str = r#"Extract metadata from this technical content. Return REAL, SPECIFIC information taken from the text, never generic placeholders.

CONTENT:
{content}

Extract:
1. topics (3-5): main subjects discussed
2. keywords (5-8): important technical terms found in the text
3. summary (one sentence, max 20 words)
4. concepts (3-5): technical concepts mentioned
5. difficulty: beginner, intermediate, or advanced
6. languages: programming languages mentioned
7. frameworks: frameworks or libraries mentioned

Rules:
- Use words that actually appear in or describe the content
- Use an empty array when nothing applies
- Return ONLY a valid JSON object, no markdown, no extra text

Required JSON shape:
{"topics": [], "keywords": [], "summary": "", "concepts": [], "difficulty": "beginner", "languages": [], "frameworks": []}"#;

#[derive(Deserialize)]
struct EnrichResponse {
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    concepts: Vec<String>,
    #[serde(default)]
    difficulty: Difficulty,
    #[serde(default, alias = "programming_languages")]
    languages: Vec<String>,
    #[serde(default)]
    frameworks: Vec<String>,
}

/// Enrich one chunk. Infallible by contract: LLM or parse failures log
/// and fall back to keyword-frequency metadata.
pub async fn enrich(
    client: &reqwest::Client,
    config: &LlmConfig,
    text: &str,
) -> EnrichedMetadata {
    let sample = clip_to_boundary(text, SAMPLE_CHARS);
    let prompt = ENRICH_PROMPT.replace("{content}", sample);

    match generate(client, config, &config.enrich_model, &prompt, None).await {
        Ok(response) => match serde_json::from_str::<EnrichResponse>(extract_json_object(&response))
        {
            Ok(parsed) => EnrichedMetadata {
                topics: parsed.topics,
                keywords: parsed.keywords,
                summary: parsed.summary,
                concepts: parsed.concepts,
                difficulty: parsed.difficulty,
                languages: parsed.languages,
                frameworks: parsed.frameworks,
            },
            Err(e) => {
                tracing::warn!("Failed to parse enrichment JSON: {e}");
                fallback_metadata(text)
            }
        },
        Err(e) => {
            tracing::warn!("Enrichment call failed: {e}");
            fallback_metadata(text)
        }
    }
}

/// Term-frequency fallback when the LLM is unavailable or returned junk.
pub fn fallback_metadata(text: &str) -> EnrichedMetadata {
    const TECH_TERMS: [&str; 24] = [
        "api", "async", "await", "router", "endpoint", "request", "response", "http",
        "database", "sql", "authentication", "authorization", "jwt", "oauth", "middleware",
        "dependency", "validation", "schema", "websocket", "rest", "graphql", "json",
        "cache", "queue",
    ];
    const LANGUAGES: [&str; 8] = [
        "python", "javascript", "typescript", "java", "rust", "go", "ruby", "kotlin",
    ];
    const FRAMEWORKS: [&str; 8] = [
        "fastapi", "django", "flask", "react", "vue", "angular", "tokio", "axum",
    ];

    let lower = text.to_lowercase();
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if word.len() > 3 {
            *freq.entry(word).or_insert(0) += 1;
        }
    }

    let mut keywords: Vec<String> = TECH_TERMS
        .iter()
        .filter(|t| freq.contains_key(**t))
        .map(|t| t.to_string())
        .collect();
    if keywords.len() < 8 {
        let mut by_freq: Vec<(&str, usize)> = freq
            .iter()
            .map(|(w, n)| (*w, *n))
            .filter(|(w, _)| w.len() > 4 && !keywords.iter().any(|k| k == w))
            .collect();
        by_freq.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        keywords.extend(by_freq.iter().take(8 - keywords.len()).map(|(w, _)| w.to_string()));
    }

    let languages = LANGUAGES
        .iter()
        .filter(|l| lower.contains(**l))
        .map(|l| l.to_string())
        .collect();
    let frameworks = FRAMEWORKS
        .iter()
        .filter(|f| lower.contains(**f))
        .map(|f| f.to_string())
        .collect();

    EnrichedMetadata {
        topics: Vec::new(),
        keywords,
        summary: String::new(),
        concepts: Vec::new(),
        difficulty: Difficulty::Unknown,
        languages,
        frameworks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let json = r#"{
            "topics": ["API routing"],
            "keywords": ["FastAPI", "async"],
            "summary": "Explains route registration.",
            "concepts": ["REST"],
            "difficulty": "intermediate",
            "programming_languages": ["Python"],
            "frameworks": ["FastAPI"]
        }"#;
        let parsed: EnrichResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.topics, vec!["API routing"]);
        assert_eq!(parsed.languages, vec!["Python"]);
        assert_eq!(parsed.difficulty, Difficulty::Intermediate);
    }

    #[test]
    fn test_parse_partial_response_fills_defaults() {
        let parsed: EnrichResponse = serde_json::from_str(r#"{"topics": ["x"]}"#).unwrap();
        assert_eq!(parsed.topics, vec!["x"]);
        assert!(parsed.keywords.is_empty());
        assert_eq!(parsed.difficulty, Difficulty::Unknown);
    }

    #[test]
    fn test_fallback_finds_tech_terms() {
        let meta = fallback_metadata(
            "The async authentication middleware validates the JWT on every request before \
             the endpoint handler in Python using FastAPI runs.",
        );
        assert!(meta.keywords.iter().any(|k| k == "authentication"));
        assert!(meta.keywords.iter().any(|k| k == "middleware"));
        assert_eq!(meta.languages, vec!["python"]);
        assert_eq!(meta.frameworks, vec!["fastapi"]);
        assert_eq!(meta.difficulty, Difficulty::Unknown);
    }

    #[test]
    fn test_fallback_caps_keywords() {
        let text = (0..100)
            .map(|i| format!("longword{i} longword{i} filler"))
            .collect::<Vec<_>>()
            .join(" ");
        let meta = fallback_metadata(&text);
        assert!(meta.keywords.len() <= 8);
    }

}
