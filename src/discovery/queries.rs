//! LLM query synthesis: turn a research prompt into a diverse set of web
//! searches, optionally extended with competitor-technology queries.
//!
//! The prompt templates are versioned string resources with JSON output
//! contracts. When the LLM is unreachable or returns junk, the prompt
//! itself becomes a single literal query.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::config::Config;
use crate::llm::client::{extract_json_object, generate};

/// Prompts longer than this are condensed to their detected technologies
/// before hitting the LLM.
const LONG_PROMPT_CHARS: usize = 2_000;

const QUERY_SYNTH_SYSTEM: &str = r#"You are a search strategy generator for a technical knowledge base.
Analyze the user's request, extract every technology, framework, library and tool mentioned, and generate diverse web search queries that will surface learning material for each of them.

Target this mix of source types:
- 20% official documentation sites
- 70% video content, favoring channels and long-form courses over single videos
- 10% code repositories

For each detected technology produce at least one documentation or repository query and one video query.

Return ONLY a valid JSON object:
{"search_queries": ["query 1", "query 2"], "topics": ["topic"], "keywords": ["keyword"]}

No markdown, no code fences, no extra text."#;

const COMPETITOR_SYSTEM: &str = r#"For each technology listed, name 2-3 widely used competitors or alternatives.

Return ONLY a JSON object mapping technology to alternatives:
{"TechName": ["Alternative1", "Alternative2"]}"#;

#[derive(Deserialize)]
struct QueryStrategy {
    #[serde(default)]
    search_queries: Vec<String>,
}

/// Produce search queries for a prompt. Never fails: degraded paths fall
/// back to the literal prompt.
pub async fn synthesize(client: &reqwest::Client, config: &Config, prompt: &str) -> Vec<String> {
    let technologies = extract_technologies(prompt);

    let condensed = if prompt.len() > LONG_PROMPT_CHARS {
        if technologies.is_empty() {
            let head: String = prompt.chars().take(500).collect();
            head
        } else {
            format!("Technologies: {}", technologies.join(", "))
        }
    } else {
        prompt.to_string()
    };

    // Two queries per detected technology, within sane bounds.
    let recommended = (technologies.len() * 2).clamp(10, 25);
    let user_prompt = format!(
        "User request: \"{condensed}\"\n\nGenerate exactly {recommended} search queries \
         covering every technical component mentioned."
    );

    let mut queries = match generate(
        client,
        &config.llm,
        &config.llm.query_model,
        &user_prompt,
        Some(QUERY_SYNTH_SYSTEM),
    )
    .await
    {
        Ok(response) => match serde_json::from_str::<QueryStrategy>(extract_json_object(&response))
        {
            Ok(strategy) if !strategy.search_queries.is_empty() => strategy.search_queries,
            _ => {
                tracing::warn!("Query synthesis returned no usable JSON, using literal query");
                vec![prompt.to_string()]
            }
        },
        Err(e) => {
            tracing::warn!("Query synthesis failed ({e}), using literal query");
            vec![prompt.to_string()]
        }
    };

    if config.enable_competitor_queries && !technologies.is_empty() {
        let competitors = competitor_queries(client, config, &technologies).await;
        if !competitors.is_empty() {
            tracing::info!("Added {} competitor queries", competitors.len());
            queries.extend(competitors);
        }
    }

    queries
}

/// Second pass: ask the LLM for alternatives to each detected technology
/// and derive documentation/repository/video queries for them.
async fn competitor_queries(
    client: &reqwest::Client,
    config: &Config,
    technologies: &[String],
) -> Vec<String> {
    let listed = technologies
        .iter()
        .take(10)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

    let response = match generate(
        client,
        &config.llm,
        &config.llm.query_model,
        &format!("Technologies: {listed}"),
        Some(COMPETITOR_SYSTEM),
    )
    .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Competitor detection failed: {e}");
            return Vec::new();
        }
    };

    let map: HashMap<String, Vec<String>> =
        match serde_json::from_str(extract_json_object(&response)) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("Competitor JSON invalid: {e}");
                return Vec::new();
            }
        };

    let mut queries = Vec::new();
    for alternatives in map.values() {
        for alt in alternatives.iter().take(2) {
            queries.push(format!("{alt} official documentation"));
            queries.push(format!("{alt} repository examples"));
            queries.push(format!("{alt} tutorial video"));
        }
    }
    queries
}

fn tech_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CamelCase compounds and dotted product names read as technology
    // mentions; plain words do not.
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]+)+\b|\b[A-Za-z]+\.(?:js|rs|py|io)\b")
            .expect("tech regex")
    })
}

/// Known technology names that don't follow CamelCase.
const KNOWN_TECH: [&str; 18] = [
    "rust", "tokio", "axum", "redis", "postgresql", "sqlite", "docker", "kubernetes",
    "react", "vue", "django", "flask", "fastapi", "whisper", "ollama", "kafka", "nginx",
    "webrtc",
];

/// Detect technology mentions in a prompt by pattern and lexicon.
pub fn extract_technologies(text: &str) -> Vec<String> {
    let mut detected: Vec<String> = Vec::new();
    let mut seen_lower: std::collections::HashSet<String> = std::collections::HashSet::new();

    for m in tech_regex().find_iter(text) {
        let tech = m.as_str().to_string();
        if tech.len() > 3 && seen_lower.insert(tech.to_lowercase()) {
            detected.push(tech);
        }
    }

    let lower = text.to_lowercase();
    for known in KNOWN_TECH {
        if seen_lower.contains(known) {
            continue;
        }
        let is_word = lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w == known);
        if is_word {
            seen_lower.insert(known.to_string());
            detected.push(known.to_string());
        }
    }

    detected
}
