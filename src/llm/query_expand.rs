//! Retrieval-time query expansion: ask the LLM for synonyms and related
//! terms to widen recall on short queries.

use anyhow::Result;

use crate::config::LlmConfig;
use crate::llm::client::{extract_json_object, generate};

/// Queries longer than this many whitespace tokens carry enough signal
/// already; expansion is skipped.
pub const MAX_EXPANDABLE_TOKENS: usize = 15;

const EXPAND_PROMPT: &str = r#"You expand search queries for a technical knowledge base. Given a query, produce one expanded phrase of synonyms and closely related terms that would help match relevant passages the original wording might miss.

Query: "{query}"

Respond with ONLY a JSON object: {"expanded": "term1 term2 term3"}. No explanation."#;

#[derive(serde::Deserialize)]
struct ExpandResponse {
    expanded: String,
}

/// Expand a query into extra search terms. Returns `None` when the query
/// is too long to benefit or the LLM produced nothing usable.
pub async fn expand_query(
    client: &reqwest::Client,
    config: &LlmConfig,
    query: &str,
) -> Result<Option<String>> {
    if query.split_whitespace().count() > MAX_EXPANDABLE_TOKENS {
        return Ok(None);
    }

    let prompt = EXPAND_PROMPT.replace("{query}", query);
    let response = generate(client, config, &config.query_model, &prompt, None).await?;

    match serde_json::from_str::<ExpandResponse>(extract_json_object(&response)) {
        Ok(parsed) => {
            let expanded = parsed.expanded.trim().to_string();
            Ok((!expanded.is_empty()).then_some(expanded))
        }
        Err(e) => {
            tracing::warn!("Failed to parse expansion: {e}. Raw: {response}");
            Ok(None)
        }
    }
}
