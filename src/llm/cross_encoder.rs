//! Cross-encoder rescoring stage of the retrieval pipeline.
//!
//! The sidecar judges (query, passage) pairs jointly through a
//! `/v1/rerank` endpoint; one batched request covers every fused
//! candidate. An unconfigured or unreachable sidecar surfaces as an
//! error here and the search pipeline keeps its pre-rerank order.

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::config::RerankerConfig;
use crate::llm::client::{clip_to_boundary, post_json};

/// Passage characters offered per candidate; cross-encoders truncate
/// around 512 tokens regardless, so longer chunks only waste the wire.
const MAX_PASSAGE_CHARS: usize = 2_000;

/// One candidate's judged relevance, best first in the returned list.
#[derive(Debug, Clone)]
pub struct Rescored {
    /// Position in the candidate slice handed to [`rescore`].
    pub candidate: usize,
    /// Relevance squashed into [0, 1].
    pub relevance: f32,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RankedEntry>,
}

#[derive(Deserialize)]
struct RankedEntry {
    index: usize,
    relevance_score: f32,
}

/// Judge `passages` against `query`, returning at most `keep` candidates
/// ordered by relevance.
pub async fn rescore(
    client: &reqwest::Client,
    config: &RerankerConfig,
    query: &str,
    passages: &[String],
    keep: usize,
) -> Result<Vec<Rescored>> {
    let Some(base_url) = config.base_url.as_deref() else {
        anyhow::bail!("reranker sidecar not configured");
    };
    if passages.is_empty() {
        return Ok(Vec::new());
    }

    let clipped: Vec<&str> = passages
        .iter()
        .map(|p| clip_to_boundary(p, MAX_PASSAGE_CHARS))
        .collect();
    let body = serde_json::json!({
        "model": config.model.as_deref().unwrap_or("default"),
        "query": query,
        "documents": clipped,
        "top_n": keep,
    });

    let url = format!("{}/v1/rerank", base_url.trim_end_matches('/'));
    let timeout = Duration::from_secs(config.timeout_secs.min(30));
    let response: RerankResponse = post_json(client, &url, None, &body, timeout).await?;

    let mut rescored: Vec<Rescored> = response
        .results
        .into_iter()
        .filter(|entry| entry.index < passages.len())
        .map(|entry| Rescored {
            candidate: entry.index,
            relevance: squash(entry.relevance_score),
        })
        .collect();
    rescored.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(rescored)
}

/// Map a raw relevance logit into [0, 1] so rescored hits are
/// comparable across queries and thresholdable by callers.
pub fn squash(logit: f32) -> f32 {
    0.5 * (1.0 + (logit / 2.0).tanh())
}
