//! Discovery orchestration: turn a free-form input into a deduplicated,
//! typed, prioritized set of candidate URLs.
//!
//! Inputs containing syntactic URLs skip the web entirely. Prompts go
//! through LLM query synthesis, the web-search provider, and a quality
//! scoring pass before candidates are assembled.

pub mod queries;
pub mod web_search;

use anyhow::Result;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::models::{DiscoveredSource, DiscoveryResult, SourceKind};
use crate::urls;
use web_search::SearchProvider;

/// Priority for URLs the user typed themselves.
pub const USER_PRIORITY: i64 = 100;
/// Priority for machine-discovered URLs (search, crawl, channels).
pub const DISCOVERED_PRIORITY: i64 = 50;

/// Classify an input and produce candidates. The catalog is only used
/// for API-call logging; persistence happens in the caller via
/// `insert_if_absent`.
pub async fn discover(
    client: &reqwest::Client,
    config: &Config,
    catalog: &Catalog,
    input: &str,
) -> Result<DiscoveryResult> {
    let direct = urls::extract_urls(input);

    if !direct.is_empty() {
        tracing::info!("Input carries {} direct URLs, skipping web search", direct.len());
        let sources = assemble(direct, USER_PRIORITY, None, config);
        return Ok(DiscoveryResult {
            sources,
            direct_urls: true,
        });
    }

    let prompt = input.trim();
    if prompt.is_empty() {
        anyhow::bail!("empty input");
    }

    let search_queries = queries::synthesize(client, config, prompt).await;
    tracing::info!("Searching with {} queries", search_queries.len());

    let provider = SearchProvider::new(client.clone(), config.search_provider.clone());
    let per_query = web_search::results_per_query(search_queries.len());
    let raw_results = provider.multi_search(&search_queries, per_query, catalog).await;
    let ranked = web_search::score_candidates(&raw_results);
    tracing::info!("Discovered {} unique URLs from web search", ranked.len());

    let prompt_id = format!("prompt:{}", urls::url_hash(prompt));
    let sources = assemble(ranked, DISCOVERED_PRIORITY, Some(prompt_id), config);

    Ok(DiscoveryResult {
        sources,
        direct_urls: false,
    })
}

/// Normalize, dedupe and type a URL list into catalog candidates.
fn assemble(
    raw_urls: Vec<String>,
    priority: i64,
    discovered_from: Option<String>,
    config: &Config,
) -> Vec<DiscoveredSource> {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();

    for raw in raw_urls {
        let Some(normalized) = urls::normalize(&raw, &config.tracking_params) else {
            tracing::debug!("Dropping unparseable candidate {raw}");
            continue;
        };
        if !seen.insert(normalized.clone()) {
            continue;
        }

        let mut kind = urls::detect_kind(&normalized);
        if kind == SourceKind::WebPage && urls::is_documentation_like(&normalized) {
            kind = SourceKind::DocSitePage;
        }

        sources.push(DiscoveredSource {
            url: normalized,
            kind,
            priority,
            discovered_from: discovered_from.clone(),
        });
    }

    sources
}
