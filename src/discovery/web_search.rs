//! Web-search provider adapter and candidate quality scoring.
//!
//! The provider integration is one GET endpoint presenting an API key
//! via header and a JSON response of `{url, title, description}` rows;
//! swapping providers means swapping this adapter. Every call lands in
//! the catalog's API log for quota surfacing.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::catalog::Catalog;
use crate::config::SearchProviderConfig;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const API_NAME: &str = "web_search";

/// Results requested per query, adaptive to the query count so the
/// total lands around 40-60 unique URLs.
pub fn results_per_query(query_count: usize) -> usize {
    if query_count <= 10 {
        5
    } else if query_count <= 15 {
        4
    } else {
        3
    }
}

#[derive(Debug, Clone)]
pub struct SearchResultItem {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

pub struct SearchProvider {
    client: reqwest::Client,
    config: SearchProviderConfig,
}

#[derive(Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    web: Option<ProviderWeb>,
}

#[derive(Deserialize)]
struct ProviderWeb {
    #[serde(default)]
    results: Vec<ProviderResult>,
}

#[derive(Deserialize)]
struct ProviderResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

impl SearchProvider {
    pub fn new(client: reqwest::Client, config: SearchProviderConfig) -> Self {
        Self { client, config }
    }

    /// One search call. Over-quota or network failures return an empty
    /// list; orchestration succeeds with whatever was retrieved.
    pub async fn search(
        &self,
        query: &str,
        count: usize,
        catalog: &Catalog,
    ) -> Vec<SearchResultItem> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            tracing::warn!("Search API key not configured, skipping web search");
            return Vec::new();
        };

        let count_str = count.min(20).to_string();
        let started = std::time::Instant::now();
        let result = self
            .client
            .get(&self.config.endpoint)
            .timeout(SEARCH_TIMEOUT)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", count_str.as_str())])
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!("Search API request failed: {e}");
                catalog.log_api_call(API_NAME, false, latency_ms, None).await;
                return Vec::new();
            }
        };

        let remaining_quota = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<i64>().ok());

        if !resp.status().is_success() {
            tracing::error!("Search API returned {}", resp.status());
            catalog
                .log_api_call(API_NAME, false, latency_ms, remaining_quota)
                .await;
            return Vec::new();
        }

        let body: ProviderResponse = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Search API response parse failed: {e}");
                catalog
                    .log_api_call(API_NAME, false, latency_ms, remaining_quota)
                    .await;
                return Vec::new();
            }
        };

        catalog
            .log_api_call(API_NAME, true, latency_ms, remaining_quota)
            .await;

        let items: Vec<SearchResultItem> = body
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| SearchResultItem {
                url: r.url,
                title: r.title,
                snippet: r.description,
            })
            .collect();

        tracing::info!("Found {} results for query '{query}'", items.len());
        items
    }

    /// Run every query sequentially (the provider rate-limits hard) and
    /// concatenate results in query order.
    pub async fn multi_search(
        &self,
        queries: &[String],
        per_query: usize,
        catalog: &Catalog,
    ) -> Vec<SearchResultItem> {
        let mut all = Vec::new();
        for query in queries {
            all.extend(self.search(query, per_query, catalog).await);
        }
        all
    }
}

// ─── Candidate scoring ───────────────────────────────────

/// Weighted per-host quality table. Channels beat playlists beat
/// individual videos, repos and documentation; generic tutorial keywords
/// add a nudge. The numbers live here so operators can retune in one
/// place.
fn priority_patterns() -> &'static [(Regex, i32)] {
    static PATTERNS: OnceLock<Vec<(Regex, i32)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"youtube\.com/@", 5),
            (r"youtube\.com/c/", 5),
            (r"youtube\.com/channel/", 5),
            (r"youtube\.com/user/", 5),
            (r"youtube\.com/playlist", 4),
            (r"youtube\.com/watch", 3),
            (r"youtu\.be/", 3),
            (r"github\.com/", 3),
            (r"gitlab\.com/", 3),
            (r"readthedocs\.io", 3),
            (r"docs\.[^/]+\.(com|org|io|dev)", 3),
            (r"stackoverflow\.com/questions", 2),
            (r"tutorial", 1),
            (r"guide", 1),
            (r"example", 1),
        ]
        .iter()
        .filter_map(|(pattern, score)| Regex::new(pattern).ok().map(|re| (re, *score)))
        .collect()
    })
}

/// Low-quality or paywalled hosts and generic listicles, dropped before
/// scoring.
fn blocklist_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"best.*courses",
            r"top.*courses",
            r"udemy\.com",
            r"coursera\.org",
            r"skillshare\.com",
            r"pluralsight\.com",
            r"pinterest\.com",
            r"instagram\.com",
            r"facebook\.com",
            r"/press-release",
            r"how.*to.*choose",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Filter and order search results: blocklisted URLs are dropped,
/// survivors sort by additive host-quality score (stable, so provider
/// relevance breaks ties), topic pages on code hosts score zero.
pub fn score_candidates(results: &[SearchResultItem]) -> Vec<String> {
    let mut scored: Vec<(String, i32)> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for item in results {
        let url = item.url.as_str();
        if blocklist_patterns().iter().any(|re| re.is_match(url)) {
            tracing::debug!("Blocked low-quality URL: {url}");
            continue;
        }
        if !seen.insert(url.to_string()) {
            continue;
        }

        let mut score: i32 = priority_patterns()
            .iter()
            .filter(|(re, _)| re.is_match(url))
            .map(|(_, s)| s)
            .sum();
        if url.contains("github.com/topics") {
            score = 0;
        }
        scored.push((url.to_string(), score));
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(url, _)| url).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str) -> SearchResultItem {
        SearchResultItem {
            url: url.to_string(),
            title: String::new(),
            snippet: String::new(),
        }
    }

    #[test]
    fn test_results_per_query_adaptive() {
        assert_eq!(results_per_query(8), 5);
        assert_eq!(results_per_query(12), 4);
        assert_eq!(results_per_query(25), 3);
    }

    #[test]
    fn test_channels_outrank_videos_and_pages() {
        let ranked = score_candidates(&[
            item("https://example.org/random"),
            item("https://www.youtube.com/watch?v=abc"),
            item("https://www.youtube.com/@rustlang"),
        ]);
        assert_eq!(ranked[0], "https://www.youtube.com/@rustlang");
        assert_eq!(ranked[1], "https://www.youtube.com/watch?v=abc");
        assert_eq!(ranked[2], "https://example.org/random");
    }

    #[test]
    fn test_blocklist_drops_course_aggregators() {
        let ranked = score_candidates(&[
            item("https://www.udemy.com/course/rust"),
            item("https://docs.rs.example.com/guide"),
        ]);
        assert_eq!(ranked.len(), 1);
        assert!(!ranked[0].contains("udemy"));
    }

    #[test]
    fn test_dedup_preserves_first() {
        let ranked = score_candidates(&[
            item("https://example.org/a"),
            item("https://example.org/a"),
        ]);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_topic_pages_score_zero() {
        let ranked = score_candidates(&[
            item("https://github.com/topics/rust"),
            item("https://github.com/rust-lang/rust"),
        ]);
        assert_eq!(ranked[0], "https://github.com/rust-lang/rust");
    }

    #[test]
    fn test_provider_response_shape() {
        let json = r#"{
            "web": {"results": [
                {"url": "https://a.org", "title": "A", "description": "about a"},
                {"url": "", "title": "empty", "description": ""}
            ]}
        }"#;
        let parsed: ProviderResponse = serde_json::from_str(json).unwrap();
        let results = parsed.web.unwrap().results;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://a.org");
    }
}
