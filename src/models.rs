use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// What kind of source a catalog entry points at. Detection happens at
/// discovery time from the normalized URL; `web_page` entries matching
/// documentation heuristics are promoted to `doc_site_page`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WebPage,
    DocSitePage,
    Repo,
    Video,
    VideoChannel,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::WebPage => "web_page",
            SourceKind::DocSitePage => "doc_site_page",
            SourceKind::Repo => "repo",
            SourceKind::Video => "video",
            SourceKind::VideoChannel => "video_channel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "web_page" => Some(SourceKind::WebPage),
            "doc_site_page" => Some(SourceKind::DocSitePage),
            "repo" => Some(SourceKind::Repo),
            "video" => Some(SourceKind::Video),
            "video_channel" => Some(SourceKind::VideoChannel),
            _ => None,
        }
    }
}

/// Lifecycle state of a catalog entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Fetched,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Fetched => "fetched",
            EntryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EntryStatus::Pending),
            "fetched" => Some(EntryStatus::Fetched),
            "failed" => Some(EntryStatus::Failed),
            _ => None,
        }
    }
}

/// How often an indexed source is re-checked for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    Never,
    Days(u32),
}

impl RefreshPolicy {
    /// Policy by source kind: videos are immutable, repos move fast,
    /// documentation slower, everything else monthly.
    pub fn for_kind(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Video | SourceKind::VideoChannel => RefreshPolicy::Never,
            SourceKind::Repo => RefreshPolicy::Days(7),
            SourceKind::DocSitePage => RefreshPolicy::Days(14),
            SourceKind::WebPage => RefreshPolicy::Days(30),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            RefreshPolicy::Never => "never".to_string(),
            RefreshPolicy::Days(n) => format!("days:{n}"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s == "never" {
            return Some(RefreshPolicy::Never);
        }
        s.strip_prefix("days:")
            .and_then(|n| n.parse().ok())
            .map(RefreshPolicy::Days)
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            RefreshPolicy::Never => None,
            RefreshPolicy::Days(n) => Some(Duration::days(*n as i64)),
        }
    }

    pub fn next_refresh(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval().map(|d| from + d)
    }
}

/// A row in the URL catalog. Identity is `url_hash`, a stable hash of the
/// normalized URL.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub url_hash: String,
    pub url: String,
    pub kind: SourceKind,
    pub status: EntryStatus,
    pub priority: i64,
    pub discovered_from: Option<String>,
    pub added_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub refresh_policy: RefreshPolicy,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// A candidate produced by discovery, not yet persisted.
#[derive(Debug, Clone)]
pub struct DiscoveredSource {
    /// Normalized URL
    pub url: String,
    pub kind: SourceKind,
    /// 100 for user-supplied URLs, 50 for search/crawl/channel discovery
    pub priority: i64,
    pub discovered_from: Option<String>,
}

/// Transient output of the discovery orchestrator.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub sources: Vec<DiscoveredSource>,
    /// True when the input contained literal URLs (no web search ran)
    pub direct_urls: bool,
}

/// One timestamped transcript segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_secs: f64,
    pub text: String,
}

/// Conditional-check validators captured at fetch time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocValidators {
    pub http_last_modified: Option<String>,
    pub http_etag: Option<String>,
    pub commit_id: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
}

/// Output of a fetcher: normalized text plus source metadata.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub kind: SourceKind,
    pub title: String,
    pub language: String,
    pub domain: String,
    /// Normalized UTF-8 body (markdown for web pages, file tree text for
    /// repos, joined transcript for videos)
    pub text: String,
    pub validators: DocValidators,
    /// Present for videos only
    pub segments: Vec<TranscriptSegment>,
    pub duration_secs: Option<u64>,
}

/// LLM-extracted topical metadata for one chunk. Empty on extraction
/// failure; never blocks ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedMetadata {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A fully processed chunk as stored in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    /// Hash of the source URL; groups all chunks of one document
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub embedding: Vec<f32>,
    pub text: String,
    pub source_url: String,
    pub kind: SourceKind,
    pub domain: String,
    pub title: String,
    /// Nearest markdown heading or repo file path, when applicable
    pub heading: Option<String>,
    /// First transcript timestamp covered by this chunk
    pub timestamp_start: Option<f64>,
    /// Hash of the fetched normalized text; identical for all chunks of a
    /// document
    pub content_hash: String,
    pub http_last_modified: Option<String>,
    pub http_etag: Option<String>,
    pub commit_id: Option<String>,
    pub enriched: EnrichedMetadata,
    pub has_code: bool,
    pub token_count: usize,
    pub fetched_at: DateTime<Utc>,
}

/// Metadata equality filter for vector searches.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub kind: Option<SourceKind>,
    pub domain: Option<String>,
}

impl SearchFilter {
    pub fn matches(&self, chunk: &ChunkRecord) -> bool {
        if let Some(kind) = self.kind {
            if chunk.kind != kind {
                return false;
            }
        }
        if let Some(domain) = &self.domain {
            if &chunk.domain != domain {
                return false;
            }
        }
        true
    }
}

/// Caller-toggleable retrieval stages.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub k: usize,
    pub hybrid: bool,
    pub rerank: bool,
    pub expand: bool,
    pub filter: SearchFilter,
    /// Overrides the config default; `Some` also applies after reranking
    pub similarity_threshold: Option<f32>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 5,
            hybrid: true,
            rerank: true,
            expand: false,
            filter: SearchFilter::default(),
            similarity_threshold: None,
        }
    }
}

/// Which stage produced the score attached to a hit.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    CosineSimilarity,
    Rrf,
    Rerank,
}

/// One retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
    pub score_kind: ScoreKind,
    pub source_url: String,
    pub kind: SourceKind,
    pub domain: String,
    pub title: String,
    pub heading: Option<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub summary: String,
    pub topics: Vec<String>,
    pub difficulty: Difficulty,
}

impl SearchHit {
    pub fn from_chunk(chunk: &ChunkRecord, score: f32, score_kind: ScoreKind) -> Self {
        Self {
            text: chunk.text.clone(),
            score,
            score_kind,
            source_url: chunk.source_url.clone(),
            kind: chunk.kind,
            domain: chunk.domain.clone(),
            title: chunk.title.clone(),
            heading: chunk.heading.clone(),
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            summary: chunk.enriched.summary.clone(),
            topics: chunk.enriched.topics.clone(),
            difficulty: chunk.enriched.difficulty,
        }
    }
}

/// Outcome of `add_sources`.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: usize,
    pub skipped: usize,
}

/// Outcome of `process_queue`.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub succeeded: usize,
    pub failed: usize,
    /// Entries that completed without producing chunks (channel
    /// expansions, crawl-only passes)
    pub skipped: usize,
}

/// Outcome of a refresh pass.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub checked: usize,
    pub unchanged: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub by_status: HashMap<String, i64>,
    pub by_kind: HashMap<String, i64>,
    pub chunk_count: usize,
    pub document_count: usize,
    /// Most recent remaining-quota figure reported by the search provider
    pub search_quota_remaining: Option<i64>,
}
