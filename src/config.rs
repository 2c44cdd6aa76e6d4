use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the catalog DB, vector collection and scratch workspaces live
    pub data_dir: PathBuf,
    /// User-Agent sent on all HTTP requests
    pub user_agent: String,
    /// Entries claimed per queue batch
    pub batch_size: usize,
    /// Concurrent fetches across all hosts
    pub concurrent_fetches: usize,
    /// Attempts before a transient failure sticks as failed
    pub max_retries: u32,
    /// Token-bucket emission rate per host (requests per second)
    pub rate_per_host: f64,
    /// Bounded concurrency for LLM metadata enrichment
    pub enrich_concurrency: usize,
    /// Query-parameter keys stripped during URL normalization, in
    /// addition to the `utm_*` prefix
    pub tracking_params: Vec<String>,
    /// Chunking bounds (approximate whitespace tokens)
    pub chunking: ChunkingConfig,
    /// Crawler limits for documentation domains
    pub crawl: CrawlConfig,
    /// Refresh scheduling
    pub refresh: RefreshConfig,
    /// Channel expansion caps
    pub channel_max_videos: usize,
    pub channel_max_videos_full: usize,
    /// Second discovery pass asking the LLM for competing technologies
    pub enable_competitor_queries: bool,
    /// Similarity floor applied to semantic-only searches
    pub similarity_threshold: f32,
    /// Web-search provider
    pub search_provider: SearchProviderConfig,
    /// LLM provider (query analysis, enrichment, embeddings)
    pub llm: LlmConfig,
    /// Cross-encoder reranker sidecar
    pub reranker: RerankerConfig,
    /// Transcript provider for video sources
    pub transcript: TranscriptConfig,
    /// Optional headless-rendering service for JS-heavy pages
    pub render_endpoint: Option<String>,
    /// Log filter applied when the embedding application installs one
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Page cap per crawl (0 disables discovery entirely)
    pub max_pages: usize,
    /// Soft wall-clock bound per crawl, seconds
    pub soft_time_limit_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub enabled: bool,
    /// Five-field cron expression, local to UTC (default: Monday 03:00)
    pub schedule: String,
    /// Entries examined per refresh pass
    pub batch_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProviderConfig {
    /// Search API endpoint (Brave-compatible response shape)
    pub endpoint: String,
    /// Subscription token presented via header
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model for query synthesis and expansion
    pub query_model: String,
    /// Model for metadata enrichment (may equal `query_model`)
    pub enrich_model: String,
    /// Model for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Embedding vector dimension; changing it requires a full rebuild
    pub embedding_dim: usize,
}

/// Configuration for the cross-encoder reranker sidecar (e.g. llama-server
/// with a reranker model behind `/v1/rerank`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// If None, reranking silently falls back to the pre-rerank order.
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Request timeout in seconds (capped at 30).
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    /// Transcript service base URL; `GET {base}/transcripts/{video_id}`
    /// returns timestamped segments.
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            user_agent: "corpus-search/0.1 (knowledge base builder)".to_string(),
            batch_size: 10,
            concurrent_fetches: 3,
            max_retries: 3,
            rate_per_host: 1.0,
            enrich_concurrency: 2,
            tracking_params: vec![
                "ref".to_string(),
                "fbclid".to_string(),
                "gclid".to_string(),
                "igshid".to_string(),
                "mc_cid".to_string(),
                "mc_eid".to_string(),
            ],
            chunking: ChunkingConfig::default(),
            crawl: CrawlConfig::default(),
            refresh: RefreshConfig::default(),
            channel_max_videos: 50,
            channel_max_videos_full: 500,
            enable_competitor_queries: false,
            similarity_threshold: 0.3,
            search_provider: SearchProviderConfig::default(),
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
            transcript: TranscriptConfig::default(),
            render_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: 100,
            max_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 1000,
            soft_time_limit_secs: 600,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 3 * * 1".to_string(),
            batch_limit: 100,
        }
    }
}

impl Default for SearchProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.search.brave.com/res/v1/web/search".to_string(),
            api_key: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            query_model: "mistral:7b".to_string(),
            enrich_model: "mistral:7b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
            embedding_dim: 768,
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            timeout_secs: 10,
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8300".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(v) = val.parse() {
            *target = v;
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CORPUS_SEARCH_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(ua) = std::env::var("CORPUS_SEARCH_USER_AGENT") {
            config.user_agent = ua;
        }
        env_parse("CORPUS_SEARCH_BATCH_SIZE", &mut config.batch_size);
        env_parse(
            "CORPUS_SEARCH_CONCURRENT_FETCHES",
            &mut config.concurrent_fetches,
        );
        env_parse("CORPUS_SEARCH_MAX_RETRIES", &mut config.max_retries);
        env_parse("CORPUS_SEARCH_RATE_PER_HOST", &mut config.rate_per_host);
        env_parse(
            "CORPUS_SEARCH_ENRICH_CONCURRENCY",
            &mut config.enrich_concurrency,
        );
        env_parse("CORPUS_SEARCH_CHUNK_MIN", &mut config.chunking.min_tokens);
        env_parse("CORPUS_SEARCH_CHUNK_MAX", &mut config.chunking.max_tokens);
        env_parse(
            "CORPUS_SEARCH_CHUNK_OVERLAP",
            &mut config.chunking.overlap_tokens,
        );
        env_parse("CORPUS_SEARCH_CRAWL_MAX_PAGES", &mut config.crawl.max_pages);
        env_parse(
            "CORPUS_SEARCH_CRAWL_TIME_LIMIT_SECS",
            &mut config.crawl.soft_time_limit_secs,
        );
        env_parse(
            "CORPUS_SEARCH_CHANNEL_MAX_VIDEOS",
            &mut config.channel_max_videos,
        );
        env_parse(
            "CORPUS_SEARCH_CHANNEL_MAX_VIDEOS_FULL",
            &mut config.channel_max_videos_full,
        );
        env_parse(
            "CORPUS_SEARCH_ENABLE_COMPETITOR_QUERIES",
            &mut config.enable_competitor_queries,
        );
        env_parse(
            "CORPUS_SEARCH_SIMILARITY_THRESHOLD",
            &mut config.similarity_threshold,
        );
        env_parse("CORPUS_SEARCH_AUTO_REFRESH", &mut config.refresh.enabled);
        if let Ok(schedule) = std::env::var("CORPUS_SEARCH_REFRESH_SCHEDULE") {
            config.refresh.schedule = schedule;
        }
        env_parse(
            "CORPUS_SEARCH_REFRESH_BATCH_LIMIT",
            &mut config.refresh.batch_limit,
        );
        if let Ok(level) = std::env::var("CORPUS_SEARCH_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(url) = std::env::var("CORPUS_SEARCH_RENDER_ENDPOINT") {
            config.render_endpoint = Some(url);
        }

        if let Ok(endpoint) = std::env::var("SEARCH_API_ENDPOINT") {
            config.search_provider.endpoint = endpoint;
        }
        if let Ok(key) = std::env::var("SEARCH_API_KEY") {
            config.search_provider.api_key = Some(key);
        }

        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_QUERY_MODEL") {
            config.llm.query_model = model;
        }
        if let Ok(model) = std::env::var("LLM_ENRICH_MODEL") {
            config.llm.enrich_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        env_parse("LLM_EMBEDDING_DIM", &mut config.llm.embedding_dim);

        if let Ok(url) = std::env::var("RERANKER_BASE_URL") {
            config.reranker.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("RERANKER_MODEL") {
            config.reranker.model = Some(model);
        }
        if let Ok(val) = std::env::var("RERANKER_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.reranker.timeout_secs = v.min(30);
            }
        }

        if let Ok(url) = std::env::var("TRANSCRIPT_BASE_URL") {
            config.transcript.base_url = url;
        }

        config
    }

    /// Startup validation. A bad value here means the process should exit
    /// non-zero rather than limp along.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.batch_size == 0 {
            return Err(StoreError::Config("batch_size must be > 0".into()));
        }
        if self.concurrent_fetches == 0 {
            return Err(StoreError::Config(
                "concurrent_fetches must be > 0".into(),
            ));
        }
        if self.llm.embedding_dim == 0 {
            return Err(StoreError::Config("embedding_dim must be > 0".into()));
        }
        if self.chunking.min_tokens >= self.chunking.max_tokens {
            return Err(StoreError::Config(
                "chunk min_tokens must be below max_tokens".into(),
            ));
        }
        if self.chunking.overlap_tokens >= self.chunking.min_tokens {
            return Err(StoreError::Config(
                "chunk overlap must be below min_tokens".into(),
            ));
        }
        if self.rate_per_host <= 0.0 {
            return Err(StoreError::Config("rate_per_host must be > 0".into()));
        }
        if self.llm.base_url.is_empty() {
            return Err(StoreError::Config("LLM base_url is required".into()));
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.db")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_chunk_bounds_rejected() {
        let mut config = Config::default();
        config.chunking.min_tokens = 600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlap_below_min_enforced() {
        let mut config = Config::default();
        config.chunking.overlap_tokens = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_helpers() {
        let config = Config::default();
        assert!(config.catalog_path().ends_with("catalog.db"));
        assert!(config.vector_dir().ends_with("vectors"));
    }
}
