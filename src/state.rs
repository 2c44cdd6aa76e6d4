//! The `KnowledgeBase` facade: wiring for the stores, shared HTTP client,
//! concurrency budgets and the operation surface external adapters
//! consume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::discovery;
use crate::fetch::rate_limit::HostRateLimiter;
use crate::index::lexical::LexicalIndex;
use crate::index::vector::VectorStore;
use crate::models::{
    AddOutcome, EntryStatus, ProcessOutcome, RefreshOutcome, SearchHit, SearchOptions,
    StatusReport,
};
use crate::queue;
use crate::refresh::{self, CronSchedule};
use crate::search;

/// Shared application state. Cloning is cheap; every field is a handle.
#[derive(Clone)]
pub struct KnowledgeBase {
    pub config: Config,
    pub(crate) catalog: Catalog,
    pub(crate) vectors: Arc<VectorStore>,
    pub(crate) lexical: Arc<LexicalIndex>,
    pub(crate) http: reqwest::Client,
    pub(crate) limiter: Arc<HostRateLimiter>,
    pub(crate) fetch_slots: Arc<tokio::sync::Semaphore>,
    pub(crate) enrich_slots: Arc<tokio::sync::Semaphore>,
    pub(crate) stop: Arc<AtomicBool>,
}

impl KnowledgeBase {
    /// Validate configuration, set up on-disk state and shared clients.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(config.workspace_dir())?;

        let catalog = Catalog::open(&config.catalog_path(), config.max_retries).await?;
        let vectors = VectorStore::open_or_create(&config.vector_dir(), config.llm.embedding_dim)?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        tracing::info!(
            "Knowledge base opened at {} ({} chunks indexed)",
            config.data_dir.display(),
            vectors.count()
        );

        Ok(Self {
            limiter: Arc::new(HostRateLimiter::new(config.rate_per_host)),
            fetch_slots: Arc::new(tokio::sync::Semaphore::new(config.concurrent_fetches)),
            enrich_slots: Arc::new(tokio::sync::Semaphore::new(config.enrich_concurrency)),
            stop: Arc::new(AtomicBool::new(false)),
            catalog,
            vectors: Arc::new(vectors),
            lexical: Arc::new(LexicalIndex::new()),
            http,
            config,
        })
    }

    /// Discover sources from a free-form input (URLs or research prompt)
    /// and register them as pending catalog entries.
    pub async fn add_sources(&self, input: &str) -> anyhow::Result<AddOutcome> {
        let result = discovery::discover(&self.http, &self.config, &self.catalog, input).await?;
        let outcome = self.catalog.insert_if_absent(&result.sources).await?;
        tracing::info!(
            "add_sources: {} added, {} already known",
            outcome.added,
            outcome.skipped
        );
        Ok(outcome)
    }

    /// Drain pending entries. `None` processes until the queue is empty.
    pub async fn process_queue(&self, max_batches: Option<usize>) -> anyhow::Result<ProcessOutcome> {
        queue::process_queue(self, max_batches).await
    }

    /// Hybrid retrieval over the indexed corpus.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> anyhow::Result<Vec<SearchHit>> {
        search::run_search(self, query, options).await
    }

    /// One refresh pass over entries whose refresh window elapsed.
    pub async fn refresh_once(&self) -> anyhow::Result<RefreshOutcome> {
        refresh::refresh_once(self).await
    }

    /// Catalog and index counters for operators.
    pub async fn status(&self) -> anyhow::Result<StatusReport> {
        let (by_status, by_kind) = self.catalog.counts().await?;
        let stats = self.vectors.stats();
        let quota = self.catalog.last_quota("web_search").await?;
        Ok(StatusReport {
            by_status,
            by_kind,
            chunk_count: stats.chunks,
            document_count: stats.documents,
            search_quota_remaining: quota,
        })
    }

    /// Delete pending and/or failed entries so they can be re-added.
    pub async fn clear_queue(&self, statuses: &[EntryStatus]) -> anyhow::Result<u64> {
        self.catalog.clear(statuses).await
    }

    /// Full wipe of both persistence roots. The catalog and the vector
    /// store only form a recoverable snapshot together, so they are
    /// always wiped together.
    pub async fn reset(&self) -> anyhow::Result<()> {
        self.catalog.delete_all().await?;
        self.vectors.clear()?;
        self.lexical.mark_dirty();
        tracing::warn!("Knowledge base reset: catalog and vector store wiped");
        Ok(())
    }

    /// Ask long-running loops to wind down at the next batch boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Run the auto-refresher on its cron schedule until a stop is
    /// requested. Does nothing when auto-refresh is disabled.
    pub async fn run_refresh_loop(&self) -> anyhow::Result<()> {
        if !self.config.refresh.enabled {
            tracing::info!("Auto-refresh disabled");
            return Ok(());
        }
        let schedule = CronSchedule::parse(&self.config.refresh.schedule)?;
        tracing::info!(
            "Auto-refresh scheduled ({})",
            self.config.refresh.schedule
        );

        while !self.stopped() {
            let now = chrono::Utc::now();
            let next = schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!("Next refresh window at {next}");
            tokio::time::sleep(wait).await;
            if self.stopped() {
                break;
            }
            match self.refresh_once().await {
                Ok(outcome) => tracing::info!(
                    "Refresh pass: {} checked, {} unchanged, {} updated, {} failed",
                    outcome.checked,
                    outcome.unchanged,
                    outcome.updated,
                    outcome.failed
                ),
                Err(e) => tracing::error!("Refresh pass failed: {e:#}"),
            }
        }
        Ok(())
    }
}
