//! Queue processor: drains pending catalog entries into indexed chunks.
//!
//! Each batch is claimed atomically, partitioned by kind, and processed
//! under the global fetch budget with per-host pacing. Crawl-eligible
//! pages route through the crawler (which only enqueues more entries);
//! channel entries route through the expander; everything else fetches,
//! chunks, enriches, embeds and lands in the vector index with
//! delete-before-insert replacement.

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chunking;
use crate::crawler::Crawler;
use crate::discovery::DISCOVERED_PRIORITY;
use crate::error::FetchError;
use crate::fetch::html::HtmlFetcher;
use crate::fetch::repo::RepoFetcher;
use crate::fetch::video::{VideoChannelExpander, VideoFetcher};
use crate::llm::embeddings::embed_chunks;
use crate::llm::enrich;
use crate::models::{
    CatalogEntry, ChunkRecord, DiscoveredSource, FetchedDocument, ProcessOutcome, RefreshPolicy,
    SourceKind,
};
use crate::state::KnowledgeBase;
use crate::urls;

enum EntryOutcome {
    /// Document fetched and chunks indexed
    Indexed,
    /// Completed without chunkable output (channel expansion, stop)
    Skipped,
    Failed,
}

/// Drain the pending queue. Stops when it is empty, `max_batches` is
/// reached, or a stop is requested between batches.
pub async fn process_queue(
    kb: &KnowledgeBase,
    max_batches: Option<usize>,
) -> Result<ProcessOutcome> {
    let mut outcome = ProcessOutcome::default();
    let mut batches = 0usize;

    loop {
        if kb.stopped() {
            tracing::info!("Queue processor stopping on request");
            break;
        }
        if let Some(max) = max_batches {
            if batches >= max {
                break;
            }
        }

        let batch = kb.catalog.claim_batch(kb.config.batch_size).await?;
        if batch.is_empty() {
            break;
        }
        tracing::info!("Processing batch of {} entries", batch.len());

        let mut tasks = tokio::task::JoinSet::new();
        for entry in batch {
            let kb = kb.clone();
            tasks.spawn(async move { process_entry(&kb, entry).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(EntryOutcome::Indexed) => outcome.succeeded += 1,
                Ok(EntryOutcome::Skipped) => outcome.skipped += 1,
                Ok(EntryOutcome::Failed) => outcome.failed += 1,
                Err(e) => {
                    tracing::error!("Entry task panicked: {e}");
                    outcome.failed += 1;
                }
            }
        }
        batches += 1;
    }

    tracing::info!(
        "Queue pass complete: {} succeeded, {} failed, {} skipped",
        outcome.succeeded,
        outcome.failed,
        outcome.skipped
    );
    Ok(outcome)
}

async fn process_entry(kb: &KnowledgeBase, entry: CatalogEntry) -> EntryOutcome {
    if kb.stopped() {
        let _ = kb.catalog.release_claim(&entry.url_hash).await;
        return EntryOutcome::Skipped;
    }

    tracing::info!("Processing {} ({})", entry.url, entry.kind.as_str());

    match entry.kind {
        SourceKind::VideoChannel => process_channel(kb, &entry).await,
        _ => process_document_entry(kb, entry).await,
    }
}

/// Channels only enumerate videos; the channel entry itself is marked
/// fetched after successful expansion.
async fn process_channel(kb: &KnowledgeBase, entry: &CatalogEntry) -> EntryOutcome {
    let expanded = {
        let _slot = kb.fetch_slots.acquire().await;
        if let Some(host) = urls::host_of(&entry.url) {
            kb.limiter.acquire(&host).await;
        }
        let expander =
            VideoChannelExpander::new(kb.http.clone(), kb.config.channel_max_videos);
        expander.expand(&entry.url).await
    };

    match expanded {
        Ok(video_urls) => {
            let sources: Vec<DiscoveredSource> = video_urls
                .iter()
                .filter_map(|raw| urls::normalize(raw, &kb.config.tracking_params))
                .map(|url| DiscoveredSource {
                    url,
                    kind: SourceKind::Video,
                    priority: DISCOVERED_PRIORITY,
                    discovered_from: Some(format!("channel:{}", entry.url)),
                })
                .collect();

            let added = match kb.catalog.insert_if_absent(&sources).await {
                Ok(outcome) => outcome.added,
                Err(e) => {
                    tracing::error!("Failed to insert channel videos: {e:#}");
                    let _ = kb.catalog.mark_failed(&entry.url_hash, &e.to_string(), false).await;
                    return EntryOutcome::Failed;
                }
            };
            tracing::info!("Channel {} expanded to {added} new videos", entry.url);

            if kb
                .catalog
                .mark_fetched(&entry.url_hash, Utc::now(), None)
                .await
                .is_err()
            {
                return EntryOutcome::Failed;
            }
            EntryOutcome::Skipped
        }
        Err(err) => fail_entry(kb, entry, &err).await,
    }
}

async fn process_document_entry(kb: &KnowledgeBase, mut entry: CatalogEntry) -> EntryOutcome {
    // Documentation-style pages get one crawl pass before their own fetch.
    if crawl_eligible(&entry) {
        if entry.kind == SourceKind::WebPage {
            entry.kind = SourceKind::DocSitePage;
            if let Err(e) = kb.catalog.reclassify(&entry.url_hash, entry.kind).await {
                tracing::warn!("Reclassify of {} failed: {e:#}", entry.url);
            }
        }
        if let Err(e) = crawl_and_enqueue(kb, &entry).await {
            // Crawl trouble does not doom the entry; its own fetch decides.
            tracing::warn!("Crawl of {} failed: {e:#}", entry.url);
        }
    }

    let fetched = {
        let _slot = kb.fetch_slots.acquire().await;
        if let Some(host) = urls::host_of(&entry.url) {
            kb.limiter.acquire(&host).await;
        }
        fetch_document(kb, &entry.url, entry.kind).await
    };

    let doc = match fetched {
        Ok(doc) => {
            if let Some(host) = urls::host_of(&entry.url) {
                kb.limiter.clear_backoff(&host);
            }
            doc
        }
        Err(err) => return fail_entry(kb, &entry, &err).await,
    };

    if kb.stopped() {
        let _ = kb.catalog.release_claim(&entry.url_hash).await;
        return EntryOutcome::Skipped;
    }

    match ingest_document(kb, &entry.url, &doc).await {
        Ok(chunk_count) => {
            let now = Utc::now();
            let next = RefreshPolicy::for_kind(entry.kind).next_refresh(now);
            if let Err(e) = kb.catalog.mark_fetched(&entry.url_hash, now, next).await {
                tracing::error!("mark_fetched for {} failed: {e:#}", entry.url);
                return EntryOutcome::Failed;
            }
            tracing::info!("Indexed {}: {chunk_count} chunks", entry.url);
            EntryOutcome::Indexed
        }
        Err(err) => fail_entry(kb, &entry, &err).await,
    }
}

async fn fail_entry(kb: &KnowledgeBase, entry: &CatalogEntry, err: &FetchError) -> EntryOutcome {
    tracing::warn!("Fetch of {} failed: {err}", entry.url);
    if err.is_transient() {
        if let Some(host) = urls::host_of(&entry.url) {
            kb.limiter.apply_backoff(&host);
        }
    }
    match kb
        .catalog
        .mark_failed(&entry.url_hash, &err.to_string(), !err.is_transient())
        .await
    {
        Ok(_) => EntryOutcome::Failed,
        Err(e) => {
            tracing::error!("mark_failed for {} failed: {e:#}", entry.url);
            EntryOutcome::Failed
        }
    }
}

/// Whether this entry should trigger link discovery before its fetch:
/// documentation-style, and not itself the product of a crawl.
pub fn crawl_eligible(entry: &CatalogEntry) -> bool {
    if entry
        .discovered_from
        .as_deref()
        .is_some_and(|d| d.starts_with("crawl:"))
    {
        return false;
    }
    match entry.kind {
        SourceKind::DocSitePage => true,
        SourceKind::WebPage => urls::is_documentation_like(&entry.url),
        _ => false,
    }
}

/// Run the crawler within one fetch slot and register everything it
/// found as ordinary pending pages.
async fn crawl_and_enqueue(kb: &KnowledgeBase, entry: &CatalogEntry) -> Result<usize> {
    let discovered = {
        let _slot = kb.fetch_slots.acquire().await;
        let crawler = Crawler::new(
            kb.http.clone(),
            kb.limiter.clone(),
            kb.config.crawl,
            kb.config.tracking_params.clone(),
        );
        crawler.crawl(&entry.url).await?
    };

    let sources: Vec<DiscoveredSource> = discovered
        .into_iter()
        .filter(|url| url != &entry.url)
        .map(|url| DiscoveredSource {
            url,
            kind: SourceKind::WebPage,
            priority: DISCOVERED_PRIORITY,
            discovered_from: Some(format!("crawl:{}", entry.url)),
        })
        .collect();

    let outcome = kb.catalog.insert_if_absent(&sources).await?;
    tracing::info!(
        "Crawl of {} enqueued {} new pages ({} already known)",
        entry.url,
        outcome.added,
        outcome.skipped
    );
    Ok(outcome.added)
}

/// Dispatch to the fetcher for a kind. Shared with the refresher.
pub(crate) async fn fetch_document(
    kb: &KnowledgeBase,
    url: &str,
    kind: SourceKind,
) -> Result<FetchedDocument, FetchError> {
    match kind {
        SourceKind::WebPage | SourceKind::DocSitePage => {
            HtmlFetcher::new(kb.http.clone(), kb.config.render_endpoint.clone())
                .fetch(url, kind)
                .await
        }
        SourceKind::Repo => RepoFetcher::new(kb.config.workspace_dir()).fetch(url).await,
        SourceKind::Video => {
            VideoFetcher::new(kb.http.clone(), kb.config.transcript.base_url.clone())
                .fetch(url)
                .await
        }
        SourceKind::VideoChannel => Err(FetchError::Permanent(
            "channel entries are expanded, not fetched".to_string(),
        )),
    }
}

/// Chunk → enrich (bounded) + embed (batched) → replace in the vector
/// index. Replacement always deletes the source's previous chunks first,
/// which is a no-op on first ingest and the update mechanism on refresh.
pub(crate) async fn ingest_document(
    kb: &KnowledgeBase,
    source_url: &str,
    doc: &FetchedDocument,
) -> Result<usize, FetchError> {
    let chunks = chunking::chunk_document(doc, &kb.config.chunking);
    if chunks.is_empty() {
        return Err(FetchError::Permanent(format!(
            "no chunkable content in {source_url}"
        )));
    }

    let content_hash = content_hash(&doc.text);
    let document_id = urls::url_hash(source_url);
    let total = chunks.len();

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embed_chunks(&kb.http, &kb.config.llm, &texts)
        .await
        .map_err(|e| FetchError::Transient(format!("embedding failed: {e:#}")))?;

    // Enrichment runs concurrently per chunk but bounded, so the LLM
    // endpoint is never flooded by a large document.
    let mut enrich_tasks = Vec::with_capacity(total);
    for chunk in &chunks {
        let client = kb.http.clone();
        let llm = kb.config.llm.clone();
        let text = chunk.text.clone();
        let slots = kb.enrich_slots.clone();
        enrich_tasks.push(tokio::spawn(async move {
            let _permit = slots.acquire().await;
            enrich::enrich(&client, &llm, &text).await
        }));
    }
    let mut enriched = Vec::with_capacity(total);
    for task in enrich_tasks {
        enriched.push(task.await.unwrap_or_default());
    }

    let now = Utc::now();
    let records: Vec<ChunkRecord> = chunks
        .iter()
        .zip(embeddings)
        .zip(enriched)
        .enumerate()
        .map(|(index, ((chunk, embedding), enriched))| ChunkRecord {
            id: Uuid::new_v4(),
            document_id: document_id.clone(),
            chunk_index: index,
            total_chunks: total,
            embedding,
            text: chunk.text.clone(),
            source_url: source_url.to_string(),
            kind: doc.kind,
            domain: doc.domain.clone(),
            title: doc.title.clone(),
            heading: chunk.heading.clone(),
            timestamp_start: chunk.timestamp_start,
            content_hash: content_hash.clone(),
            http_last_modified: doc.validators.http_last_modified.clone(),
            http_etag: doc.validators.http_etag.clone(),
            commit_id: doc.validators.commit_id.clone(),
            enriched,
            has_code: chunking::has_code(&chunk.text),
            token_count: chunk.token_count,
            fetched_at: now,
        })
        .collect();

    kb.vectors
        .replace_source(source_url, records)
        .map_err(|e| FetchError::Transient(format!("vector store write failed: {e:#}")))?;
    kb.lexical.mark_dirty();

    Ok(total)
}

/// Hash of the fetched normalized text; the deepest change detector.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in &digest[..16] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::EntryStatus;

    fn entry(url: &str, kind: SourceKind, discovered_from: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            url_hash: urls::url_hash(url),
            url: url.to_string(),
            kind,
            status: EntryStatus::Pending,
            priority: 50,
            discovered_from: discovered_from.map(|s| s.to_string()),
            added_at: Utc::now(),
            last_fetched_at: None,
            next_refresh_at: None,
            refresh_policy: RefreshPolicy::for_kind(kind),
            retry_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_doc_site_pages_are_crawl_eligible() {
        let e = entry("https://docs.example.com/", SourceKind::DocSitePage, None);
        assert!(crawl_eligible(&e));
    }

    #[test]
    fn test_plain_web_pages_are_not() {
        let e = entry("https://example.org/pricing", SourceKind::WebPage, None);
        assert!(!crawl_eligible(&e));
    }

    #[test]
    fn test_doc_like_web_pages_are_promotable() {
        let e = entry("https://wiki.example.org/Page", SourceKind::WebPage, None);
        assert!(crawl_eligible(&e));
    }

    #[test]
    fn test_crawl_discovered_never_recrawled() {
        let e = entry(
            "https://docs.example.com/guide",
            SourceKind::DocSitePage,
            Some("crawl:https://docs.example.com/"),
        );
        assert!(!crawl_eligible(&e));

        let e = entry(
            "https://docs.example.com/guide",
            SourceKind::WebPage,
            Some("crawl:https://docs.example.com/"),
        );
        assert!(!crawl_eligible(&e));
    }

    #[test]
    fn test_repos_and_videos_never_crawl() {
        assert!(!crawl_eligible(&entry(
            "https://github.com/a/b",
            SourceKind::Repo,
            None
        )));
        assert!(!crawl_eligible(&entry(
            "https://www.youtube.com/watch?v=x",
            SourceKind::Video,
            None
        )));
    }

    #[test]
    fn test_content_hash_stable_and_distinct() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("hello!"));
        assert_eq!(content_hash("x").len(), 32);
    }
}
