//! Integration tests for the ingestion and retrieval pipeline.
//!
//! These exercise the catalog, both indexes and the fusion pipeline over
//! real on-disk state without requiring a network, an LLM or a search
//! provider (fetching and embedding are simulated).

use chrono::{Duration, Utc};
use uuid::Uuid;

use corpus_search::catalog::Catalog;
use corpus_search::config::Config;
use corpus_search::index::lexical::LexicalIndex;
use corpus_search::index::vector::VectorStore;
use corpus_search::models::{
    AddOutcome, ChunkRecord, DiscoveredSource, EnrichedMetadata, EntryStatus, RefreshPolicy,
    SearchFilter, SourceKind,
};
use corpus_search::search::rrf_fuse;
use corpus_search::state::KnowledgeBase;
use corpus_search::urls;

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.to_path_buf();
    config.llm.embedding_dim = 3;
    config
}

/// Helper: a chunk with a hand-made embedding, as the embedder would
/// produce for one source URL.
fn make_chunk(source_url: &str, text: &str, embedding: Vec<f32>) -> ChunkRecord {
    ChunkRecord {
        id: Uuid::new_v4(),
        document_id: urls::url_hash(source_url),
        chunk_index: 0,
        total_chunks: 1,
        embedding,
        text: text.to_string(),
        source_url: source_url.to_string(),
        kind: SourceKind::WebPage,
        domain: urls::host_of(source_url).unwrap_or_default(),
        title: "Test".to_string(),
        heading: None,
        timestamp_start: None,
        content_hash: "hash-v1".to_string(),
        http_last_modified: None,
        http_etag: Some("\"abc\"".to_string()),
        commit_id: None,
        enriched: EnrichedMetadata::default(),
        has_code: false,
        token_count: text.split_whitespace().count(),
        fetched_at: Utc::now(),
    }
}

// ─── S1/S2: discovery, normalization and dedup ──────────

#[tokio::test]
async fn test_url_direct_ingest_catalogs_normalized_entry() {
    let dir = tempfile::tempdir().unwrap();
    let kb = KnowledgeBase::open(test_config(dir.path())).await.unwrap();

    let outcome = kb
        .add_sources("https://example.org/docs/intro?utm_source=x#top")
        .await
        .unwrap();
    assert_eq!(outcome, AddOutcome { added: 1, skipped: 0 });

    let status = kb.status().await.unwrap();
    assert_eq!(status.by_status.get("pending"), Some(&1));
    assert_eq!(status.by_kind.get("doc_site_page"), Some(&1));
}

#[tokio::test]
async fn test_normalization_equivalent_pair_dedupes() {
    let dir = tempfile::tempdir().unwrap();
    let kb = KnowledgeBase::open(test_config(dir.path())).await.unwrap();

    let first = kb.add_sources("HTTP://EXAMPLE.ORG/a/").await.unwrap();
    assert_eq!(first, AddOutcome { added: 1, skipped: 0 });

    let second = kb.add_sources("http://example.org/a").await.unwrap();
    assert_eq!(second, AddOutcome { added: 0, skipped: 1 });

    let status = kb.status().await.unwrap();
    let total: i64 = status.by_status.values().sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_mixed_input_types_detected() {
    let dir = tempfile::tempdir().unwrap();
    let kb = KnowledgeBase::open(test_config(dir.path())).await.unwrap();

    kb.add_sources(
        "https://github.com/rust-lang/rust and \
         https://www.youtube.com/watch?v=abc123def45 and \
         https://www.youtube.com/@rustvideos",
    )
    .await
    .unwrap();

    let status = kb.status().await.unwrap();
    assert_eq!(status.by_kind.get("repo"), Some(&1));
    assert_eq!(status.by_kind.get("video"), Some(&1));
    assert_eq!(status.by_kind.get("video_channel"), Some(&1));
}

// ─── S3: crawl bookkeeping and cycle prevention ─────────

#[tokio::test]
async fn test_crawl_discovered_entries_marked_and_never_recrawled() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(&dir.path().join("catalog.db"), 3)
        .await
        .unwrap();

    let start = "https://docs.example.com/";
    catalog
        .insert_if_absent(&[DiscoveredSource {
            url: start.to_string(),
            kind: SourceKind::DocSitePage,
            priority: 100,
            discovered_from: None,
        }])
        .await
        .unwrap();

    // what the crawler inserts for three discovered in-site pages
    let discovered: Vec<DiscoveredSource> = ["a", "b", "c"]
        .iter()
        .map(|page| DiscoveredSource {
            url: format!("https://docs.example.com/{page}"),
            kind: SourceKind::WebPage,
            priority: 50,
            discovered_from: Some(format!("crawl:{start}")),
        })
        .collect();
    let outcome = catalog.insert_if_absent(&discovered).await.unwrap();
    assert_eq!(outcome.added, 3);

    let batch = catalog.claim_batch(10).await.unwrap();
    assert_eq!(batch.len(), 4);

    for entry in &batch {
        if entry.url == start {
            assert!(corpus_search::queue::crawl_eligible(entry));
        } else {
            assert_eq!(
                entry.discovered_from.as_deref(),
                Some("crawl:https://docs.example.com/")
            );
            // doc-like host, but crawl-discovered: never crawled again
            assert!(!corpus_search::queue::crawl_eligible(entry));
        }
    }
}

// ─── S4: refresh validators ─────────────────────────────

#[tokio::test]
async fn test_unchanged_etag_skips_index_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::open_or_create(&dir.path().join("vectors"), 3).unwrap();

    let url = "https://example.org/doc";
    store
        .add(vec![make_chunk(url, "stored passage", vec![1.0, 0.0, 0.0])])
        .unwrap();

    let stored = store.get_by_source_url(url);
    let first = stored.first().unwrap();

    // HEAD reports the same ETag: the refresher must not touch the index
    assert!(corpus_search::refresh::validators_unchanged(
        first.http_last_modified.as_deref(),
        first.http_etag.as_deref(),
        None,
        Some("\"abc\""),
    ));

    // a changed ETag with no Last-Modified forces a re-fetch
    assert!(!corpus_search::refresh::validators_unchanged(
        first.http_last_modified.as_deref(),
        first.http_etag.as_deref(),
        None,
        Some("\"def\""),
    ));
}

#[tokio::test]
async fn test_refresh_schedule_advances_for_due_entries() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(&dir.path().join("catalog.db"), 3)
        .await
        .unwrap();

    catalog
        .insert_if_absent(&[DiscoveredSource {
            url: "https://docs.example.com/page".to_string(),
            kind: SourceKind::DocSitePage,
            priority: 50,
            discovered_from: None,
        }])
        .await
        .unwrap();
    let entry = catalog.claim_batch(1).await.unwrap().remove(0);

    let past = Utc::now() - Duration::days(20);
    catalog
        .mark_fetched(&entry.url_hash, past, Some(past + Duration::days(14)))
        .await
        .unwrap();

    let due = catalog.due_for_refresh(Utc::now(), 100).await.unwrap();
    assert_eq!(due.len(), 1);

    // unchanged outcome still advances the bookkeeping
    let now = Utc::now();
    catalog
        .touch_refreshed(&entry.url_hash, now, Some(now + Duration::days(14)))
        .await
        .unwrap();
    assert!(catalog.due_for_refresh(Utc::now(), 100).await.unwrap().is_empty());

    let refreshed = catalog.get(&entry.url_hash).await.unwrap().unwrap();
    assert_eq!(refreshed.status, EntryStatus::Fetched);
    assert!(refreshed.last_fetched_at.unwrap() > past);
}

// ─── S5: hybrid retrieval over a small corpus ───────────

#[tokio::test]
async fn test_hybrid_fusion_surfaces_topical_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::open_or_create(&dir.path().join("vectors"), 3).unwrap();

    // three OAuth chunks near the "auth" direction, one unrelated
    let corpus = vec![
        make_chunk(
            "https://a.org/oauth-1",
            "OAuth 2.0 token-based authentication flows",
            vec![0.9, 0.1, 0.0],
        ),
        make_chunk(
            "https://a.org/oauth-2",
            "Issuing OAuth bearer tokens for API access",
            vec![0.85, 0.15, 0.0],
        ),
        make_chunk(
            "https://a.org/oauth-3",
            "Refreshing expired OAuth access tokens",
            vec![0.8, 0.2, 0.0],
        ),
        make_chunk(
            "https://a.org/unicorns",
            "Unicorns are mythical horned horses",
            vec![0.0, 0.1, 0.95],
        ),
    ];
    store.add(corpus.clone()).unwrap();

    let lexical = LexicalIndex::new();
    lexical.build(&store.lexical_snapshot()).unwrap();

    // query "token-based auth" embedded near the auth direction
    let semantic = store.search(&[1.0, 0.1, 0.0], 20, &SearchFilter::default());
    let lexical_hits = lexical.search("token-based auth", 20).unwrap();
    let lexical_pairs: Vec<(ChunkRecord, f32)> = lexical_hits
        .iter()
        .filter_map(|hit| {
            corpus
                .iter()
                .find(|c| c.id == hit.chunk_id)
                .map(|c| (c.clone(), hit.score))
        })
        .collect();
    assert!(!lexical_pairs.is_empty());

    let fused = rrf_fuse(&semantic, &lexical_pairs);
    let top3: Vec<&str> = fused.iter().take(3).map(|(c, _)| c.text.as_str()).collect();

    assert_eq!(top3.len(), 3);
    assert!(top3.iter().all(|text| text.contains("OAuth")));
    assert!(!top3.iter().any(|text| text.contains("Unicorns")));
}

// ─── S6: failure accounting ─────────────────────────────

#[tokio::test]
async fn test_three_transient_failures_stick_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(&dir.path().join("catalog.db"), 3)
        .await
        .unwrap();

    catalog
        .insert_if_absent(&[DiscoveredSource {
            url: "https://example.org/flaky".to_string(),
            kind: SourceKind::WebPage,
            priority: 50,
            discovered_from: None,
        }])
        .await
        .unwrap();

    let hash = urls::url_hash("https://example.org/flaky");
    for _ in 0..3 {
        let batch = catalog.claim_batch(10).await.unwrap();
        if batch.is_empty() {
            break;
        }
        catalog
            .mark_failed(&hash, "HTTP 500 from https://example.org/flaky", false)
            .await
            .unwrap();
    }

    let entry = catalog.get(&hash).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.retry_count, 3);
    assert!(entry.last_error.as_deref().unwrap().contains("500"));

    // a subsequent queue pass must not re-attempt the entry
    assert!(catalog.claim_batch(10).await.unwrap().is_empty());
}

// ─── Idempotence and maintenance ────────────────────────

#[tokio::test]
async fn test_process_queue_on_empty_catalog_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let kb = KnowledgeBase::open(test_config(dir.path())).await.unwrap();

    let outcome = kb.process_queue(Some(3)).await.unwrap();
    assert_eq!(outcome.succeeded, 0);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.skipped, 0);
}

#[tokio::test]
async fn test_replacement_never_duplicates_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::open_or_create(&dir.path().join("vectors"), 3).unwrap();
    let url = "https://example.org/doc";

    store
        .replace_source(url, vec![make_chunk(url, "v1 part 1", vec![1.0, 0.0, 0.0])])
        .unwrap();
    store
        .replace_source(
            url,
            vec![
                make_chunk(url, "v2 part 1", vec![0.9, 0.1, 0.0]),
                make_chunk(url, "v2 part 2", vec![0.8, 0.2, 0.0]),
            ],
        )
        .unwrap();

    let chunks = store.get_by_source_url(url);
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.text.starts_with("v2")));
}

#[tokio::test]
async fn test_clear_queue_then_readd() {
    let dir = tempfile::tempdir().unwrap();
    let kb = KnowledgeBase::open(test_config(dir.path())).await.unwrap();

    kb.add_sources("https://example.org/a").await.unwrap();
    let deleted = kb
        .clear_queue(&[EntryStatus::Pending, EntryStatus::Failed])
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    // after clearing, the same URL can be added again
    let outcome = kb.add_sources("https://example.org/a").await.unwrap();
    assert_eq!(outcome, AddOutcome { added: 1, skipped: 0 });
}

#[tokio::test]
async fn test_reset_wipes_both_stores() {
    let dir = tempfile::tempdir().unwrap();
    let kb = KnowledgeBase::open(test_config(dir.path())).await.unwrap();

    kb.add_sources("https://example.org/a").await.unwrap();
    kb.reset().await.unwrap();

    let status = kb.status().await.unwrap();
    assert!(status.by_status.is_empty());
    assert_eq!(status.chunk_count, 0);
}

#[tokio::test]
async fn test_refresh_policies_assigned_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(&dir.path().join("catalog.db"), 3)
        .await
        .unwrap();

    catalog
        .insert_if_absent(&[
            DiscoveredSource {
                url: "https://www.youtube.com/watch?v=abc123def45".to_string(),
                kind: SourceKind::Video,
                priority: 50,
                discovered_from: None,
            },
            DiscoveredSource {
                url: "https://github.com/rust-lang/rust".to_string(),
                kind: SourceKind::Repo,
                priority: 50,
                discovered_from: None,
            },
        ])
        .await
        .unwrap();

    let batch = catalog.claim_batch(10).await.unwrap();
    for entry in batch {
        match entry.kind {
            SourceKind::Video => assert_eq!(entry.refresh_policy, RefreshPolicy::Never),
            SourceKind::Repo => assert_eq!(entry.refresh_policy, RefreshPolicy::Days(7)),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
