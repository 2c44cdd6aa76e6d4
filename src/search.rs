//! Hybrid retrieval engine: optional query expansion, dense + lexical
//! retrieval, reciprocal-rank fusion, optional cross-encoder reranking
//! and similarity thresholding.
//!
//! Every degraded path returns results instead of an error: a missing
//! lexical corpus falls back to semantic-only, an unreachable LLM skips
//! expansion, a dead reranker returns the pre-rerank order.

use anyhow::Result;
use std::collections::HashMap;
use uuid::Uuid;

use crate::llm::cross_encoder;
use crate::llm::embeddings::embed_query;
use crate::llm::query_expand;
use crate::models::{ChunkRecord, ScoreKind, SearchHit, SearchOptions};
use crate::state::KnowledgeBase;

/// RRF constant from the literature.
const RRF_K: f32 = 60.0;
const SEMANTIC_WEIGHT: f32 = 0.7;
const LEXICAL_WEIGHT: f32 = 0.3;

/// Floor for the retrieval pool feeding fusion and reranking.
const MIN_RETRIEVAL_POOL: usize = 20;

/// Full retrieval pipeline. Returns at most `options.k` hits, best first,
/// each tagged with the stage that produced its score.
pub async fn run_search(
    kb: &KnowledgeBase,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("query is required");
    }
    let k = options.k.clamp(1, 200);
    let pool = (2 * k).max(MIN_RETRIEVAL_POOL);

    // ── Step 1: Query expansion ──────────────────────────
    let mut effective_query = query.to_string();
    if options.expand {
        match query_expand::expand_query(&kb.http, &kb.config.llm, query).await {
            Ok(Some(expanded)) => {
                tracing::info!("Query expanded with: {expanded}");
                effective_query = format!("{query} {expanded}");
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Query expansion skipped: {e:#}"),
        }
    }

    // ── Step 2: Dense + lexical retrieval ────────────────
    let semantic: Vec<(ChunkRecord, f32)> =
        match embed_query(&kb.http, &kb.config.llm, &effective_query).await {
            Ok(query_vector) => kb.vectors.search(&query_vector, pool, &options.filter),
            Err(e) => {
                tracing::warn!("Semantic retrieval unavailable: {e:#}");
                Vec::new()
            }
        };

    let lexical: Vec<(ChunkRecord, f32)> = if options.hybrid {
        lexical_search(kb, &effective_query, pool, options).await?
    } else {
        Vec::new()
    };

    if semantic.is_empty() && lexical.is_empty() {
        return Ok(Vec::new());
    }

    // ── Step 3: Fusion (or plain semantic scoring) ───────
    let ranked: Vec<(ChunkRecord, f32, ScoreKind)> = if !lexical.is_empty() && !semantic.is_empty()
    {
        rrf_fuse(&semantic, &lexical)
            .into_iter()
            .map(|(chunk, score)| (chunk, score, ScoreKind::Rrf))
            .collect()
    } else if !lexical.is_empty() {
        // semantic side unavailable; lexical order stands in
        lexical
            .into_iter()
            .map(|(chunk, score)| (chunk, score, ScoreKind::Rrf))
            .collect()
    } else {
        // distance → similarity, thresholded for semantic-only searches
        let threshold = options
            .similarity_threshold
            .unwrap_or(kb.config.similarity_threshold);
        semantic
            .into_iter()
            .map(|(chunk, distance)| {
                let similarity = 1.0 / (1.0 + distance);
                (chunk, similarity, ScoreKind::CosineSimilarity)
            })
            .filter(|(_, similarity, _)| *similarity >= threshold)
            .collect()
    };

    // ── Step 4: Cross-encoder rerank ─────────────────────
    if options.rerank && !ranked.is_empty() {
        let passages: Vec<String> = ranked.iter().map(|(c, _, _)| c.text.clone()).collect();
        match cross_encoder::rescore(&kb.http, &kb.config.reranker, query, &passages, k).await {
            Ok(rescored) => {
                let mut hits: Vec<SearchHit> = rescored
                    .iter()
                    .filter_map(|r| {
                        ranked.get(r.candidate).map(|(chunk, _, _)| (chunk, r.relevance))
                    })
                    .map(|(chunk, score)| SearchHit::from_chunk(chunk, score, ScoreKind::Rerank))
                    .collect();
                // post-rerank thresholding only when the caller asked
                if let Some(threshold) = options.similarity_threshold {
                    hits.retain(|h| h.score >= threshold);
                }
                hits.truncate(k);
                return Ok(hits);
            }
            Err(e) => {
                tracing::warn!("Reranking unavailable, returning pre-rerank order: {e:#}");
            }
        }
    }

    // ── Step 5: Final cut ────────────────────────────────
    let mut hits: Vec<SearchHit> = ranked
        .iter()
        .map(|(chunk, score, kind)| SearchHit::from_chunk(chunk, *score, *kind))
        .collect();
    hits.truncate(k);
    Ok(hits)
}

/// BM25 over the current corpus, rebuilt first when stale. tantivy
/// searches are blocking, so both rebuild and query run off the async
/// threads.
async fn lexical_search(
    kb: &KnowledgeBase,
    query: &str,
    pool: usize,
    options: &SearchOptions,
) -> Result<Vec<(ChunkRecord, f32)>> {
    if kb.lexical.needs_build() {
        let snapshot = kb.vectors.lexical_snapshot();
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }
        let lexical = kb.lexical.clone();
        tokio::task::spawn_blocking(move || lexical.build(&snapshot)).await??;
    }

    let lexical = kb.lexical.clone();
    let query = query.to_string();
    let hits = tokio::task::spawn_blocking(move || lexical.search(&query, pool)).await??;

    let ids: Vec<Uuid> = hits.iter().map(|h| h.chunk_id).collect();
    let records = kb.vectors.get_by_ids(&ids);
    let by_id: HashMap<Uuid, ChunkRecord> =
        records.into_iter().map(|r| (r.id, r)).collect();

    Ok(hits
        .into_iter()
        .filter_map(|hit| by_id.get(&hit.chunk_id).map(|r| (r.clone(), hit.score)))
        .filter(|(record, _)| options.filter.matches(record))
        .collect())
}

/// Reciprocal-rank fusion of a semantic list (distance-ordered) and a
/// lexical list (BM25-ordered). Each chunk scores
/// `w_s/(K+r_s) + w_k/(K+r_k)` over its 1-based ranks, with a missing
/// rank contributing nothing. Ties break on semantic rank.
pub fn rrf_fuse(
    semantic: &[(ChunkRecord, f32)],
    lexical: &[(ChunkRecord, f32)],
) -> Vec<(ChunkRecord, f32)> {
    struct Fused {
        chunk: ChunkRecord,
        score: f32,
        semantic_rank: usize,
    }

    let mut by_id: HashMap<Uuid, Fused> = HashMap::new();

    for (rank, (chunk, _distance)) in semantic.iter().enumerate() {
        let rrf = SEMANTIC_WEIGHT / (RRF_K + rank as f32 + 1.0);
        by_id
            .entry(chunk.id)
            .and_modify(|f| {
                f.score += rrf;
                f.semantic_rank = f.semantic_rank.min(rank + 1);
            })
            .or_insert(Fused {
                chunk: chunk.clone(),
                score: rrf,
                semantic_rank: rank + 1,
            });
    }

    for (rank, (chunk, _bm25)) in lexical.iter().enumerate() {
        let rrf = LEXICAL_WEIGHT / (RRF_K + rank as f32 + 1.0);
        by_id
            .entry(chunk.id)
            .and_modify(|f| f.score += rrf)
            .or_insert(Fused {
                chunk: chunk.clone(),
                score: rrf,
                semantic_rank: usize::MAX,
            });
    }

    let mut fused: Vec<Fused> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.semantic_rank.cmp(&b.semantic_rank))
    });

    fused.into_iter().map(|f| (f.chunk, f.score)).collect()
}
