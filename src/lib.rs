//! # corpus-search
//!
//! A Rust library for building and maintaining a local, searchable
//! knowledge base from heterogeneous web sources (documentation sites,
//! code repositories, video transcripts) and answering semantic queries
//! over it with a hybrid retrieval pipeline.
//!
//! ## Architecture
//!
//! Ingestion is a queue-driven pipeline over a durable URL catalog:
//!
//! ```text
//!   ┌───────────────┐      ┌─────────────────────┐
//!   │  User input   │─────▶│ Discovery           │
//!   │ (URLs/prompt) │      │ (LLM queries + web  │
//!   └───────────────┘      │  search + scoring)  │
//!                          └─────────┬───────────┘
//!                                    │ insert_if_absent
//!                                    ▼
//!                          ┌─────────────────────┐
//!                          │ URL Catalog (SQLite)│◀─────────────┐
//!                          └─────────┬───────────┘              │
//!                                    │ claim_batch              │ crawl /
//!                                    ▼                          │ channel
//!                          ┌─────────────────────┐              │ expansion
//!                          │ Queue Processor     │──────────────┘
//!                          │ HTML / Repo / Video │
//!                          └─────────┬───────────┘
//!                                    │ chunk → enrich + embed
//!                                    ▼
//!                          ┌─────────────────────┐
//!                          │ Vector Index        │──▶ BM25 corpus
//!                          └─────────────────────┘
//! ```
//!
//! Retrieval fuses dense and lexical rankings:
//!
//! ```text
//!   Query ──▶ optional LLM expansion
//!     │
//!     ├──▶ embed ──▶ Vector top-N ──┐
//!     │                             ├──▶ RRF fusion (K=60, 0.7/0.3)
//!     └──▶ BM25 top-N ──────────────┘           │
//!                                               ▼
//!                                  Cross-encoder rerank (optional)
//!                                               │
//!                                               ▼
//!                                  top-k passages + metadata
//! ```
//!
//! A scheduled refresher keeps indexed material current using cheap
//! conditional checks (HTTP validators, repository tip commits) before
//! falling back to content hashing and surgical chunk replacement.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for storage paths, LLM
//!   endpoints, concurrency budgets and chunking bounds
//! - [`models`] - Shared data types: `CatalogEntry`, `ChunkRecord`,
//!   `FetchedDocument`, search request/response types
//! - [`urls`] - URL normalization, hashing and source-kind detection;
//!   the correctness foundation for deduplication
//! - [`catalog`] - SQLite-backed URL registry with lifecycle state
//! - [`index`] - Vector store (cosine top-k with metadata filters) and
//!   tantivy BM25 index rebuilt from the chunk corpus
//! - [`chunking`] - Kind-aware splitting: markdown sections, repository
//!   file trees, transcript segments
//! - [`fetch`] - Per-kind content extractors and the per-host rate limiter
//! - [`crawler`] - Bounded same-origin link discovery for documentation
//!   domains
//! - [`llm`] - Ollama/OpenAI-compatible client: embeddings, metadata
//!   enrichment, query expansion, cross-encoder reranking
//! - [`discovery`] - Input classification, LLM query synthesis and
//!   web-search candidate assembly
//! - [`queue`] - Batched, rate-limited, retrying executor over pending
//!   catalog entries
//! - [`refresh`] - Cheap-check → re-fetch → diff → replace pipeline
//! - [`search`] - Hybrid retrieval with RRF fusion and reranking
//! - [`state`] - The [`state::KnowledgeBase`] facade external adapters
//!   build on

pub mod catalog;
pub mod chunking;
pub mod config;
pub mod crawler;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod index;
pub mod llm;
pub mod models;
pub mod queue;
pub mod refresh;
pub mod search;
pub mod state;
pub mod urls;

use tracing_subscriber::EnvFilter;

/// Install the process-wide tracing subscriber, honoring `RUST_LOG` when
/// set. Embedding applications call this once at startup; calling it
/// again is a no-op.
pub fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level.to_string())),
        )
        .try_init();
}
