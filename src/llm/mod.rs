//! LLM integrations: the chat client, batched embeddings, metadata
//! enrichment, retrieval-time query expansion, and the cross-encoder
//! reranker sidecar.

pub mod client;
pub mod cross_encoder;
pub mod embeddings;
pub mod enrich;
pub mod query_expand;
