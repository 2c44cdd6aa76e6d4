//! Text embeddings for indexing and retrieval.
//!
//! The embedder is a black box with one hard contract: every vector it
//! returns must have the configured dimension, because the vector store
//! refuses to mix dimensions within its collection. Chunks being indexed
//! and queries being searched get different task prefixes on asymmetric
//! model families.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::llm::client::{clip_to_boundary, post_json};

/// Character budget per embedded text. Dense chunks (code, transcripts
/// without punctuation) tokenize at up to ~2.3 tokens/char; 3 000 chars
/// stays inside an 8 192-token embedding context with margin.
const MAX_EMBED_CHARS: usize = 3_000;

/// Texts sent per embedding request.
const BATCH_SIZE: usize = 32;

const EMBED_TIMEOUT: Duration = Duration::from_secs(60);

/// Embedding model families trained with distinct query/document
/// prefixes. Sending the right prefix shapes the space for retrieval;
/// symmetric models get none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelFamily {
    Nomic,
    E5,
    Symmetric,
}

impl ModelFamily {
    fn of(model: &str) -> Self {
        let lower = model.to_lowercase();
        if lower.contains("nomic") {
            ModelFamily::Nomic
        } else if lower.contains("e5") {
            ModelFamily::E5
        } else {
            ModelFamily::Symmetric
        }
    }

    /// Prefix for text being stored. The trailing space is required by
    /// the models that use one.
    fn document_prefix(self) -> &'static str {
        match self {
            ModelFamily::Nomic => "search_document: ",
            ModelFamily::E5 => "passage: ",
            ModelFamily::Symmetric => "",
        }
    }

    /// Prefix for text used to search against stored documents.
    fn query_prefix(self) -> &'static str {
        match self {
            ModelFamily::Nomic => "search_query: ",
            ModelFamily::E5 => "query: ",
            ModelFamily::Symmetric => "",
        }
    }
}

/// Embed chunk texts for the vector index.
pub async fn embed_chunks(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let prefix = ModelFamily::of(&config.embedding_model).document_prefix();
    embed(client, config, texts, prefix).await
}

/// Embed one retrieval query.
pub async fn embed_query(
    client: &reqwest::Client,
    config: &LlmConfig,
    query: &str,
) -> Result<Vec<f32>> {
    let prefix = ModelFamily::of(&config.embedding_model).query_prefix();
    let texts = [query.to_string()];
    embed(client, config, &texts, prefix)
        .await?
        .into_iter()
        .next()
        .context("No embedding returned for query")
}

async fn embed(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
    prefix: &str,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    // Prefix before clipping so the prefix itself is never cut away.
    let budget = MAX_EMBED_CHARS.saturating_sub(prefix.len());
    let prepared: Vec<String> = texts
        .iter()
        .map(|text| format!("{prefix}{}", clip_to_boundary(text, budget)))
        .collect();

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(prepared.len());
    for batch in prepared.chunks(BATCH_SIZE) {
        vectors.extend(request_batch(client, config, batch).await?);
    }

    if vectors.len() != texts.len() {
        anyhow::bail!(
            "embedding API returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != config.embedding_dim) {
        anyhow::bail!(
            "embedding dimension {} does not match configured {}; \
             changing models requires a full index rebuild",
            bad.len(),
            config.embedding_dim
        );
    }

    Ok(vectors)
}

#[derive(Deserialize)]
struct OllamaEmbeddings {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddings {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

async fn request_batch(
    client: &reqwest::Client,
    config: &LlmConfig,
    batch: &[String],
) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "ollama" => {
            let url = format!("{}/api/embed", config.base_url);
            // truncate asks Ollama to cut oversized inputs itself
            // instead of answering 400
            let body = serde_json::json!({
                "model": config.embedding_model,
                "input": batch,
                "truncate": true,
            });
            let resp: OllamaEmbeddings =
                post_json(client, &url, None, &body, EMBED_TIMEOUT).await?;
            Ok(resp.embeddings)
        }
        "openai" => {
            let url = format!("{}/v1/embeddings", config.base_url);
            let body = serde_json::json!({
                "model": config.embedding_model,
                "input": batch,
            });
            let resp: OpenAiEmbeddings = post_json(
                client,
                &url,
                config.api_key.as_deref(),
                &body,
                EMBED_TIMEOUT,
            )
            .await?;
            Ok(resp.data.into_iter().map(|d| d.embedding).collect())
        }
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_detection_is_case_insensitive() {
        assert_eq!(ModelFamily::of("nomic-embed-text"), ModelFamily::Nomic);
        assert_eq!(ModelFamily::of("Nomic-Embed-Text-v1.5"), ModelFamily::Nomic);
        assert_eq!(ModelFamily::of("e5-large-v2"), ModelFamily::E5);
        assert_eq!(ModelFamily::of("all-minilm-l6-v2"), ModelFamily::Symmetric);
    }

    #[test]
    fn test_prefixes_differ_per_task() {
        assert_eq!(ModelFamily::Nomic.document_prefix(), "search_document: ");
        assert_eq!(ModelFamily::Nomic.query_prefix(), "search_query: ");
        assert_eq!(ModelFamily::E5.document_prefix(), "passage: ");
        assert_eq!(ModelFamily::E5.query_prefix(), "query: ");
    }

    #[test]
    fn test_symmetric_models_get_no_prefix() {
        assert_eq!(ModelFamily::Symmetric.document_prefix(), "");
        assert_eq!(ModelFamily::Symmetric.query_prefix(), "");
    }

    #[test]
    fn test_prefix_survives_clipping() {
        let prefix = ModelFamily::Nomic.document_prefix();
        let budget = MAX_EMBED_CHARS.saturating_sub(prefix.len());
        let long_text = "x".repeat(MAX_EMBED_CHARS * 2);
        let prepared = format!("{prefix}{}", clip_to_boundary(&long_text, budget));
        assert!(prepared.starts_with("search_document: "));
        assert!(prepared.len() <= MAX_EMBED_CHARS);
    }
}
