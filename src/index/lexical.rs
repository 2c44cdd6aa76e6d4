//! BM25 keyword retrieval over the chunk corpus, built on tantivy.
//!
//! The index lives entirely in RAM and is rebuilt from a vector-store
//! snapshot whenever the corpus changed (dirty flag). Rebuilding is cheap
//! relative to ingestion, which keeps the lexical side eventually
//! consistent with the vector side without cross-store transactions.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexWriter, ReloadPolicy, TantivyDocument};
use uuid::Uuid;

pub struct LexicalIndex {
    built: RwLock<Option<BuiltIndex>>,
    dirty: AtomicBool,
}

struct BuiltIndex {
    index: Index,
    f_id: Field,
    f_text: Field,
    f_source_url: Field,
    f_kind: Field,
}

/// One corpus row: `(chunk id, text, source_url, kind)`.
pub type CorpusRow = (Uuid, String, String, String);

#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: Uuid,
    pub score: f32,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self {
            built: RwLock::new(None),
            dirty: AtomicBool::new(true),
        }
    }

    /// True when the corpus changed since the last build (or no build
    /// ever ran).
    pub fn needs_build(&self) -> bool {
        self.dirty.load(Ordering::Acquire) || self.built.read().is_none()
    }

    /// Invalidate after any vector-store mutation.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Rebuild from scratch over the given corpus snapshot.
    pub fn build(&self, corpus: &[CorpusRow]) -> Result<()> {
        let mut schema_builder = Schema::builder();
        let f_id = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let f_text = schema_builder.add_text_field("text", TEXT);
        let f_source_url = schema_builder.add_text_field("source_url", STRING | STORED);
        let f_kind = schema_builder.add_text_field("kind", STRING | STORED);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index
            .writer(50_000_000)
            .context("Failed to create lexical index writer")?;

        for (id, text, source_url, kind) in corpus {
            writer.add_document(doc!(
                f_id => id.to_string(),
                f_text => text.clone(),
                f_source_url => source_url.clone(),
                f_kind => kind.clone(),
            ))?;
        }
        writer.commit().context("Failed to commit lexical index")?;

        *self.built.write() = Some(BuiltIndex {
            index,
            f_id,
            f_text,
            f_source_url,
            f_kind,
        });
        self.dirty.store(false, Ordering::Release);

        tracing::debug!("Lexical index rebuilt over {} chunks", corpus.len());
        Ok(())
    }

    /// BM25 search. Returns chunk ids with scores, best first. An index
    /// that was never built returns no hits rather than an error, so the
    /// retrieval engine can fall back to semantic-only.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let guard = self.built.read();
        let Some(built) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let reader = built
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("Failed to create lexical reader")?;
        let searcher = reader.searcher();

        // Lenient parsing: user queries are free text, not tantivy syntax.
        let query_parser = QueryParser::for_index(&built.index, vec![built.f_text]);
        let (parsed, _errors) = query_parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(k))
            .context("Lexical search failed")?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve lexical document")?;
            let id_str = doc
                .get_first(built.f_id)
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let Ok(chunk_id) = Uuid::parse_str(id_str) else {
                continue;
            };
            hits.push(LexicalHit { chunk_id, score });
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<CorpusRow> {
        vec![
            (
                Uuid::new_v4(),
                "OAuth 2.0 token-based authentication for APIs".to_string(),
                "https://a.org/oauth".to_string(),
                "web_page".to_string(),
            ),
            (
                Uuid::new_v4(),
                "Unicorns are mythical horned horses".to_string(),
                "https://a.org/unicorns".to_string(),
                "web_page".to_string(),
            ),
            (
                Uuid::new_v4(),
                "Refreshing OAuth access tokens with refresh tokens".to_string(),
                "https://a.org/refresh".to_string(),
                "web_page".to_string(),
            ),
        ]
    }

    #[test]
    fn test_build_and_search() {
        let index = LexicalIndex::new();
        index.build(&corpus()).unwrap();
        assert!(!index.needs_build());

        let hits = index.search("oauth tokens", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_unbuilt_index_returns_empty() {
        let index = LexicalIndex::new();
        assert!(index.needs_build());
        assert!(index.search("anything", 5).unwrap().is_empty());
    }

    #[test]
    fn test_mark_dirty_forces_rebuild() {
        let index = LexicalIndex::new();
        index.build(&corpus()).unwrap();
        assert!(!index.needs_build());
        index.mark_dirty();
        assert!(index.needs_build());
    }

    #[test]
    fn test_rebuild_replaces_corpus() {
        let index = LexicalIndex::new();
        index.build(&corpus()).unwrap();
        index
            .build(&[(
                Uuid::new_v4(),
                "only document now".to_string(),
                "https://a.org/only".to_string(),
                "web_page".to_string(),
            )])
            .unwrap();

        assert!(index.search("oauth", 10).unwrap().is_empty());
        assert_eq!(index.search("document", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_query_syntax_is_tolerated() {
        let index = LexicalIndex::new();
        index.build(&corpus()).unwrap();
        // free text with characters that are tantivy syntax
        let hits = index.search("token-based auth: (OAuth)", 10).unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn test_no_match_returns_empty() {
        let index = LexicalIndex::new();
        index.build(&corpus()).unwrap();
        assert!(index.search("zebrafish", 10).unwrap().is_empty());
    }
}
