//! Persistent vector store with cosine top-k search and metadata filters.
//!
//! Records live in memory behind an `RwLock` and are persisted as one
//! named collection file inside the vector directory. Replacement of a
//! document's chunks happens under a single write lock, so concurrent
//! readers observe either the full old set or the full new set, never a
//! mix.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::models::{ChunkRecord, DocValidators, SearchFilter};

/// Name of the single collection held by the store.
const COLLECTION: &str = "knowledge_base";

pub struct VectorStore {
    records: RwLock<Vec<ChunkRecord>>,
    persist_path: PathBuf,
    dim: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VectorStats {
    pub chunks: usize,
    pub documents: usize,
    pub by_kind: HashMap<String, usize>,
}

impl VectorStore {
    /// Open the collection under `vector_dir`, creating it when absent.
    /// A stored embedding whose dimension disagrees with `dim` means the
    /// deploy changed models without a rebuild; that is corruption, not
    /// something to paper over.
    pub fn open_or_create(vector_dir: &Path, dim: usize) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)
            .with_context(|| format!("Failed to create {}", vector_dir.display()))?;
        let persist_path = vector_dir.join(format!("{COLLECTION}.json"));

        let records: Vec<ChunkRecord> = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .context("Failed to read vector collection")?;
            serde_json::from_str(&data).context("Failed to parse vector collection")?
        } else {
            Vec::new()
        };

        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dim) {
            return Err(StoreError::Corruption(format!(
                "stored embedding for {} has dimension {}, expected {dim}; \
                 changing the embedding model requires a full rebuild",
                bad.source_url,
                bad.embedding.len()
            ))
            .into());
        }

        Ok(Self {
            records: RwLock::new(records),
            persist_path,
            dim,
        })
    }

    /// Batch insert. Embeddings are pre-computed by the caller.
    pub fn add(&self, chunks: Vec<ChunkRecord>) -> Result<()> {
        self.check_dims(&chunks)?;
        let mut records = self.records.write();
        records.extend(chunks);
        self.persist(&records)
    }

    /// Remove every chunk of `source_url`. Atomic: all or nothing.
    pub fn delete_by_source_url(&self, source_url: &str) -> Result<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.source_url != source_url);
        let removed = before - records.len();
        if removed > 0 {
            self.persist(&records)?;
        }
        Ok(removed)
    }

    /// Delete-then-insert for one source under a single write lock, so a
    /// refresh never exposes a union of old and new chunks to searchers.
    pub fn replace_source(&self, source_url: &str, chunks: Vec<ChunkRecord>) -> Result<()> {
        self.check_dims(&chunks)?;
        let mut records = self.records.write();
        records.retain(|r| r.source_url != source_url);
        records.extend(chunks);
        self.persist(&records)
    }

    /// Cosine top-k. Returns `(chunk, distance)` pairs where distance is
    /// `1 − cosine_similarity` (0 identical, 2 opposite); callers convert
    /// to a display score via `1/(1+distance)`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Vec<(ChunkRecord, f32)> {
        let records = self.records.read();

        let mut scored: Vec<(f32, &ChunkRecord)> = records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| (1.0 - cosine_similarity(query, &r.embedding), r))
            .collect();

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(distance, r)| (r.clone(), distance))
            .collect()
    }

    /// All chunks for one source, ordered by chunk index. Used by the
    /// refresher to read stored validators.
    pub fn get_by_source_url(&self, source_url: &str) -> Vec<ChunkRecord> {
        let records = self.records.read();
        let mut chunks: Vec<ChunkRecord> = records
            .iter()
            .filter(|r| r.source_url == source_url)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        chunks
    }

    /// Rewrite validator fields in place after a refresh confirmed the
    /// content itself is unchanged.
    pub fn update_validators(&self, source_url: &str, validators: &DocValidators) -> Result<()> {
        let mut records = self.records.write();
        let mut touched = false;
        for record in records.iter_mut() {
            if record.source_url == source_url {
                record.http_last_modified = validators.http_last_modified.clone();
                record.http_etag = validators.http_etag.clone();
                record.commit_id = validators.commit_id.clone();
                touched = true;
            }
        }
        if touched {
            self.persist(&records)?;
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.records.read().len()
    }

    pub fn stats(&self) -> VectorStats {
        let records = self.records.read();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut documents: HashSet<&str> = HashSet::new();
        for record in records.iter() {
            *by_kind.entry(record.kind.as_str().to_string()).or_insert(0) += 1;
            documents.insert(record.document_id.as_str());
        }
        VectorStats {
            chunks: records.len(),
            documents: documents.len(),
            by_kind,
        }
    }

    /// Snapshot of `(id, text, source_url, kind)` rows for the lexical
    /// index rebuild.
    pub fn lexical_snapshot(&self) -> Vec<(uuid::Uuid, String, String, String)> {
        self.records
            .read()
            .iter()
            .map(|r| {
                (
                    r.id,
                    r.text.clone(),
                    r.source_url.clone(),
                    r.kind.as_str().to_string(),
                )
            })
            .collect()
    }

    /// Look up full records by chunk id (used after lexical search).
    pub fn get_by_ids(&self, ids: &[uuid::Uuid]) -> Vec<ChunkRecord> {
        let records = self.records.read();
        let wanted: HashSet<&uuid::Uuid> = ids.iter().collect();
        records
            .iter()
            .filter(|r| wanted.contains(&r.id))
            .cloned()
            .collect()
    }

    /// Full wipe, paired with a catalog wipe by the caller.
    pub fn clear(&self) -> Result<()> {
        let mut records = self.records.write();
        records.clear();
        self.persist(&records)
    }

    fn check_dims(&self, chunks: &[ChunkRecord]) -> Result<()> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != self.dim) {
            anyhow::bail!(
                "embedding dimension {} for {} does not match configured {}",
                bad.embedding.len(),
                bad.source_url,
                self.dim
            );
        }
        Ok(())
    }

    /// Atomic write via temp file + rename.
    fn persist(&self, records: &[ChunkRecord]) -> Result<()> {
        let data = serde_json::to_string(records)?;
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data).context("Failed to write vector collection")?;
        std::fs::rename(&tmp_path, &self.persist_path)
            .context("Failed to swap vector collection")?;
        Ok(())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
