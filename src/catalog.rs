//! SQLite-backed URL catalog: the deduplication authority and lifecycle
//! registry for every discovered source.
//!
//! The catalog exclusively owns `CatalogEntry` rows. The queue processor
//! and refresher are the only mutators of entry status after insert;
//! everything else reads. Claims are serialized through a transaction
//! that flags rows in-flight, so two workers can never claim the same
//! entry.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use crate::models::{
    AddOutcome, CatalogEntry, DiscoveredSource, EntryStatus, RefreshPolicy, SourceKind,
};
use crate::urls;

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
    max_retries: u32,
}

impl Catalog {
    /// Open (or create) the catalog database and run schema setup.
    /// Stale in-flight flags from a previous process are cleared.
    pub async fn open(path: &Path, max_retries: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open catalog database")?;

        let catalog = Self { pool, max_retries };
        catalog.create_tables().await?;
        sqlx::query("UPDATE catalog SET in_flight = 0 WHERE in_flight = 1")
            .execute(&catalog.pool)
            .await?;
        Ok(catalog)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog (
                url_hash TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 50,
                discovered_from TEXT,
                added_at TEXT NOT NULL,
                last_fetched_at TEXT,
                next_refresh_at TEXT,
                refresh_policy TEXT NOT NULL DEFAULT 'never',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                in_flight INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_catalog_queue
             ON catalog(status, priority DESC, added_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_catalog_refresh
             ON catalog(status, next_refresh_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_call_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                success INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                remaining_quota INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert candidates, skipping any URL already present. Existing
    /// entries are never modified through this path.
    pub async fn insert_if_absent(&self, sources: &[DiscoveredSource]) -> Result<AddOutcome> {
        let mut outcome = AddOutcome::default();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        for source in sources {
            let hash = urls::url_hash(&source.url);
            let policy = RefreshPolicy::for_kind(source.kind);
            let result = sqlx::query(
                r#"
                INSERT INTO catalog (url_hash, url, kind, status, priority,
                                     discovered_from, added_at, refresh_policy)
                VALUES (?, ?, ?, 'pending', ?, ?, ?, ?)
                ON CONFLICT(url_hash) DO NOTHING
                "#,
            )
            .bind(&hash)
            .bind(&source.url)
            .bind(source.kind.as_str())
            .bind(source.priority)
            .bind(&source.discovered_from)
            .bind(now)
            .bind(policy.as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                outcome.added += 1;
            } else {
                outcome.skipped += 1;
                tracing::debug!("URL already cataloged: {}", source.url);
            }
        }
        tx.commit().await?;

        Ok(outcome)
    }

    /// Atomically claim up to `n` pending entries, highest priority first,
    /// oldest first within a priority. Claimed rows are flagged in-flight
    /// until resolved by `mark_fetched` / `mark_failed`.
    pub async fn claim_batch(&self, n: usize) -> Result<Vec<CatalogEntry>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM catalog
            WHERE status = 'pending' AND in_flight = 0 AND retry_count < ?
            ORDER BY priority DESC, added_at ASC
            LIMIT ?
            "#,
        )
        .bind(self.max_retries)
        .bind(n as i64)
        .fetch_all(&mut *tx)
        .await?;

        let entries: Vec<CatalogEntry> = rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<_>>()?;

        for entry in &entries {
            sqlx::query("UPDATE catalog SET in_flight = 1 WHERE url_hash = ?")
                .bind(&entry.url_hash)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(entries)
    }

    /// Record a successful fetch and schedule the next refresh.
    pub async fn mark_fetched(
        &self,
        url_hash: &str,
        when: DateTime<Utc>,
        next_refresh_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE catalog
            SET status = 'fetched', last_fetched_at = ?, next_refresh_at = ?,
                last_error = NULL, in_flight = 0
            WHERE url_hash = ?
            "#,
        )
        .bind(when)
        .bind(next_refresh_at)
        .bind(url_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt. Transient failures re-enter the pending
    /// queue until `max_retries` is exhausted; permanent failures stick
    /// immediately. Returns the resulting status.
    pub async fn mark_failed(
        &self,
        url_hash: &str,
        error: &str,
        permanent: bool,
    ) -> Result<EntryStatus> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT retry_count FROM catalog WHERE url_hash = ?")
            .bind(url_hash)
            .fetch_optional(&mut *tx)
            .await?;
        let retry_count: u32 = match row {
            Some(row) => row.try_get::<i64, _>("retry_count")? as u32,
            None => anyhow::bail!("unknown catalog entry {url_hash}"),
        };

        let new_count = (retry_count + 1).min(self.max_retries);
        let status = if permanent || new_count >= self.max_retries {
            EntryStatus::Failed
        } else {
            EntryStatus::Pending
        };

        sqlx::query(
            r#"
            UPDATE catalog
            SET status = ?, retry_count = ?, last_error = ?, in_flight = 0
            WHERE url_hash = ?
            "#,
        )
        .bind(status.as_str())
        .bind(new_count)
        .bind(error)
        .bind(url_hash)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(status)
    }

    /// Promote a `web_page` entry to `doc_site_page` once the
    /// documentation heuristic matches.
    pub async fn reclassify(&self, url_hash: &str, kind: SourceKind) -> Result<()> {
        sqlx::query("UPDATE catalog SET kind = ?, refresh_policy = ? WHERE url_hash = ?")
            .bind(kind.as_str())
            .bind(RefreshPolicy::for_kind(kind).as_str())
            .bind(url_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Entries whose refresh window has elapsed.
    pub async fn due_for_refresh(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM catalog
            WHERE status = 'fetched'
              AND refresh_policy != 'never'
              AND next_refresh_at IS NOT NULL
              AND next_refresh_at <= ?
            ORDER BY priority DESC, last_fetched_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Advance the refresh bookkeeping after an unchanged or updated pass.
    pub async fn touch_refreshed(
        &self,
        url_hash: &str,
        when: DateTime<Utc>,
        next_refresh_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE catalog
            SET last_fetched_at = ?, next_refresh_at = ?, last_error = NULL
            WHERE url_hash = ?
            "#,
        )
        .bind(when)
        .bind(next_refresh_at)
        .bind(url_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a refresh failure. The entry keeps serving from the index
    /// (status stays fetched) until retries are exhausted.
    pub async fn mark_refresh_failed(&self, url_hash: &str, error: &str) -> Result<EntryStatus> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT retry_count FROM catalog WHERE url_hash = ?")
            .bind(url_hash)
            .fetch_optional(&mut *tx)
            .await?;
        let retry_count: u32 = match row {
            Some(row) => row.try_get::<i64, _>("retry_count")? as u32,
            None => anyhow::bail!("unknown catalog entry {url_hash}"),
        };

        let new_count = (retry_count + 1).min(self.max_retries);
        let status = if new_count >= self.max_retries {
            EntryStatus::Failed
        } else {
            EntryStatus::Fetched
        };

        sqlx::query(
            "UPDATE catalog SET status = ?, retry_count = ?, last_error = ? WHERE url_hash = ?",
        )
        .bind(status.as_str())
        .bind(new_count)
        .bind(error)
        .bind(url_hash)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(status)
    }

    /// Return a claimed entry to the queue untouched (stop requested
    /// before work started). Does not count as an attempt.
    pub async fn release_claim(&self, url_hash: &str) -> Result<()> {
        sqlx::query("UPDATE catalog SET in_flight = 0 WHERE url_hash = ?")
            .bind(url_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, url_hash: &str) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query("SELECT * FROM catalog WHERE url_hash = ?")
            .bind(url_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    /// Bulk delete of pending and/or failed entries. Fetched rows are
    /// never touched through this path.
    pub async fn clear(&self, statuses: &[EntryStatus]) -> Result<u64> {
        let mut deleted = 0u64;
        for status in statuses {
            if *status == EntryStatus::Fetched {
                continue;
            }
            let result = sqlx::query("DELETE FROM catalog WHERE status = ?")
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }
        tracing::info!("Cleared {deleted} queue entries");
        Ok(deleted)
    }

    /// Full wipe. Only valid when paired with a vector index wipe.
    pub async fn delete_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM catalog").execute(&self.pool).await?;
        sqlx::query("DELETE FROM api_call_log")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Entry counts grouped by status and by kind.
    pub async fn counts(&self) -> Result<(HashMap<String, i64>, HashMap<String, i64>)> {
        let mut by_status = HashMap::new();
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM catalog GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            by_status.insert(row.try_get("status")?, row.try_get("n")?);
        }

        let mut by_kind = HashMap::new();
        let rows = sqlx::query("SELECT kind, COUNT(*) AS n FROM catalog GROUP BY kind")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            by_kind.insert(row.try_get("kind")?, row.try_get("n")?);
        }

        Ok((by_status, by_kind))
    }

    /// Append one row to the API call log. Operational only; failures are
    /// swallowed so logging can never break the caller.
    pub async fn log_api_call(
        &self,
        api_name: &str,
        success: bool,
        latency_ms: i64,
        remaining_quota: Option<i64>,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO api_call_log (api_name, timestamp, success, latency_ms, remaining_quota)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(api_name)
        .bind(Utc::now())
        .bind(success)
        .bind(latency_ms)
        .bind(remaining_quota)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("Failed to log API call: {e}");
        }
    }

    /// Most recent remaining-quota figure for an API, if any was reported.
    pub async fn last_quota(&self, api_name: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT remaining_quota FROM api_call_log
            WHERE api_name = ? AND remaining_quota IS NOT NULL
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(api_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.try_get("remaining_quota")).transpose()?)
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<CatalogEntry> {
    let kind_str: String = row.try_get("kind")?;
    let status_str: String = row.try_get("status")?;
    let policy_str: String = row.try_get("refresh_policy")?;

    Ok(CatalogEntry {
        url_hash: row.try_get("url_hash")?,
        url: row.try_get("url")?,
        kind: SourceKind::parse(&kind_str)
            .with_context(|| format!("unknown source kind {kind_str}"))?,
        status: EntryStatus::parse(&status_str)
            .with_context(|| format!("unknown entry status {status_str}"))?,
        priority: row.try_get("priority")?,
        discovered_from: row.try_get("discovered_from")?,
        added_at: row.try_get("added_at")?,
        last_fetched_at: row.try_get("last_fetched_at")?,
        next_refresh_at: row.try_get("next_refresh_at")?,
        refresh_policy: RefreshPolicy::parse(&policy_str)
            .with_context(|| format!("unknown refresh policy {policy_str}"))?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        last_error: row.try_get("last_error")?,
    })
}
