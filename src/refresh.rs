//! Refresher: keep indexed entries current at low cost.
//!
//! A pass claims a bounded slice of due entries and runs a kind-specific
//! cheap check first (HTTP validators for pages, the remote tip for
//! repositories; videos are immutable and never claimed). Only when the
//! cheap check signals change does a full fetch happen, and only when
//! the content hash confirms it does the vector index get touched —
//! always delete-then-insert, invisible to concurrent searches.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header;
use std::process::Stdio;
use std::time::Duration;

use crate::models::{CatalogEntry, RefreshOutcome, SourceKind};
use crate::queue::{self, content_hash};
use crate::state::KnowledgeBase;
use crate::urls;

const HEAD_TIMEOUT: Duration = Duration::from_secs(10);
const LS_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

enum RefreshStatus {
    Unchanged,
    Updated,
}

/// One refresh pass over up to `refresh.batch_limit` due entries.
pub async fn refresh_once(kb: &KnowledgeBase) -> Result<RefreshOutcome> {
    let due = kb
        .catalog
        .due_for_refresh(Utc::now(), kb.config.refresh.batch_limit)
        .await?;
    let mut outcome = RefreshOutcome {
        checked: due.len(),
        ..Default::default()
    };
    if due.is_empty() {
        return Ok(outcome);
    }
    tracing::info!("Refreshing {} due entries", due.len());

    for entry in due {
        if kb.stopped() {
            outcome.checked -= 1;
            continue;
        }
        match refresh_entry(kb, &entry).await {
            Ok(RefreshStatus::Unchanged) => outcome.unchanged += 1,
            Ok(RefreshStatus::Updated) => outcome.updated += 1,
            Err(e) => {
                tracing::warn!("Refresh of {} failed: {e:#}", entry.url);
                outcome.failed += 1;
                let _ = kb
                    .catalog
                    .mark_refresh_failed(&entry.url_hash, &format!("{e:#}"))
                    .await;
            }
        }
    }

    Ok(outcome)
}

async fn refresh_entry(kb: &KnowledgeBase, entry: &CatalogEntry) -> Result<RefreshStatus> {
    let stored = kb.vectors.get_by_source_url(&entry.url);
    let now = Utc::now();
    let next = entry.refresh_policy.next_refresh(now);

    // Cheap check: skip the full fetch when validators prove freshness.
    // Absent validators (or absent chunks) force the fetch.
    let cheap_unchanged = match entry.kind {
        SourceKind::WebPage | SourceKind::DocSitePage => {
            if let Some(first) = stored.first() {
                if let Some(host) = urls::host_of(&entry.url) {
                    kb.limiter.acquire(&host).await;
                }
                match head_validators(&kb.http, &entry.url).await {
                    Ok((new_lm, new_etag)) => validators_unchanged(
                        first.http_last_modified.as_deref(),
                        first.http_etag.as_deref(),
                        new_lm.as_deref(),
                        new_etag.as_deref(),
                    ),
                    Err(e) => {
                        tracing::debug!("HEAD check of {} failed: {e:#}", entry.url);
                        false
                    }
                }
            } else {
                false
            }
        }
        SourceKind::Repo => {
            let stored_commit = stored.first().and_then(|c| c.commit_id.clone());
            match (stored_commit, remote_tip(&entry.url).await) {
                (Some(stored), Ok(Some(tip))) => stored == tip,
                _ => false,
            }
        }
        // Videos are immutable; the never policy keeps them out of the
        // due list, so anything landing here just re-schedules.
        SourceKind::Video | SourceKind::VideoChannel => true,
    };

    if cheap_unchanged {
        tracing::debug!("{} unchanged (cheap check)", entry.url);
        kb.catalog
            .touch_refreshed(&entry.url_hash, now, next)
            .await?;
        return Ok(RefreshStatus::Unchanged);
    }

    // Full fetch and hash comparison: HEAD validators can lie.
    let doc = {
        let _slot = kb.fetch_slots.acquire().await;
        if let Some(host) = urls::host_of(&entry.url) {
            kb.limiter.acquire(&host).await;
        }
        queue::fetch_document(kb, &entry.url, entry.kind)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?
    };

    let new_hash = content_hash(&doc.text);
    let stored_hash = stored.first().map(|c| c.content_hash.clone());

    if stored_hash.as_deref() == Some(new_hash.as_str()) {
        tracing::debug!("{} unchanged (content hash)", entry.url);
        kb.vectors.update_validators(&entry.url, &doc.validators)?;
        kb.catalog
            .touch_refreshed(&entry.url_hash, now, next)
            .await?;
        return Ok(RefreshStatus::Unchanged);
    }

    tracing::info!("{} changed, replacing chunks", entry.url);
    queue::ingest_document(kb, &entry.url, &doc)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    kb.catalog
        .touch_refreshed(&entry.url_hash, now, next)
        .await?;
    Ok(RefreshStatus::Updated)
}

/// HEAD request following redirects; returns the page's current
/// validators.
async fn head_validators(
    client: &reqwest::Client,
    url: &str,
) -> Result<(Option<String>, Option<String>)> {
    let resp = client
        .head(url)
        .timeout(HEAD_TIMEOUT)
        .send()
        .await
        .context("HEAD request failed")?;
    let header_str = |name: header::HeaderName| {
        resp.headers()
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    Ok((
        header_str(header::LAST_MODIFIED),
        header_str(header::ETAG),
    ))
}

/// Either validator matching its stored counterpart proves freshness.
/// A validator only counts when both sides are present.
pub fn validators_unchanged(
    stored_last_modified: Option<&str>,
    stored_etag: Option<&str>,
    new_last_modified: Option<&str>,
    new_etag: Option<&str>,
) -> bool {
    if let (Some(stored), Some(new)) = (stored_last_modified, new_last_modified) {
        if stored == new {
            return true;
        }
    }
    if let (Some(stored), Some(new)) = (stored_etag, new_etag) {
        if stored == new {
            return true;
        }
    }
    false
}

/// Tip commit of the remote default branch via `git ls-remote`.
async fn remote_tip(url: &str) -> Result<Option<String>> {
    let (owner, repo) = match urls::repo_slug(url) {
        Some(slug) => slug,
        None => return Ok(None),
    };
    let host = urls::host_of(url).unwrap_or_default();
    let remote = format!("https://{host}/{owner}/{repo}.git");

    let output = tokio::time::timeout(
        LS_REMOTE_TIMEOUT,
        tokio::process::Command::new("git")
            .args(["ls-remote", &remote, "HEAD"])
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .context("git ls-remote timed out")?
    .context("git ls-remote failed to run")?;

    if !output.status.success() {
        anyhow::bail!(
            "git ls-remote failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .split_whitespace()
        .next()
        .filter(|tip| !tip.is_empty())
        .map(|tip| tip.to_string()))
}

// ─── Cron schedule ───────────────────────────────────────

/// Five-field cron expression (minute, hour, day-of-month, month,
/// day-of-week) supporting `*`, `*/n`, lists and ranges. Enough for a
/// weekly low-traffic refresh window.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

#[derive(Debug, Clone)]
enum CronField {
    Any,
    Step(u32),
    Values(Vec<u32>),
}

impl CronField {
    fn parse(spec: &str, min: u32, max: u32) -> Result<Self> {
        if spec == "*" {
            return Ok(CronField::Any);
        }
        if let Some(step) = spec.strip_prefix("*/") {
            let step: u32 = step.parse().context("bad cron step")?;
            if step == 0 {
                anyhow::bail!("cron step of zero");
            }
            return Ok(CronField::Step(step));
        }

        let mut values = Vec::new();
        for part in spec.split(',') {
            if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo.parse().context("bad cron range")?;
                let hi: u32 = hi.parse().context("bad cron range")?;
                if lo > hi {
                    anyhow::bail!("inverted cron range {part}");
                }
                values.extend(lo..=hi);
            } else {
                values.push(part.parse().context("bad cron value")?);
            }
        }
        if values.iter().any(|v| *v < min || *v > max) {
            anyhow::bail!("cron value out of range {min}-{max}: {spec}");
        }
        Ok(CronField::Values(values))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Step(step) => value % step == 0,
            CronField::Values(values) => values.contains(&value),
        }
    }
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            anyhow::bail!("cron expression needs 5 fields, got {}", parts.len());
        }
        Ok(Self {
            minute: CronField::parse(parts[0], 0, 59)?,
            hour: CronField::parse(parts[1], 0, 23)?,
            day_of_month: CronField::parse(parts[2], 1, 31)?,
            month: CronField::parse(parts[3], 1, 12)?,
            day_of_week: CronField::parse(parts[4], 0, 6)?,
        })
    }

    pub fn matches(&self, at: chrono::DateTime<Utc>) -> bool {
        use chrono::{Datelike, Timelike};
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self
                .day_of_week
                .matches(at.weekday().num_days_from_sunday())
    }

    /// Next matching minute strictly after `from`. Searches at most a
    /// year ahead, which covers every valid 5-field expression.
    pub fn next_after(&self, from: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
        use chrono::{Duration, Timelike};
        let mut candidate = (from + Duration::minutes(1))
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(from);
        for _ in 0..(366 * 24 * 60) {
            if self.matches(candidate) {
                return candidate;
            }
            candidate += Duration::minutes(1);
        }
        candidate
    }
}
