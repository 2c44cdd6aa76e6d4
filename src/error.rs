//! Error taxonomy shared across the ingestion and retrieval pipeline.
//!
//! Fetch failures split into transient (retried with backoff) and
//! permanent (catalog entry marked failed, never retried automatically).
//! Everything else propagates as `anyhow::Error` internally; the typed
//! variants here are the ones callers branch on.

use thiserror::Error;

/// Failure classification for fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network timeouts, 5xx, 429, subprocess timeouts within ceiling.
    /// Recovered by retry; promoted to a failed entry after max retries.
    #[error("transient: {0}")]
    Transient(String),

    /// 4xx (except 429), missing transcripts, unresolvable URLs,
    /// rejected content types. Never retried automatically.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Classify an HTTP status per the retry policy: 429 and 5xx are
    /// transient, other 4xx are permanent.
    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            FetchError::Transient(format!("HTTP {status} from {url}"))
        } else {
            FetchError::Permanent(format!("HTTP {status} from {url}"))
        }
    }

    /// Classify a reqwest transport error. Anything that never produced a
    /// response (DNS, connect, timeout) is transient.
    pub fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if let Some(status) = err.status() {
            Self::from_status(status, url)
        } else {
            FetchError::Transient(format!("request to {url} failed: {err}"))
        }
    }
}

/// Fatal conditions that should stop the process.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The vector index or catalog is in an inconsistent state.
    /// Recovery requires operator intervention.
    #[error("store corruption: {0}")]
    Corruption(String),

    /// Required configuration is missing or invalid at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_429_is_transient() {
        let err = FetchError::from_status(StatusCode::TOO_MANY_REQUESTS, "http://x");
        assert!(err.is_transient());
    }

    #[test]
    fn test_5xx_is_transient() {
        let err = FetchError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "http://x");
        assert!(err.is_transient());
        let err = FetchError::from_status(StatusCode::BAD_GATEWAY, "http://x");
        assert!(err.is_transient());
    }

    #[test]
    fn test_4xx_is_permanent() {
        let err = FetchError::from_status(StatusCode::NOT_FOUND, "http://x");
        assert!(!err.is_transient());
        let err = FetchError::from_status(StatusCode::FORBIDDEN, "http://x");
        assert!(!err.is_transient());
    }
}
