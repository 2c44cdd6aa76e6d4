//! Kind-specific content fetchers and the per-host rate limiter.
//!
//! The queue processor dispatches claimed entries here by inspecting
//! their kind: HTML pages, repository trees, video transcripts, and
//! channel expansion. Every fetcher classifies failures as transient or
//! permanent per the retry policy.

pub mod html;
pub mod rate_limit;
pub mod repo;
pub mod video;
