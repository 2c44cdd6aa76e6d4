//! Video sources: transcript retrieval and channel expansion.
//!
//! The transcript provider returns timestamped segments per video; a
//! video with no transcript is a permanent failure. Channels never carry
//! a chunkable document themselves: the expander enumerates a bounded
//! number of video URLs which become ordinary pending entries.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::FetchError;
use crate::models::{DocValidators, FetchedDocument, SourceKind, TranscriptSegment};
use crate::urls;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct VideoFetcher {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration_secs: Option<u64>,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Deserialize)]
struct RawSegment {
    start: f64,
    text: String,
}

impl VideoFetcher {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let video_id = urls::video_id(url)
            .ok_or_else(|| FetchError::Permanent(format!("no video id in {url}")))?;

        let endpoint = format!(
            "{}/transcripts/{video_id}",
            self.base_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .get(&endpoint)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, url))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(FetchError::Permanent(format!(
                "no transcript available for {video_id}"
            )));
        }
        if !status.is_success() {
            return Err(FetchError::from_status(status, url));
        }

        let body: TranscriptResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("transcript parse failed: {e}")))?;

        let segments: Vec<TranscriptSegment> = body
            .segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| TranscriptSegment {
                start_secs: s.start,
                text: s.text,
            })
            .collect();

        if segments.is_empty() {
            return Err(FetchError::Permanent(format!(
                "empty transcript for {video_id}"
            )));
        }

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(FetchedDocument {
            url: url.to_string(),
            kind: SourceKind::Video,
            title: body.title.unwrap_or_else(|| video_id.clone()),
            language: body.language.unwrap_or_else(|| "en".to_string()),
            domain: urls::host_of(url).unwrap_or_default(),
            text,
            validators: DocValidators::default(),
            segments,
            duration_secs: body.duration_secs,
        })
    }
}

pub struct VideoChannelExpander {
    client: reqwest::Client,
    max_videos: usize,
}

fn video_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""videoId":"([A-Za-z0-9_-]{11})""#).expect("videoId regex"))
}

impl VideoChannelExpander {
    pub fn new(client: reqwest::Client, max_videos: usize) -> Self {
        Self { client, max_videos }
    }

    /// Enumerate up to `max_videos` watch URLs from a channel or playlist
    /// page.
    pub async fn expand(&self, channel_url: &str) -> Result<Vec<String>, FetchError> {
        // channels list their uploads on the videos tab; playlist pages
        // already are the listing
        let videos_url = if channel_url.contains("/playlist") || channel_url.ends_with("/videos")
        {
            channel_url.to_string()
        } else {
            format!("{}/videos", channel_url.trim_end_matches('/'))
        };

        let resp = self
            .client
            .get(&videos_url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, channel_url))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, channel_url));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("channel page read failed: {e}")))?;

        Ok(extract_video_urls(&html, self.max_videos))
    }
}

/// Pull distinct video ids out of the channel page markup, preserving
/// discovery order (newest first on the videos tab).
pub fn extract_video_urls(html: &str, max_videos: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();

    for capture in video_id_regex().captures_iter(html) {
        let id = &capture[1];
        if seen.insert(id.to_string()) {
            urls.push(format!("https://www.youtube.com/watch?v={id}"));
            if urls.len() >= max_videos {
                break;
            }
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_urls_dedupes_and_caps() {
        let html = r#"
            {"videoId":"AAAAAAAAAAA","x":1}
            {"videoId":"BBBBBBBBBBB"}
            {"videoId":"AAAAAAAAAAA"}
            {"videoId":"CCCCCCCCCCC"}
        "#;
        let urls = extract_video_urls(html, 2);
        assert_eq!(
            urls,
            vec![
                "https://www.youtube.com/watch?v=AAAAAAAAAAA",
                "https://www.youtube.com/watch?v=BBBBBBBBBBB",
            ]
        );
    }

    #[test]
    fn test_extract_video_urls_empty_page() {
        assert!(extract_video_urls("<html>no ids here</html>", 50).is_empty());
    }

    #[test]
    fn test_extract_ignores_malformed_ids() {
        let html = r#"{"videoId":"short"} {"videoId":"DDDDDDDDDDD"}"#;
        let urls = extract_video_urls(html, 50);
        assert_eq!(urls.len(), 1);
        assert!(urls[0].ends_with("DDDDDDDDDDD"));
    }

    #[test]
    fn test_transcript_response_shape() {
        let json = r#"{
            "title": "Intro to Rust",
            "duration_secs": 900,
            "segments": [
                {"start": 0.0, "text": "hello"},
                {"start": 4.5, "text": "world"}
            ]
        }"#;
        let parsed: TranscriptResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Intro to Rust"));
        assert_eq!(parsed.segments.len(), 2);
        assert_eq!(parsed.segments[1].start, 4.5);
    }
}
