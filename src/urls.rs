//! URL normalization, hashing and source-kind detection.
//!
//! Normalization sits in the hot path of deduplication: two URLs with
//! identical normalized forms must hash identically, so every caller
//! that inserts into the catalog goes through [`normalize`] first.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use url::Url;

use crate::models::SourceKind;

/// Hosts treated as the video platform.
const VIDEO_HOSTS: [&str; 3] = ["youtube.com", "www.youtube.com", "m.youtube.com"];
const VIDEO_SHORT_HOST: &str = "youtu.be";

/// Public code-hosting services with `/owner/repo` URL shapes.
const CODE_HOSTS: [&str; 4] = [
    "github.com",
    "gitlab.com",
    "codeberg.org",
    "bitbucket.org",
];

/// First path segments on code hosts that are not repository owners.
const CODE_HOST_NON_REPO_SEGMENTS: [&str; 10] = [
    "topics",
    "search",
    "orgs",
    "collections",
    "marketplace",
    "features",
    "explore",
    "trending",
    "login",
    "signup",
];

/// Documentation-hosting suffixes that always warrant a crawl.
const DOC_HOST_SUFFIXES: [&str; 4] = [
    "readthedocs.io",
    "gitbook.io",
    "readme.io",
    "notion.site",
];

/// Path fragments that mark documentation or article content worth
/// crawling.
const DOC_PATH_HINTS: [&str; 8] = [
    "docs", "tutorial", "guide", "learn", "blog", "article", "post", "news",
];

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("url regex"))
}

/// Extract syntactic URLs from free-form text.
pub fn extract_urls(text: &str) -> Vec<String> {
    url_regex()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches([',', '.', ';', ':']).to_string())
        .filter(|u| Url::parse(u).is_ok())
        .collect()
}

/// Canonicalize a URL for hashing and fetching. Returns `None` for
/// anything that is not an http(s) URL.
///
/// Applied transformations: lowercase scheme and host, strip default
/// ports and fragments, drop tracking parameters (`utm_*` plus the
/// configured key list), collapse repeated slashes, trim the trailing
/// slash everywhere but the root. Video-platform URLs additionally keep
/// only the video-id parameter on watch URLs and no parameters at all on
/// channel URLs.
pub fn normalize(raw: &str, drop_params: &[String]) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.host_str()?;

    url.set_fragment(None);

    let host = url.host_str().unwrap_or_default().to_string();
    if VIDEO_HOSTS.contains(&host.as_str()) {
        if url.path().starts_with("/watch") {
            let video_id = url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned());
            match video_id {
                Some(id) => {
                    url.query_pairs_mut().clear().append_pair("v", &id);
                }
                None => url.set_query(None),
            }
        } else if url.path().starts_with("/playlist") {
            let playlist_id = url
                .query_pairs()
                .find(|(k, _)| k == "list")
                .map(|(_, v)| v.into_owned());
            match playlist_id {
                Some(id) => {
                    url.query_pairs_mut().clear().append_pair("list", &id);
                }
                None => url.set_query(None),
            }
        } else {
            url.set_query(None);
        }
    } else if host == VIDEO_SHORT_HOST {
        url.set_query(None);
    } else if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| {
                !k.starts_with("utm_") && !drop_params.iter().any(|p| p == k.as_ref())
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    // Collapse repeated slashes and trim the trailing one (root keeps it).
    let mut path = String::with_capacity(url.path().len());
    let mut last_slash = false;
    for ch in url.path().chars() {
        if ch == '/' {
            if !last_slash {
                path.push('/');
            }
            last_slash = true;
        } else {
            path.push(ch);
            last_slash = false;
        }
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if path.is_empty() {
        path.push('/');
    }
    url.set_path(&path);

    Some(url.to_string())
}

/// Stable identity of a normalized URL: the leading 64 bits of its
/// SHA-256, hex-encoded.
pub fn url_hash(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Detect the source kind from a normalized URL.
pub fn detect_kind(normalized: &str) -> SourceKind {
    let Ok(url) = Url::parse(normalized) else {
        return SourceKind::WebPage;
    };
    let host = url.host_str().unwrap_or_default();
    let path = url.path();

    if host == VIDEO_SHORT_HOST {
        return SourceKind::Video;
    }
    if VIDEO_HOSTS.contains(&host) {
        if ["/channel/", "/c/", "/user/"]
            .iter()
            .any(|p| path.starts_with(p))
            || path.starts_with("/@")
        {
            return SourceKind::VideoChannel;
        }
        if path.starts_with("/playlist") {
            return SourceKind::VideoChannel;
        }
        // watch pages, shorts, and anything else on the platform
        return SourceKind::Video;
    }

    if CODE_HOSTS.contains(&host) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() >= 2 && !CODE_HOST_NON_REPO_SEGMENTS.contains(&segments[0]) {
            return SourceKind::Repo;
        }
    }

    SourceKind::WebPage
}

/// Documentation heuristic used to promote `web_page` entries to
/// `doc_site_page` and trigger crawling.
pub fn is_documentation_like(normalized: &str) -> bool {
    let Ok(url) = Url::parse(normalized) else {
        return false;
    };
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let path = url.path().to_lowercase();

    if host.contains("docs.")
        || host.contains("doc.")
        || host.contains("documentation")
        || host.contains("wiki")
        || host.contains("confluence")
    {
        return true;
    }
    if DOC_HOST_SUFFIXES.iter().any(|s| host.ends_with(s)) {
        return true;
    }
    DOC_PATH_HINTS.iter().any(|hint| path.contains(hint))
}

/// Host component of a URL, if parseable.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Extract `(owner, repo)` from a code-hosting URL.
pub fn repo_slug(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() >= 2 {
        Some((
            segments[0].to_string(),
            segments[1].trim_end_matches(".git").to_string(),
        ))
    } else {
        None
    }
}

/// Extract the video id from a watch-style or short URL.
pub fn video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host == VIDEO_SHORT_HOST {
        let id = parsed.path().trim_start_matches('/');
        return (!id.is_empty()).then(|| id.to_string());
    }
    if VIDEO_HOSTS.contains(&host) {
        if parsed.path().starts_with("/watch") {
            return parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned());
        }
        if let Some(id) = parsed.path().strip_prefix("/shorts/") {
            let id = id.trim_end_matches('/');
            return (!id.is_empty()).then(|| id.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> Option<String> {
        normalize(raw, &["ref".to_string(), "fbclid".to_string()])
    }

    // ── normalize ────────────────────────────────────────

    #[test]
    fn test_normalize_lowercases_scheme_and_host() {
        assert_eq!(
            norm("HTTP://EXAMPLE.ORG/a/").unwrap(),
            "http://example.org/a"
        );
    }

    #[test]
    fn test_normalize_equivalent_pair_matches() {
        let a = norm("HTTP://EXAMPLE.ORG/a/").unwrap();
        let b = norm("http://example.org/a").unwrap();
        assert_eq!(a, b);
        assert_eq!(url_hash(&a), url_hash(&b));
    }

    #[test]
    fn test_normalize_strips_fragment_and_tracking() {
        assert_eq!(
            norm("https://example.org/docs/intro?utm_source=x#top").unwrap(),
            "https://example.org/docs/intro"
        );
    }

    #[test]
    fn test_normalize_keeps_meaningful_params() {
        let n = norm("https://example.org/search?page=2&utm_medium=mail").unwrap();
        assert_eq!(n, "https://example.org/search?page=2");
    }

    #[test]
    fn test_normalize_drops_configured_keys() {
        let n = norm("https://example.org/a?ref=hn&id=7").unwrap();
        assert_eq!(n, "https://example.org/a?id=7");
    }

    #[test]
    fn test_normalize_strips_default_port() {
        assert_eq!(
            norm("http://example.org:80/a").unwrap(),
            "http://example.org/a"
        );
        assert_eq!(
            norm("https://example.org:443/a").unwrap(),
            "https://example.org/a"
        );
    }

    #[test]
    fn test_normalize_keeps_explicit_port() {
        assert_eq!(
            norm("http://example.org:8080/a").unwrap(),
            "http://example.org:8080/a"
        );
    }

    #[test]
    fn test_normalize_collapses_repeated_slashes() {
        assert_eq!(
            norm("https://example.org//a///b/").unwrap(),
            "https://example.org/a/b"
        );
    }

    #[test]
    fn test_normalize_root_keeps_slash() {
        assert_eq!(norm("https://example.org").unwrap(), "https://example.org/");
        assert_eq!(
            norm("https://example.org/").unwrap(),
            "https://example.org/"
        );
    }

    #[test]
    fn test_normalize_rejects_non_http() {
        assert!(norm("ftp://example.org/a").is_none());
        assert!(norm("not a url").is_none());
    }

    #[test]
    fn test_normalize_watch_url_keeps_only_video_id() {
        let n = norm("https://www.youtube.com/watch?v=abc123&t=42s&list=PL9").unwrap();
        assert_eq!(n, "https://www.youtube.com/watch?v=abc123");
    }

    #[test]
    fn test_normalize_channel_url_drops_query() {
        let n = norm("https://www.youtube.com/@rustlang?sub_confirmation=1").unwrap();
        assert_eq!(n, "https://www.youtube.com/@rustlang");
    }

    #[test]
    fn test_normalize_playlist_keeps_list_id() {
        let n = norm("https://www.youtube.com/playlist?list=PL9xmBV&utm_source=x").unwrap();
        assert_eq!(n, "https://www.youtube.com/playlist?list=PL9xmBV");
    }

    // ── url_hash ─────────────────────────────────────────

    #[test]
    fn test_hash_is_hex_and_stable() {
        let h = url_hash("https://example.org/a");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, url_hash("https://example.org/a"));
    }

    #[test]
    fn test_hash_differs_for_different_urls() {
        assert_ne!(
            url_hash("https://example.org/a"),
            url_hash("https://example.org/b")
        );
    }

    // ── detect_kind ──────────────────────────────────────

    #[test]
    fn test_detect_video() {
        assert_eq!(
            detect_kind("https://www.youtube.com/watch?v=abc"),
            SourceKind::Video
        );
        assert_eq!(detect_kind("https://youtu.be/abc123"), SourceKind::Video);
        assert_eq!(
            detect_kind("https://www.youtube.com/shorts/xyz"),
            SourceKind::Video
        );
    }

    #[test]
    fn test_detect_channel() {
        assert_eq!(
            detect_kind("https://www.youtube.com/@rustlang"),
            SourceKind::VideoChannel
        );
        assert_eq!(
            detect_kind("https://www.youtube.com/channel/UC12345"),
            SourceKind::VideoChannel
        );
        assert_eq!(
            detect_kind("https://www.youtube.com/c/SomeChannel"),
            SourceKind::VideoChannel
        );
        assert_eq!(
            detect_kind("https://www.youtube.com/playlist?list=PL9"),
            SourceKind::VideoChannel
        );
    }

    #[test]
    fn test_detect_repo() {
        assert_eq!(
            detect_kind("https://github.com/rust-lang/rust"),
            SourceKind::Repo
        );
        assert_eq!(
            detect_kind("https://gitlab.com/group/project"),
            SourceKind::Repo
        );
    }

    #[test]
    fn test_detect_repo_excludes_topic_pages() {
        assert_eq!(
            detect_kind("https://github.com/topics/rust"),
            SourceKind::WebPage
        );
        assert_eq!(detect_kind("https://github.com/rust-lang"), SourceKind::WebPage);
    }

    #[test]
    fn test_detect_web_page_default() {
        assert_eq!(
            detect_kind("https://example.org/whatever"),
            SourceKind::WebPage
        );
    }

    // ── is_documentation_like ────────────────────────────

    #[test]
    fn test_doc_host_labels() {
        assert!(is_documentation_like("https://docs.example.com/intro"));
        assert!(is_documentation_like("https://wiki.example.com/Page"));
        assert!(is_documentation_like("https://tokio.readthedocs.io/"));
    }

    #[test]
    fn test_doc_path_hints() {
        assert!(is_documentation_like("https://example.org/blog/async-rust"));
        assert!(is_documentation_like("https://example.org/learn/basics"));
    }

    #[test]
    fn test_non_doc_urls() {
        assert!(!is_documentation_like("https://example.org/pricing"));
        assert!(!is_documentation_like("https://shop.example.org/"));
    }

    // ── extract_urls ─────────────────────────────────────

    #[test]
    fn test_extract_urls_from_text() {
        let urls = extract_urls("see https://example.org/a and http://other.io/b.");
        assert_eq!(
            urls,
            vec!["https://example.org/a", "http://other.io/b"]
        );
    }

    #[test]
    fn test_extract_urls_none_in_prose() {
        assert!(extract_urls("teach me about async runtimes").is_empty());
    }

    // ── helpers ──────────────────────────────────────────

    #[test]
    fn test_repo_slug() {
        assert_eq!(
            repo_slug("https://github.com/rust-lang/rust"),
            Some(("rust-lang".to_string(), "rust".to_string()))
        );
        assert_eq!(
            repo_slug("https://github.com/rust-lang/rust.git"),
            Some(("rust-lang".to_string(), "rust".to_string()))
        );
        assert_eq!(repo_slug("https://github.com/rust-lang"), None);
    }

    #[test]
    fn test_video_id_variants() {
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            video_id("https://www.youtube.com/shorts/abc"),
            Some("abc".to_string())
        );
        assert_eq!(video_id("https://example.org/watch?v=x"), None);
    }
}
