//! Bounded same-origin crawler for documentation domains.
//!
//! Breadth-first from a start URL: every visited page contributes its
//! `<a href>` targets plus anything listed in the site's sitemap, subject
//! to same-origin, path-exclusion and extension-exclusion rules. The
//! crawler only reads pages to discover links; the discovered URLs become
//! ordinary pending catalog entries fetched later.

use anyhow::Result;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::config::CrawlConfig;
use crate::fetch::rate_limit::HostRateLimiter;
use crate::urls;

const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Path prefixes that are account machinery or API surfaces, not content.
const EXCLUDED_PREFIXES: [&str; 8] = [
    "/login", "/signup", "/search", "/cart", "/checkout", "/account", "/admin", "/api/",
];

/// Opaque or asset extensions that can never chunk into text.
const EXCLUDED_EXTENSIONS: [&str; 24] = [
    "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "mp4", "avi", "mov", "webm", "mp3",
    "wav", "pdf", "zip", "tar", "gz", "rar", "7z", "exe", "dmg", "iso", "woff", "woff2",
];

pub struct Crawler {
    client: reqwest::Client,
    limiter: Arc<HostRateLimiter>,
    config: CrawlConfig,
    tracking_params: Vec<String>,
}

/// Scheme/host/port triple defining the crawl boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Origin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Origin {
    fn of(url: &Url) -> Option<Self> {
        Some(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_string(),
            port: url.port(),
        })
    }
}

impl Crawler {
    pub fn new(
        client: reqwest::Client,
        limiter: Arc<HostRateLimiter>,
        config: CrawlConfig,
        tracking_params: Vec<String>,
    ) -> Self {
        Self {
            client,
            limiter,
            config,
            tracking_params,
        }
    }

    /// BFS from `start_url`. Returns the set of discovered same-origin
    /// URLs (including the start) in visit order. Terminates on the page
    /// cap, queue exhaustion, or the soft time bound.
    pub async fn crawl(&self, start_url: &str) -> Result<Vec<String>> {
        if self.config.max_pages == 0 {
            return Ok(Vec::new());
        }

        let start = match urls::normalize(start_url, &self.tracking_params) {
            Some(s) => s,
            None => anyhow::bail!("unparseable crawl start {start_url}"),
        };
        let start_parsed = Url::parse(&start)?;
        let origin = Origin::of(&start_parsed)
            .ok_or_else(|| anyhow::anyhow!("no host in crawl start {start}"))?;

        let deadline = Instant::now() + Duration::from_secs(self.config.soft_time_limit_secs);
        let mut visited: HashSet<String> = HashSet::new();
        let mut discovered: Vec<String> = Vec::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(start.clone());

        // The sitemap often lists pages no navigation path reaches.
        for loc in self.fetch_sitemap(&start_parsed).await {
            if let Some(normalized) = self.eligible(&loc, &origin) {
                queue.push_back(normalized);
            }
        }

        let mut errors = 0usize;
        while let Some(current) = queue.pop_front() {
            if discovered.len() >= self.config.max_pages {
                break;
            }
            if Instant::now() >= deadline {
                tracing::info!("Crawl of {start} hit soft time bound");
                break;
            }
            if !visited.insert(current.clone()) {
                continue;
            }

            self.limiter.acquire(&origin.host).await;
            let html = match self.get_page(&current).await {
                Ok(html) => html,
                Err(e) => {
                    errors += 1;
                    tracing::debug!("Crawl fetch of {current} failed: {e}");
                    continue;
                }
            };

            discovered.push(current.clone());
            tracing::debug!(
                "Crawled [{}/{}] {current}, queue {}",
                discovered.len(),
                self.config.max_pages,
                queue.len()
            );

            for link in extract_links(&html, &current) {
                if let Some(normalized) = self.eligible(&link, &origin) {
                    if !visited.contains(&normalized) {
                        queue.push_back(normalized);
                    }
                }
            }
        }

        tracing::info!(
            "Crawl of {start} discovered {} pages ({errors} fetch errors)",
            discovered.len()
        );
        Ok(discovered)
    }

    /// Normalize a candidate and apply the boundary rules. Returns the
    /// normalized URL when it should be enqueued.
    fn eligible(&self, raw: &str, origin: &Origin) -> Option<String> {
        let normalized = urls::normalize(raw, &self.tracking_params)?;
        let parsed = Url::parse(&normalized).ok()?;
        link_eligible(&parsed, origin).then_some(normalized)
    }

    async fn get_page(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .timeout(PAGE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.text().await?)
    }

    async fn fetch_sitemap(&self, start: &Url) -> Vec<String> {
        let Some(host) = start.host_str() else {
            return Vec::new();
        };
        let sitemap_url = match start.port() {
            Some(port) => format!("{}://{host}:{port}/sitemap.xml", start.scheme()),
            None => format!("{}://{host}/sitemap.xml", start.scheme()),
        };

        self.limiter.acquire(host).await;
        match self.get_page(&sitemap_url).await {
            Ok(body) => {
                let locs = extract_sitemap_locs(&body);
                if !locs.is_empty() {
                    tracing::debug!("Sitemap at {sitemap_url} listed {} URLs", locs.len());
                }
                locs
            }
            Err(_) => Vec::new(),
        }
    }
}

/// Boundary rules applied to every candidate link.
fn link_eligible(url: &Url, origin: &Origin) -> bool {
    match Origin::of(url) {
        Some(candidate) => {
            if candidate != *origin {
                return false;
            }
        }
        None => return false,
    }

    let path = url.path().to_lowercase();
    if EXCLUDED_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return false;
    }
    if let Some(ext) = path.rsplit('.').next() {
        if path.contains('.') && EXCLUDED_EXTENSIONS.contains(&ext) {
            return false;
        }
    }
    true
}

/// Absolute link targets of a page, resolved against its URL.
fn extract_links(html: &str, base: &str) -> Vec<String> {
    let Ok(base_url) = Url::parse(base) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base_url.join(href).ok())
        .map(|u| u.to_string())
        .collect()
}

fn sitemap_loc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<loc>\s*([^<\s]+)\s*</loc>").expect("loc regex"))
}

fn extract_sitemap_locs(xml: &str) -> Vec<String> {
    sitemap_loc_regex()
        .captures_iter(xml)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Origin {
        Origin {
            scheme: "https".to_string(),
            host: "docs.example.com".to_string(),
            port: None,
        }
    }

    fn check(url: &str) -> bool {
        link_eligible(&Url::parse(url).unwrap(), &origin())
    }

    #[test]
    fn test_same_origin_required() {
        assert!(check("https://docs.example.com/guide"));
        assert!(!check("https://other.example.com/guide"));
        assert!(!check("http://docs.example.com/guide"));
        assert!(!check("https://docs.example.com:8443/guide"));
    }

    #[test]
    fn test_excluded_path_prefixes() {
        assert!(!check("https://docs.example.com/login"));
        assert!(!check("https://docs.example.com/api/v1/thing"));
        assert!(!check("https://docs.example.com/search?q=x"));
        assert!(check("https://docs.example.com/apidocs"));
    }

    #[test]
    fn test_excluded_extensions() {
        assert!(!check("https://docs.example.com/logo.png"));
        assert!(!check("https://docs.example.com/manual.pdf"));
        assert!(!check("https://docs.example.com/release.tar.gz"));
        assert!(check("https://docs.example.com/page.html"));
    }

    #[test]
    fn test_extract_links_resolves_relative() {
        let html = r##"
            <html><body>
              <a href="/guide">Guide</a>
              <a href="intro.html">Intro</a>
              <a href="https://other.org/x">Other</a>
              <a href="#section">Anchor</a>
            </body></html>
        "##;
        let links = extract_links(html, "https://docs.example.com/start/");
        assert!(links.contains(&"https://docs.example.com/guide".to_string()));
        assert!(links.contains(&"https://docs.example.com/start/intro.html".to_string()));
        assert!(links.contains(&"https://other.org/x".to_string()));
    }

    #[test]
    fn test_extract_sitemap_locs() {
        let xml = r#"
            <urlset>
              <url><loc>https://docs.example.com/a</loc></url>
              <url><loc> https://docs.example.com/b </loc></url>
            </urlset>
        "#;
        let locs = extract_sitemap_locs(xml);
        assert_eq!(
            locs,
            vec!["https://docs.example.com/a", "https://docs.example.com/b"]
        );
    }

    #[tokio::test]
    async fn test_zero_page_cap_completes_immediately() {
        let crawler = Crawler::new(
            reqwest::Client::new(),
            Arc::new(HostRateLimiter::new(100.0)),
            CrawlConfig {
                max_pages: 0,
                soft_time_limit_secs: 1,
            },
            Vec::new(),
        );
        let discovered = crawler.crawl("https://docs.example.com").await.unwrap();
        assert!(discovered.is_empty());
    }
}
