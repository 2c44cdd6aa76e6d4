//! HTML fetcher: retrieve a page, strip boilerplate, and render the main
//! content as markdown. HTTP validators (`Last-Modified`, `ETag`) are
//! captured verbatim for the refresher's cheap checks.

use reqwest::header;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

use crate::error::FetchError;
use crate::models::{DocValidators, FetchedDocument, SourceKind};
use crate::urls;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Extraction below this many characters from `<article>`/`<main>` falls
/// back to the whole body.
const MIN_MAIN_CONTENT_CHARS: usize = 500;

/// Static extraction below this many characters triggers the rendering
/// service, when one is configured.
const RENDER_FALLBACK_CHARS: usize = 200;

pub struct HtmlFetcher {
    client: reqwest::Client,
    render_endpoint: Option<String>,
}

impl HtmlFetcher {
    pub fn new(client: reqwest::Client, render_endpoint: Option<String>) -> Self {
        Self {
            client,
            render_endpoint,
        }
    }

    pub async fn fetch(&self, url: &str, kind: SourceKind) -> Result<FetchedDocument, FetchError> {
        let (html, validators) = self.get_html(url).await?;
        let mut page = extract_page(&html);

        // JS-heavy pages render almost nothing statically; retry through
        // the rendering sidecar when one is available.
        if page.markdown.len() < RENDER_FALLBACK_CHARS {
            if let Some(endpoint) = &self.render_endpoint {
                tracing::debug!("Static extraction thin for {url}, using render service");
                if let Ok(rendered) = self.get_rendered(endpoint, url).await {
                    let rendered_page = extract_page(&rendered);
                    if rendered_page.markdown.len() > page.markdown.len() {
                        page = rendered_page;
                    }
                }
            }
        }

        if page.markdown.trim().is_empty() {
            return Err(FetchError::Permanent(format!(
                "no extractable content at {url}"
            )));
        }

        Ok(FetchedDocument {
            url: url.to_string(),
            kind,
            title: page.title,
            language: page.language,
            domain: urls::host_of(url).unwrap_or_default(),
            text: page.markdown,
            validators,
            segments: Vec::new(),
            duration_secs: None,
        })
    }

    async fn get_html(&self, url: &str) -> Result<(String, DocValidators), FetchError> {
        let resp = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, url))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, url));
        }

        let header_str = |name: header::HeaderName| {
            resp.headers()
                .get(&name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        let content_type = header_str(header::CONTENT_TYPE);
        if let Some(ct) = &content_type {
            let ct = ct.to_lowercase();
            if !ct.contains("html") && !ct.contains("text") && !ct.contains("xml") {
                return Err(FetchError::Permanent(format!(
                    "unsupported content type {ct} at {url}"
                )));
            }
        }

        let validators = DocValidators {
            http_last_modified: header_str(header::LAST_MODIFIED),
            http_etag: header_str(header::ETAG),
            commit_id: None,
            status_code: Some(status.as_u16()),
            content_type,
        };

        let html = resp
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("reading body of {url} failed: {e}")))?;

        Ok((html, validators))
    }

    async fn get_rendered(&self, endpoint: &str, url: &str) -> Result<String, FetchError> {
        let render_url = format!("{}/content?url={}", endpoint.trim_end_matches('/'), url);
        let resp = self
            .client
            .get(&render_url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, url))?;
        if !resp.status().is_success() {
            return Err(FetchError::from_status(resp.status(), url));
        }
        resp.text()
            .await
            .map_err(|e| FetchError::Transient(format!("render service body failed: {e}")))
    }
}

struct ExtractedPage {
    title: String,
    language: String,
    markdown: String,
}

/// Tags whose subtrees are navigation or machinery, never content.
const SKIP_TAGS: [&str; 10] = [
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "template",
    "svg",
];

/// Parse an HTML document and render its main content as markdown.
fn extract_page(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .unwrap_or_default();

    let language = Selector::parse("html")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .and_then(|el| el.value().attr("lang"))
        .unwrap_or("en")
        .to_string();

    // Prefer the semantic content root, falling back to body when it is
    // too thin to be the real article.
    let main_markdown = pick_root(&document, &["article", "main"])
        .map(|root| render_markdown(root))
        .unwrap_or_default();
    let markdown = if main_markdown.len() >= MIN_MAIN_CONTENT_CHARS {
        main_markdown
    } else {
        let body_markdown = pick_root(&document, &["body"])
            .map(|root| render_markdown(root))
            .unwrap_or_default();
        if body_markdown.len() > main_markdown.len() {
            body_markdown
        } else {
            main_markdown
        }
    };

    ExtractedPage {
        title,
        language,
        markdown,
    }
}

fn pick_root<'a>(document: &'a Html, candidates: &[&str]) -> Option<ElementRef<'a>> {
    for tag in candidates {
        if let Ok(selector) = Selector::parse(tag) {
            if let Some(root) = document.select(&selector).next() {
                return Some(root);
            }
        }
    }
    None
}

fn render_markdown(root: ElementRef<'_>) -> String {
    let mut blocks: Vec<String> = Vec::new();
    walk(root, &mut blocks);
    blocks.join("\n\n")
}

/// Recursive block collector. Content-bearing tags emit a markdown block
/// and stop descending; skip-list subtrees are dropped wholesale;
/// everything else recurses.
fn walk(element: ElementRef<'_>, blocks: &mut Vec<String>) {
    let tag = element.value().name();
    if SKIP_TAGS.contains(&tag) {
        return;
    }

    let block = match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag[1..].parse::<usize>().unwrap_or(1);
            let text = collapse_whitespace(&element.text().collect::<String>());
            (!text.is_empty()).then(|| format!("{} {text}", "#".repeat(level)))
        }
        "p" | "blockquote" => {
            let text = collapse_whitespace(&element.text().collect::<String>());
            if text.is_empty() {
                None
            } else if tag == "blockquote" {
                Some(format!("> {text}"))
            } else {
                Some(text)
            }
        }
        "li" => {
            let text = collapse_whitespace(&element.text().collect::<String>());
            (!text.is_empty()).then(|| format!("- {text}"))
        }
        "pre" => {
            let code = preserve_lines(&element.text().collect::<String>());
            (!code.is_empty()).then(|| format!("```\n{code}\n```"))
        }
        _ => None,
    };

    if let Some(block) = block {
        blocks.push(block);
        return;
    }

    for child in element.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            walk(child_el, blocks);
        }
    }
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !out.is_empty() {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim_end().to_string()
}

fn preserve_lines(input: &str) -> String {
    input
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html lang="fr">
          <head><title>  My   Guide </title></head>
          <body>
            <nav><a href="/home">Home</a><p>menu text</p></nav>
            <article>
              <h1>Getting Started</h1>
              <p>Install the package with <b>cargo</b>.</p>
              <h2>Usage</h2>
              <ul><li>First step</li><li>Second step</li></ul>
              <pre>cargo add corpus-search</pre>
              <blockquote>Works everywhere.</blockquote>
            </article>
            <footer><p>copyright</p></footer>
          </body>
        </html>
    "#;

    #[test]
    fn test_extracts_title_and_language() {
        let page = extract_page(PAGE);
        assert_eq!(page.title, "My Guide");
        assert_eq!(page.language, "fr");
    }

    #[test]
    fn test_markdown_structure() {
        let page = extract_page(PAGE);
        assert!(page.markdown.contains("# Getting Started"));
        assert!(page.markdown.contains("## Usage"));
        assert!(page.markdown.contains("- First step"));
        assert!(page.markdown.contains("```\ncargo add corpus-search\n```"));
        assert!(page.markdown.contains("> Works everywhere."));
    }

    #[test]
    fn test_navigation_and_footer_stripped() {
        let page = extract_page(PAGE);
        assert!(!page.markdown.contains("menu text"));
        assert!(!page.markdown.contains("copyright"));
    }

    #[test]
    fn test_inline_markup_flattened() {
        let page = extract_page(PAGE);
        assert!(page.markdown.contains("Install the package with cargo."));
    }

    #[test]
    fn test_body_fallback_when_no_article() {
        let html = "<html><body><p>Only a body paragraph here.</p></body></html>";
        let page = extract_page(html);
        assert!(page.markdown.contains("Only a body paragraph here."));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n  b\t c  "), "a b c");
    }
}
