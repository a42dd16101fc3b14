//! Website crawler connector.
//!
//! Breadth-first fetch starting at the configured root URL, following
//! discovered links that stay under the root prefix, bounded by depth and
//! page-count limits. Page bodies are converted to markdown. A transport
//! error on any page sets `network_error` for the whole run — suppressing
//! end-of-run cleanup — but does not stop the crawl of other pages.

use anyhow::Result;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

use crate::connector::{SourceConnector, Traversal};
use crate::models::RawDocument;

pub struct WebsiteConnector {
    root_url: String,
    max_depth: usize,
    max_pages: usize,
    client: reqwest::Client,
}

impl WebsiteConnector {
    pub fn new(root_url: String, max_depth: usize, max_pages: usize) -> Self {
        Self {
            root_url,
            max_depth,
            max_pages,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SourceConnector for WebsiteConnector {
    async fn traverse(&self, _checkpoint: Option<&str>) -> Result<Traversal> {
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut documents = Vec::new();
        let mut network_error = false;

        let root = normalize_url(&self.root_url);
        seen.insert(root.clone());
        queue.push_back((root.clone(), 0));

        while let Some((url, depth)) = queue.pop_front() {
            if documents.len() >= self.max_pages {
                warn!(limit = self.max_pages, "page limit reached; crawl stopped");
                break;
            }

            let response = match self
                .client
                .get(&url)
                .header("User-Agent", "docdex")
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(url = %url, error = %e, "page fetch failed");
                    network_error = true;
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                // Broken links are expected on real sites; only transport
                // errors and server failures taint the run.
                if status.is_server_error() {
                    network_error = true;
                }
                debug!(url = %url, status = %status, "page skipped");
                continue;
            }

            let is_html = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(|ct| ct.contains("text/html"))
                .unwrap_or(true);

            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(url = %url, error = %e, "page body read failed");
                    network_error = true;
                    continue;
                }
            };

            if !is_html {
                documents.push(RawDocument {
                    url: url.clone(),
                    title: None,
                    content: body,
                });
                continue;
            }

            let page = parse_page(&body);

            if depth < self.max_depth {
                for href in &page.links {
                    if let Some(absolute) = resolve_link(&url, href) {
                        let normalized = normalize_url(&absolute);
                        if in_scope(&root, &normalized) && seen.insert(normalized.clone()) {
                            queue.push_back((normalized, depth + 1));
                        }
                    }
                }
            }

            documents.push(RawDocument {
                url,
                title: page.title,
                content: page.markdown,
            });
        }

        Ok(Traversal {
            documents,
            network_error,
            next_checkpoint: None,
        })
    }
}

struct ParsedPage {
    title: Option<String>,
    markdown: String,
    links: Vec<String>,
}

/// Convert an HTML page to markdown and collect its outgoing links.
///
/// quick-xml in lenient mode is enough for the tag-level structure we care
/// about (headings, paragraphs, lists, code, anchors); real-world HTML that
/// fails to parse degrades to whatever text was recovered before the error.
fn parse_page(html: &str) -> ParsedPage {
    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;

    let mut title = None;
    let mut markdown = String::new();
    let mut links = Vec::new();

    let mut in_title = false;
    let mut in_pre = false;
    let mut skip_depth = 0usize;
    let mut pending_prefix: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                let tag = String::from_utf8_lossy(name.as_ref()).to_lowercase();
                match tag.as_str() {
                    "script" | "style" | "nav" | "header" | "footer" => skip_depth += 1,
                    "title" => in_title = true,
                    "h1" => pending_prefix = Some("\n\n# "),
                    "h2" => pending_prefix = Some("\n\n## "),
                    "h3" => pending_prefix = Some("\n\n### "),
                    "h4" => pending_prefix = Some("\n\n#### "),
                    "h5" => pending_prefix = Some("\n\n##### "),
                    "h6" => pending_prefix = Some("\n\n###### "),
                    "p" | "div" | "section" | "article" | "tr" => {
                        if !markdown.ends_with("\n\n") {
                            markdown.push_str("\n\n");
                        }
                    }
                    "li" => pending_prefix = Some("\n- "),
                    "pre" => {
                        in_pre = true;
                        markdown.push_str("\n\n```\n");
                    }
                    // Inline code only; a <code> inside <pre> is already
                    // fenced.
                    "code" => {
                        if !in_pre {
                            markdown.push('`');
                        }
                    }
                    "br" => markdown.push('\n'),
                    "a" => {
                        if let Some(href) = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"href")
                        {
                            links.push(String::from_utf8_lossy(&href.value).to_string());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                let tag = String::from_utf8_lossy(name.as_ref()).to_lowercase();
                match tag.as_str() {
                    "script" | "style" | "nav" | "header" | "footer" => {
                        skip_depth = skip_depth.saturating_sub(1)
                    }
                    "title" => in_title = false,
                    "pre" => {
                        in_pre = false;
                        markdown.push_str("\n```\n\n");
                    }
                    "code" => {
                        if !in_pre {
                            markdown.push('`');
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let tag = String::from_utf8_lossy(name.as_ref()).to_lowercase();
                match tag.as_str() {
                    "br" => markdown.push('\n'),
                    "a" => {
                        if let Some(href) = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"href")
                        {
                            links.push(String::from_utf8_lossy(&href.value).to_string());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) => {
                if skip_depth > 0 {
                    continue;
                }
                let text = t.unescape().unwrap_or(std::borrow::Cow::Borrowed(""));
                let text = text.trim_matches(|c: char| c == '\r');
                if text.trim().is_empty() {
                    continue;
                }
                if in_title {
                    if title.is_none() {
                        title = Some(text.trim().to_string());
                    }
                    continue;
                }
                if let Some(prefix) = pending_prefix.take() {
                    markdown.push_str(prefix);
                }
                markdown.push_str(text.trim_matches('\n'));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    ParsedPage {
        title,
        markdown: markdown.trim().to_string(),
        links,
    }
}

/// True when `candidate` is the crawl root itself or a path under it. Both
/// sides must already be normalized. A plain prefix match is not enough:
/// a root of `https://x.dev/doc` must not admit `https://x.dev/docs-other`.
fn in_scope(root: &str, candidate: &str) -> bool {
    candidate == root
        || candidate
            .strip_prefix(root)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

/// Strip the fragment and trailing slash so equivalent URLs dedupe.
fn normalize_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    without_fragment.trim_end_matches('/').to_string()
}

/// Resolve an href against the page it appeared on. Returns `None` for
/// schemes we never follow.
fn resolve_link(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("javascript:")
        || href.starts_with("data:")
    {
        return None;
    }

    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }

    // Protocol-relative.
    if let Some(rest) = href.strip_prefix("//") {
        let scheme = base.split("://").next().unwrap_or("https");
        return Some(format!("{}://{}", scheme, rest));
    }

    // Host-absolute path.
    if href.starts_with('/') {
        let scheme_end = base.find("://")? + 3;
        let host_end = base[scheme_end..]
            .find('/')
            .map(|i| scheme_end + i)
            .unwrap_or(base.len());
        return Some(format!("{}{}", &base[..host_end], href));
    }

    // Relative path: resolve against the base's directory.
    let dir_end = base.rfind('/').unwrap_or(base.len());
    Some(format!("{}/{}", &base[..dir_end], href))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_extracts_title_headings_and_links() {
        let html = r#"<html><head><title>Install Guide</title>
            <style>.x { color: red }</style></head>
            <body><nav><a href="/ignored-nav">Nav</a></nav>
            <h1>Install</h1>
            <p>Run the installer.</p>
            <a href="/guides/setup">Setup</a>
            <a href="https://other.example.com/page">External</a>
            </body></html>"#;
        let page = parse_page(html);
        assert_eq!(page.title.as_deref(), Some("Install Guide"));
        assert!(page.markdown.contains("# Install"));
        assert!(page.markdown.contains("Run the installer."));
        assert!(!page.markdown.contains("color: red"));
        assert!(page.links.contains(&"/guides/setup".to_string()));
    }

    #[test]
    fn test_parse_page_skips_script_content() {
        let html = "<body><script>var x = 1;</script><p>Visible</p></body>";
        let page = parse_page(html);
        assert!(!page.markdown.contains("var x"));
        assert!(page.markdown.contains("Visible"));
    }

    #[test]
    fn test_parse_page_fences_code() {
        let html = "<body><p>Use <code>docdex ingest</code>.</p>\
                    <pre><code>cargo install docdex</code></pre></body>";
        let page = parse_page(html);
        assert!(page.markdown.contains("`docdex ingest`."));
        assert!(page.markdown.contains("```\ncargo install docdex\n```"));
    }

    #[test]
    fn test_resolve_link_variants() {
        let base = "https://docs.acme.dev/guides/install";
        assert_eq!(
            resolve_link(base, "/api/intro").as_deref(),
            Some("https://docs.acme.dev/api/intro")
        );
        assert_eq!(
            resolve_link(base, "setup").as_deref(),
            Some("https://docs.acme.dev/guides/setup")
        );
        assert_eq!(
            resolve_link(base, "https://x.dev/a").as_deref(),
            Some("https://x.dev/a")
        );
        assert_eq!(resolve_link(base, "#section"), None);
        assert_eq!(resolve_link(base, "mailto:a@b.c"), None);
    }

    #[test]
    fn test_in_scope_requires_path_boundary() {
        let root = "https://x.dev/doc";
        assert!(in_scope(root, "https://x.dev/doc"));
        assert!(in_scope(root, "https://x.dev/doc/page"));
        assert!(!in_scope(root, "https://x.dev/docs-other"));
        assert!(!in_scope(root, "https://other.dev/doc"));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://x.dev/a/#frag"),
            "https://x.dev/a"
        );
        assert_eq!(normalize_url("https://x.dev/a/"), "https://x.dev/a");
    }
}
