//! Markdown-aware content processor.
//!
//! Splits a document's text into [`DocumentChunk`]s on paragraph boundaries
//! while tracking the enclosing heading hierarchy. Each chunk receives a
//! deterministic identifier derived from `(url, chunk_index)` and a SHA-256
//! hash of its text, so repeated runs over unchanged content produce
//! byte-for-byte identical identifiers and hashes.

use sha2::{Digest, Sha256};

use crate::config::SourceConfig;
use crate::models::DocumentChunk;

/// Approximate chars-per-token ratio used to bound chunk size.
const CHARS_PER_TOKEN: usize = 4;

/// Default chunk budget in tokens.
const MAX_TOKENS: usize = 700;

/// Deterministic chunk identifier for a `(document url, position)` pair.
pub fn chunk_id(url: &str, chunk_index: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"#");
    hasher.update(chunk_index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 content hash used for change detection.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct PendingChunk {
    text: String,
    section: Option<String>,
    hierarchy: Vec<String>,
}

/// Split document content into ordered chunks with contiguous indices
/// starting at 0 and `total_chunks` equal to the sequence length.
pub fn chunk_document(
    content: &str,
    source: &SourceConfig,
    url: &str,
    title: Option<&str>,
) -> Vec<DocumentChunk> {
    let max_chars = MAX_TOKENS * CHARS_PER_TOKEN;

    let mut pending: Vec<PendingChunk> = Vec::new();
    let mut buf = String::new();
    // Heading path keyed by markdown level; level 0 unused.
    let mut heading_stack: Vec<(usize, String)> = Vec::new();
    let mut buf_hierarchy: Vec<String> = Vec::new();

    let flush = |pending: &mut Vec<PendingChunk>, buf: &mut String, hierarchy: &[String]| {
        if !buf.trim().is_empty() {
            pending.push(PendingChunk {
                text: buf.trim().to_string(),
                section: hierarchy.last().cloned(),
                hierarchy: hierarchy.to_vec(),
            });
        }
        buf.clear();
    };

    for para in content.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // A heading starts a new chunk and updates the hierarchy.
        if let Some((level, text)) = parse_heading(trimmed) {
            flush(&mut pending, &mut buf, &buf_hierarchy);
            heading_stack.retain(|(l, _)| *l < level);
            heading_stack.push((level, text));
            buf_hierarchy = heading_stack.iter().map(|(_, t)| t.clone()).collect();
            buf.push_str(trimmed);
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            flush(&mut pending, &mut buf, &buf_hierarchy);
        }

        if trimmed.len() > max_chars {
            flush(&mut pending, &mut buf, &buf_hierarchy);
            // Hard split oversized paragraphs at word boundaries.
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
                let actual = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                buf.push_str(remaining[..actual].trim());
                flush(&mut pending, &mut buf, &buf_hierarchy);
                remaining = &remaining[actual..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    flush(&mut pending, &mut buf, &buf_hierarchy);

    // A whitespace-only document yields no chunks; there is nothing to
    // embed and an empty chunk would be rejected by every provider.

    let total = pending.len() as i64;
    let (branch, repo) = source_metadata(source);

    pending
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let index = i as i64;
            DocumentChunk {
                chunk_id: chunk_id(url, index),
                content_hash: content_hash(&p.text),
                content: p.text,
                url: url.to_string(),
                title: title.map(|t| t.to_string()),
                section: p.section,
                heading_hierarchy: p.hierarchy,
                chunk_index: index,
                total_chunks: total,
                product_name: source.product.clone(),
                version: source.version.clone(),
                branch: branch.clone(),
                repo: repo.clone(),
            }
        })
        .collect()
}

fn source_metadata(source: &SourceConfig) -> (Option<String>, Option<String>) {
    match &source.kind {
        crate::config::SourceKind::GithubIssues { repo } => (None, Some(repo.clone())),
        crate::config::SourceKind::Website { .. } => (None, None),
        crate::config::SourceKind::LocalDirectory { branch, .. } => (branch.clone(), None),
    }
}

/// Parse an ATX markdown heading (`#` through `######`).
fn parse_heading(line: &str) -> Option<(usize, String)> {
    let first_line = line.lines().next()?;
    let level = first_line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = first_line[level..].trim();
    if rest.is_empty() {
        return None;
    }
    Some((level, rest.to_string()))
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceConfig, SourceKind};

    fn test_source() -> SourceConfig {
        SourceConfig {
            product: "widget".to_string(),
            version: "1.0".to_string(),
            embedding: None,
            kind: SourceKind::Website {
                url: "https://docs.acme.dev/".to_string(),
                max_depth: 5,
                max_pages: 500,
            },
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document("Hello, world!", &test_source(), "https://x/a", None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].content, "Hello, world!");
    }

    #[test]
    fn test_stable_identifiers_across_runs() {
        let text = "# Intro\n\nAlpha\n\n# Usage\n\nBeta";
        let a = chunk_document(text, &test_source(), "https://x/a", None);
        let b = chunk_document(text, &test_source(), "https://x/a", None);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
            assert_eq!(x.content_hash, y.content_hash);
        }
    }

    #[test]
    fn test_chunk_id_depends_on_url_and_index() {
        assert_ne!(chunk_id("https://x/a", 0), chunk_id("https://x/b", 0));
        assert_ne!(chunk_id("https://x/a", 0), chunk_id("https://x/a", 1));
        assert_eq!(chunk_id("https://x/a", 3), chunk_id("https://x/a", 3));
    }

    #[test]
    fn test_indices_contiguous_and_total_consistent() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {} with some padding text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document(&text, &test_source(), "https://x/a", None);
        let total = chunks.len() as i64;
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.total_chunks, total);
        }
    }

    #[test]
    fn test_heading_hierarchy_tracked() {
        let text = "# Guide\n\nIntro text.\n\n## Install\n\nRun the installer.";
        let chunks = chunk_document(text, &test_source(), "https://x/a", None);
        let install = chunks
            .iter()
            .find(|c| c.content.contains("installer"))
            .unwrap();
        assert_eq!(install.section.as_deref(), Some("Install"));
        assert_eq!(
            install.heading_hierarchy,
            vec!["Guide".to_string(), "Install".to_string()]
        );
    }

    #[test]
    fn test_sibling_heading_replaces_level() {
        let text = "# Guide\n\n## Install\n\nA.\n\n## Configure\n\nB.";
        let chunks = chunk_document(text, &test_source(), "https://x/a", None);
        let configure = chunks.iter().find(|c| c.content.contains("B.")).unwrap();
        assert_eq!(
            configure.heading_hierarchy,
            vec!["Guide".to_string(), "Configure".to_string()]
        );
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        assert!(chunk_document("", &test_source(), "https://x/a", None).is_empty());
        assert!(chunk_document("  \n\n \t ", &test_source(), "https://x/a", None).is_empty());
    }

    #[test]
    fn test_repo_metadata_from_issue_source() {
        let source = SourceConfig {
            product: "widget".to_string(),
            version: "1.0".to_string(),
            embedding: None,
            kind: SourceKind::GithubIssues {
                repo: "acme/widget".to_string(),
            },
        };
        let chunks = chunk_document("Body.", &source, "https://x/1", None);
        assert_eq!(chunks[0].repo.as_deref(), Some("acme/widget"));
    }
}
