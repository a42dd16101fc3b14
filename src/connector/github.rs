//! GitHub issue-tracker connector.
//!
//! Paginates the repository's issue listing filtered by a `since` timestamp
//! taken from the crawl checkpoint. Rate-limit responses are retried after
//! waiting until the limiter's reset time (exponential backoff when the
//! header is absent), up to a bounded attempt count; exhausting the retries
//! fails the run. Each issue and its comment thread is synthesized into a
//! single markdown document handed to the chunker as one unit.
//!
//! Authentication is optional: when `GITHUB_TOKEN` is set it is sent as a
//! bearer token, which raises the rate limit considerably.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::connector::{SourceConnector, Traversal};
use crate::models::RawDocument;
use crate::retry::{RetryClass, RetryPolicy};

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

pub struct GithubIssuesConnector {
    repo: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    token: Option<String>,
}

impl GithubIssuesConnector {
    pub fn new(repo: String) -> Self {
        Self {
            repo,
            client: reqwest::Client::new(),
            retry: RetryPolicy::new(5, Duration::from_secs(1)),
            token: std::env::var("GITHUB_TOKEN").ok(),
        }
    }

    /// GET a GitHub API url, retrying on rate limits and transient errors.
    async fn fetch_json(&self, url: &str) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let class = last_err
                    .as_ref()
                    .map(|(class, _)| *class)
                    .unwrap_or(RetryClass::Transient);
                let delay = self.retry.delay_for(attempt - 1, class);
                if matches!(class, RetryClass::RateLimited { .. }) {
                    info!(url, wait_secs = delay.as_secs(), "rate limited; waiting");
                }
                tokio::time::sleep(delay).await;
            }

            let mut builder = self
                .client
                .get(url)
                .header("User-Agent", "docdex")
                .header("Accept", "application/vnd.github+json");
            if let Some(ref token) = self.token {
                builder = builder.header("Authorization", format!("Bearer {}", token));
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if is_rate_limited(&response, status) {
                        let reset = header_i64(&response, "x-ratelimit-reset");
                        last_err = Some((
                            RetryClass::RateLimited { reset_unix: reset },
                            anyhow::anyhow!("GitHub rate limit hit on {}", url),
                        ));
                        continue;
                    }

                    if status.is_server_error() {
                        last_err = Some((
                            RetryClass::Transient,
                            anyhow::anyhow!("GitHub API error {} on {}", status, url),
                        ));
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    bail!("GitHub API error {} on {}: {}", status, url, body);
                }
                Err(e) => {
                    last_err = Some((RetryClass::Transient, e.into()));
                }
            }
        }

        Err(last_err
            .map(|(_, e)| e)
            .unwrap_or_else(|| anyhow::anyhow!("GitHub fetch failed after retries")))
    }

    /// List all issues updated since `since`, walking pages until a short
    /// page signals the end.
    async fn list_issues(&self, since: Option<&str>) -> Result<Vec<Value>> {
        let mut issues = Vec::new();
        let mut page = 1usize;

        loop {
            let mut url = format!(
                "{}/repos/{}/issues?state=all&sort=updated&direction=asc&per_page={}&page={}",
                API_BASE, self.repo, PER_PAGE, page
            );
            if let Some(since) = since {
                url.push_str(&format!("&since={}", since));
            }

            let batch = match self.fetch_json(&url).await? {
                Value::Array(items) => items,
                other => bail!("unexpected GitHub issue listing shape: {}", other),
            };

            let len = batch.len();
            // Pull requests appear in the issues listing; skip them.
            issues.extend(
                batch
                    .into_iter()
                    .filter(|issue| issue.get("pull_request").is_none()),
            );

            if len < PER_PAGE {
                break;
            }
            page += 1;
        }

        debug!(repo = %self.repo, count = issues.len(), "issues listed");
        Ok(issues)
    }

    /// Fetch the full comment thread for one issue.
    async fn list_comments(&self, issue_number: i64) -> Result<Vec<Value>> {
        let mut comments = Vec::new();
        let mut page = 1usize;

        loop {
            let url = format!(
                "{}/repos/{}/issues/{}/comments?per_page={}&page={}",
                API_BASE, self.repo, issue_number, PER_PAGE, page
            );
            let batch = match self.fetch_json(&url).await? {
                Value::Array(items) => items,
                other => bail!("unexpected GitHub comment listing shape: {}", other),
            };
            let len = batch.len();
            comments.extend(batch);
            if len < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(comments)
    }
}

fn is_rate_limited(response: &reqwest::Response, status: reqwest::StatusCode) -> bool {
    if status.as_u16() == 429 {
        return true;
    }
    status.as_u16() == 403
        && response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "0")
            .unwrap_or(false)
}

fn header_i64(response: &reqwest::Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Combine issue metadata, body, and comments into one markdown document.
fn issue_to_markdown(issue: &Value, comments: &[Value]) -> String {
    let title = issue["title"].as_str().unwrap_or("(untitled)");
    let number = issue["number"].as_i64().unwrap_or(0);
    let state = issue["state"].as_str().unwrap_or("unknown");
    let author = issue["user"]["login"].as_str().unwrap_or("unknown");
    let created = issue["created_at"].as_str().unwrap_or("");
    let body = issue["body"].as_str().unwrap_or("");

    let mut doc = format!("# Issue #{}: {}\n\n", number, title);
    doc.push_str(&format!(
        "State: {} | Author: {} | Created: {}\n\n",
        state, author, created
    ));

    let labels: Vec<&str> = issue["labels"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|l| l["name"].as_str())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if !labels.is_empty() {
        doc.push_str(&format!("Labels: {}\n\n", labels.join(", ")));
    }

    if !body.trim().is_empty() {
        doc.push_str(body.trim());
        doc.push_str("\n\n");
    }

    for comment in comments {
        let commenter = comment["user"]["login"].as_str().unwrap_or("unknown");
        let when = comment["created_at"].as_str().unwrap_or("");
        let text = comment["body"].as_str().unwrap_or("");
        doc.push_str(&format!("## Comment by {} ({})\n\n", commenter, when));
        doc.push_str(text.trim());
        doc.push_str("\n\n");
    }

    doc
}

#[async_trait]
impl SourceConnector for GithubIssuesConnector {
    fn checkpoint_key(&self) -> Option<String> {
        Some(self.repo.clone())
    }

    async fn traverse(&self, checkpoint: Option<&str>) -> Result<Traversal> {
        let issues = self.list_issues(checkpoint).await?;

        let mut documents = Vec::with_capacity(issues.len());
        let mut latest: Option<String> = checkpoint.map(|s| s.to_string());

        for issue in &issues {
            let number = match issue["number"].as_i64() {
                Some(n) => n,
                None => {
                    warn!(repo = %self.repo, "issue without number; skipping");
                    continue;
                }
            };

            let comments = if issue["comments"].as_i64().unwrap_or(0) > 0 {
                self.list_comments(number).await?
            } else {
                Vec::new()
            };

            let url = issue["html_url"]
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| {
                    format!("https://github.com/{}/issues/{}", self.repo, number)
                });

            documents.push(RawDocument {
                url,
                title: issue["title"].as_str().map(|s| s.to_string()),
                content: issue_to_markdown(issue, &comments),
            });

            if let Some(updated) = issue["updated_at"].as_str() {
                if latest.as_deref().map(|l| updated > l).unwrap_or(true) {
                    latest = Some(updated.to_string());
                }
            }
        }

        // A listing fetch failure propagates as Err before this point, so a
        // traversal that returns at all completed without network failure.
        Ok(Traversal {
            documents,
            network_error: false,
            next_checkpoint: latest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_to_markdown_combines_body_and_comments() {
        let issue = json!({
            "number": 42,
            "title": "Crash on startup",
            "state": "open",
            "user": { "login": "alice" },
            "created_at": "2026-01-02T03:04:05Z",
            "labels": [{ "name": "bug" }, { "name": "p1" }],
            "body": "It crashes."
        });
        let comments = vec![json!({
            "user": { "login": "bob" },
            "created_at": "2026-01-03T00:00:00Z",
            "body": "Repro confirmed."
        })];

        let doc = issue_to_markdown(&issue, &comments);
        assert!(doc.starts_with("# Issue #42: Crash on startup"));
        assert!(doc.contains("Labels: bug, p1"));
        assert!(doc.contains("It crashes."));
        assert!(doc.contains("## Comment by bob"));
        assert!(doc.contains("Repro confirmed."));
    }

    #[test]
    fn test_issue_to_markdown_handles_empty_body() {
        let issue = json!({
            "number": 7,
            "title": "Question",
            "state": "closed",
            "user": { "login": "carol" },
            "created_at": "2026-01-02T00:00:00Z",
            "labels": [],
            "body": null
        });
        let doc = issue_to_markdown(&issue, &[]);
        assert!(doc.contains("# Issue #7: Question"));
        assert!(!doc.contains("Labels:"));
    }

    #[test]
    fn test_checkpoint_key_is_repo() {
        let connector = GithubIssuesConnector::new("acme/widget".to_string());
        assert_eq!(connector.checkpoint_key().as_deref(), Some("acme/widget"));
    }
}
