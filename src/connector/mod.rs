//! Source connectors.
//!
//! A connector produces the documents of one configured source and reports
//! whether its traversal completed without network failure — the flag that
//! gates end-of-run cleanup. Three variants: GitHub issue trackers, crawled
//! websites, and local file trees.

pub mod github;
pub mod local;
pub mod website;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{SourceConfig, SourceKind};
use crate::models::RawDocument;

/// Result of one traversal run.
#[derive(Debug, Default)]
pub struct Traversal {
    /// Documents discovered in this run, in traversal order.
    pub documents: Vec<RawDocument>,
    /// True when any transport-level fetch error occurred. A partial
    /// traversal must never drive deletion, so this flag suppresses
    /// cleanup for the whole run.
    pub network_error: bool,
    /// Checkpoint value to persist once every document in this run has
    /// been fully processed. `None` for sources without checkpoints.
    pub next_checkpoint: Option<String>,
}

/// A data source that can enumerate its documents.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Key under which this source's checkpoint is persisted, or `None`
    /// for sources that re-enumerate everything each run.
    fn checkpoint_key(&self) -> Option<String> {
        None
    }

    /// Enumerate documents, resuming from `checkpoint` where supported.
    async fn traverse(&self, checkpoint: Option<&str>) -> Result<Traversal>;
}

/// Build the connector for a configured source. Selection happens once per
/// source at the start of a run.
pub fn connector_for(source: &SourceConfig) -> Box<dyn SourceConnector> {
    match &source.kind {
        SourceKind::GithubIssues { repo } => {
            Box::new(github::GithubIssuesConnector::new(repo.clone()))
        }
        SourceKind::Website {
            url,
            max_depth,
            max_pages,
        } => Box::new(website::WebsiteConnector::new(
            url.clone(),
            *max_depth,
            *max_pages,
        )),
        SourceKind::LocalDirectory {
            root,
            url_rewrite_prefix,
            include_globs,
            exclude_globs,
            ..
        } => Box::new(local::LocalDirectoryConnector::new(
            root.clone(),
            url_rewrite_prefix.clone(),
            include_globs.clone(),
            exclude_globs.clone(),
        )),
    }
}
