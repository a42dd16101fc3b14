//! Storage backend abstraction.
//!
//! Two implementations sit behind the [`VectorStore`] trait: an embedded
//! per-product SQLite file store ([`sqlite::SqliteStore`]) and a remote
//! Qdrant collection store ([`qdrant::QdrantStore`]). The backend is chosen
//! once at startup via [`open_store`]; callers never branch on a backend
//! tag again.

pub mod qdrant;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::config::Config;
use crate::models::{ChunkRange, DocumentChunk, ScoredChunk, SearchFilters, StoredChunk};

/// Unifying contract over chunk persistence, nearest-neighbor queries,
/// crawl checkpoints, and scoped deletion.
///
/// Invariant: for a given `chunk_id` at most one live record exists in a
/// backend at any time; [`upsert`](VectorStore::upsert) is idempotent and
/// keyed by `chunk_id`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Stored content hash for a chunk, or `None` if the chunk is absent.
    /// Not-found is not an error.
    async fn lookup_hash(&self, chunk_id: &str) -> Result<Option<String>>;

    /// Write or replace the record for `chunk.chunk_id`. The embedding is
    /// write-only; it is never returned from queries.
    async fn upsert(&self, chunk: &DocumentChunk, embedding: &[f32]) -> Result<()>;

    /// Nearest-neighbor lookup: up to `top_k` chunks ordered by ascending
    /// distance, restricted by the equality `filters` (absent filter fields
    /// impose no constraint).
    async fn query(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// All stored chunks for one document url, ordered by `chunk_index`
    /// where the backend has ordering columns. Backends predating chunk
    /// ordering return the chunks unordered and ignore `range` with a
    /// warning — never an error.
    async fn chunks_for_document(
        &self,
        url: &str,
        filters: &SearchFilters,
        range: Option<ChunkRange>,
    ) -> Result<Vec<StoredChunk>>;

    /// Delete every stored chunk whose url starts with `url_prefix` and
    /// whose `chunk_id` is not in `keep`. Returns the number of deleted
    /// chunks.
    async fn remove_obsolete(&self, url_prefix: &str, keep: &HashSet<String>) -> Result<u64>;

    /// Persisted crawl checkpoint for a source identity (e.g. a repo name).
    async fn checkpoint(&self, source_key: &str) -> Result<Option<String>>;

    /// Advance the crawl checkpoint. Callers must only invoke this after
    /// every document fetched in the current run has been fully processed.
    async fn set_checkpoint(&self, source_key: &str, cursor: &str) -> Result<()>;
}

/// Open the configured storage backend for one (product, version) target.
pub fn open_store(
    config: &Config,
    product: &str,
    version: &str,
    dims: usize,
) -> Result<Box<dyn VectorStore>> {
    match config.storage.backend.as_str() {
        "sqlite" => Ok(Box::new(sqlite::SqliteStore::new(
            &config.storage.sqlite_dir,
            product,
        )?)),
        "qdrant" => {
            let url = config
                .storage
                .qdrant_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("storage.qdrant_url not configured"))?;
            let api_key = config
                .storage
                .qdrant_api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            match config.storage.qdrant_collection.as_deref() {
                Some(name) => Ok(Box::new(qdrant::QdrantStore::with_collection(
                    url, api_key, name, dims,
                )?)),
                None => Ok(Box::new(qdrant::QdrantStore::new(
                    url, api_key, product, version, dims,
                )?)),
            }
        }
        other => anyhow::bail!("Unknown storage backend: {}", other),
    }
}
