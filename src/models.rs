//! Core data models used throughout docdex.
//!
//! These types represent the chunks, filters, and results that flow through
//! the ingestion and retrieval pipeline. Storage backends map their rows and
//! payloads into these fixed structs at the backend boundary — untyped rows
//! never escape a backend module.

/// A fully prepared chunk ready for storage: the unit of embedding and
/// retrieval.
///
/// `chunk_id` is a deterministic hash of `(url, chunk_index)` so that
/// re-ingestion of unchanged content maps onto the same stored record.
/// The embedding vector is passed separately to [`crate::store::VectorStore::upsert`]
/// and is write-only — it is never read back out of a backend.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub content: String,
    /// SHA-256 of `content`; compared against the stored hash to decide
    /// whether re-embedding is needed.
    pub content_hash: String,
    /// Document identifier: issue URL, page URL, or rewritten file URL.
    pub url: String,
    pub title: Option<String>,
    /// Nearest enclosing markdown heading, if any.
    pub section: Option<String>,
    /// Full heading path from the document root to this chunk.
    pub heading_hierarchy: Vec<String>,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub product_name: String,
    pub version: String,
    pub branch: Option<String>,
    pub repo: Option<String>,
}

/// Chunk metadata as read back from a storage backend.
///
/// `chunk_index`/`total_chunks` are optional because records written by
/// older schema versions predate chunk ordering.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub content: String,
    pub content_hash: String,
    pub url: String,
    pub title: Option<String>,
    pub section: Option<String>,
    pub heading_hierarchy: Vec<String>,
    pub chunk_index: Option<i64>,
    pub total_chunks: Option<i64>,
    pub product_name: Option<String>,
    pub version: Option<String>,
    pub branch: Option<String>,
    pub repo: Option<String>,
}

/// A query hit: chunk metadata plus its distance from the query vector.
/// Smaller distance = more relevant.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub distance: f32,
}

/// Equality filters applied to a nearest-neighbor query. Absent fields
/// impose no constraint.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub product_name: Option<String>,
    pub version: Option<String>,
    pub branch: Option<String>,
    pub repo: Option<String>,
}

/// Inclusive chunk-index range for [`crate::store::VectorStore::chunks_for_document`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkRange {
    pub start: i64,
    pub end: i64,
}

/// A document as produced by a source connector, before chunking.
///
/// Exists only during processing; never persisted directly.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Source-scoped identifier: issue URL, page URL, rewritten file URL.
    pub url: String,
    pub title: Option<String>,
    pub content: String,
}
