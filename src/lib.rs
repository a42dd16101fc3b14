//! docdex: incremental vector indexing and semantic search over
//! documentation sources.
//!
//! Documents are pulled from GitHub issue trackers, crawled websites, and
//! local file trees, split into heading-aware chunks, embedded, and stored
//! in either an embedded SQLite file or a remote Qdrant collection.
//! Re-ingestion is incremental: chunk identities are deterministic and a
//! content hash decides whether a chunk needs re-embedding.

pub mod chunk;
pub mod config;
pub mod connector;
pub mod embedding;
pub mod get;
pub mod ingest;
pub mod models;
pub mod retry;
pub mod search;
pub mod sources;
pub mod store;
