//! Embedded SQLite vector store: one database file per product.
//!
//! Each logical operation opens a fresh connection — there is no persistent
//! pool. Vectors are stored as little-endian f32 BLOBs; nearest-neighbor
//! queries load the candidate rows selected by the metadata predicate and
//! compute cosine distance over them, ordered ascending.
//!
//! Older database files predate the `chunk_index`/`total_chunks` columns.
//! Column presence is determined by introspecting `PRAGMA table_info`
//! before a statement is built; when the columns are missing, range
//! predicates and chunk ordering are dropped with a warning instead of
//! surfacing an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::{ChunkRange, DocumentChunk, ScoredChunk, SearchFilters, StoredChunk};
use crate::store::VectorStore;

pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the store file for `product` under `dir`.
    pub fn new(dir: &Path, product: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;
        let file_name = format!("{}.sqlite", sanitize_product(product));
        Ok(Self {
            db_path: dir.join(file_name),
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Open a fresh connection and make sure the schema exists.
    async fn connect(&self) -> Result<SqliteConnection> {
        let options = SqliteConnectOptions::new()
            .filename(&self.db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let mut conn = options.connect().await?;
        ensure_schema(&mut conn).await?;
        Ok(conn)
    }

    /// Column names present on the `chunks` table.
    async fn table_columns(&self, conn: &mut SqliteConnection) -> Result<HashSet<String>> {
        let rows = sqlx::query("PRAGMA table_info(chunks)")
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect())
    }
}

async fn ensure_schema(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            title TEXT,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            section TEXT,
            heading_hierarchy TEXT,
            chunk_index INTEGER,
            total_chunks INTEGER,
            product_name TEXT,
            version TEXT,
            branch TEXT,
            repo TEXT,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_url ON chunks(url)")
        .execute(&mut *conn)
        .await?;

    // Checkpoint/progress records live alongside the chunk records in the
    // same file.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn sanitize_product(product: &str) -> String {
    product
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Append equality clauses for the filter fields that are present; absent
/// filters impose no constraint.
fn filter_clauses(filters: &SearchFilters, where_parts: &mut Vec<String>, binds: &mut Vec<String>) {
    let pairs = [
        ("product_name", &filters.product_name),
        ("version", &filters.version),
        ("branch", &filters.branch),
        ("repo", &filters.repo),
    ];
    for (column, value) in pairs {
        if let Some(v) = value {
            where_parts.push(format!("{} = ?", column));
            binds.push(v.clone());
        }
    }
}

/// Explicit field mapping from a row to the fixed result struct. `ordered`
/// indicates whether the chunk ordering columns exist in this file.
fn row_to_chunk(row: &SqliteRow, ordered: bool) -> StoredChunk {
    let hierarchy: Vec<String> = row
        .get::<Option<String>, _>("heading_hierarchy")
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default();

    StoredChunk {
        chunk_id: row.get("chunk_id"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        url: row.get("url"),
        title: row.get("title"),
        section: row.get("section"),
        heading_hierarchy: hierarchy,
        chunk_index: if ordered { row.get("chunk_index") } else { None },
        total_chunks: if ordered { row.get("total_chunks") } else { None },
        product_name: row.get("product_name"),
        version: row.get("version"),
        branch: row.get("branch"),
        repo: row.get("repo"),
    }
}

const BASE_COLUMNS: &str =
    "chunk_id, url, title, content, content_hash, section, heading_hierarchy, \
     product_name, version, branch, repo";

#[async_trait]
impl VectorStore for SqliteStore {
    async fn lookup_hash(&self, chunk_id: &str) -> Result<Option<String>> {
        let mut conn = self.connect().await?;
        let hash: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM chunks WHERE chunk_id = ?")
                .bind(chunk_id)
                .fetch_optional(&mut conn)
                .await?;
        conn.close().await?;
        Ok(hash)
    }

    async fn upsert(&self, chunk: &DocumentChunk, embedding: &[f32]) -> Result<()> {
        let mut conn = self.connect().await?;
        let hierarchy = serde_json::to_string(&chunk.heading_hierarchy)?;
        let blob = vec_to_blob(embedding);

        sqlx::query(
            r#"
            INSERT INTO chunks (chunk_id, url, title, content, content_hash, section,
                                heading_hierarchy, chunk_index, total_chunks,
                                product_name, version, branch, repo, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                content = excluded.content,
                content_hash = excluded.content_hash,
                section = excluded.section,
                heading_hierarchy = excluded.heading_hierarchy,
                chunk_index = excluded.chunk_index,
                total_chunks = excluded.total_chunks,
                product_name = excluded.product_name,
                version = excluded.version,
                branch = excluded.branch,
                repo = excluded.repo,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.url)
        .bind(&chunk.title)
        .bind(&chunk.content)
        .bind(&chunk.content_hash)
        .bind(&chunk.section)
        .bind(hierarchy)
        .bind(chunk.chunk_index)
        .bind(chunk.total_chunks)
        .bind(&chunk.product_name)
        .bind(&chunk.version)
        .bind(&chunk.branch)
        .bind(&chunk.repo)
        .bind(blob)
        .execute(&mut conn)
        .await?;

        conn.close().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut conn = self.connect().await?;
        let columns = self.table_columns(&mut conn).await?;
        let ordered = columns.contains("chunk_index") && columns.contains("total_chunks");

        let select = if ordered {
            format!(
                "SELECT {}, chunk_index, total_chunks, embedding FROM chunks",
                BASE_COLUMNS
            )
        } else {
            format!("SELECT {}, embedding FROM chunks", BASE_COLUMNS)
        };

        let mut where_parts: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        filter_clauses(filters, &mut where_parts, &mut binds);

        let sql = if where_parts.is_empty() {
            select
        } else {
            format!("{} WHERE {}", select, where_parts.join(" AND "))
        };

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&mut conn).await?;
        conn.close().await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                ScoredChunk {
                    chunk: row_to_chunk(row, ordered),
                    distance: cosine_distance(vector, &stored),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        Ok(scored)
    }

    async fn chunks_for_document(
        &self,
        url: &str,
        filters: &SearchFilters,
        range: Option<ChunkRange>,
    ) -> Result<Vec<StoredChunk>> {
        let mut conn = self.connect().await?;
        let columns = self.table_columns(&mut conn).await?;
        let ordered = columns.contains("chunk_index") && columns.contains("total_chunks");

        if !ordered && range.is_some() {
            warn!(
                url,
                "chunk ordering columns missing from this database; \
                 range filter ignored"
            );
        }

        let select = if ordered {
            format!(
                "SELECT {}, chunk_index, total_chunks FROM chunks",
                BASE_COLUMNS
            )
        } else {
            format!("SELECT {} FROM chunks", BASE_COLUMNS)
        };

        let mut where_parts = vec!["url = ?".to_string()];
        let mut binds = vec![url.to_string()];
        filter_clauses(filters, &mut where_parts, &mut binds);

        let mut sql = format!("{} WHERE {}", select, where_parts.join(" AND "));
        let effective_range = if ordered { range } else { None };
        if ordered {
            if effective_range.is_some() {
                sql.push_str(" AND chunk_index >= ? AND chunk_index <= ?");
            }
            sql.push_str(" ORDER BY chunk_index ASC");
        }

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        if let Some(r) = effective_range {
            query = query.bind(r.start).bind(r.end);
        }
        let rows = query.fetch_all(&mut conn).await?;
        conn.close().await?;

        Ok(rows.iter().map(|row| row_to_chunk(row, ordered)).collect())
    }

    async fn remove_obsolete(&self, url_prefix: &str, keep: &HashSet<String>) -> Result<u64> {
        let mut conn = self.connect().await?;

        let rows = sqlx::query("SELECT chunk_id FROM chunks WHERE url LIKE ? ESCAPE '\\'")
            .bind(format!("{}%", escape_like(url_prefix)))
            .fetch_all(&mut conn)
            .await?;

        let obsolete: Vec<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("chunk_id"))
            .filter(|id| !keep.contains(id))
            .collect();

        for chunk_id in &obsolete {
            sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
                .bind(chunk_id)
                .execute(&mut conn)
                .await?;
        }

        conn.close().await?;
        Ok(obsolete.len() as u64)
    }

    async fn checkpoint(&self, source_key: &str) -> Result<Option<String>> {
        let mut conn = self.connect().await?;
        let cursor: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
                .bind(source_key)
                .fetch_optional(&mut conn)
                .await?;
        conn.close().await?;
        Ok(cursor)
    }

    async fn set_checkpoint(&self, source_key: &str, cursor: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source_key)
        .bind(cursor)
        .bind(now)
        .execute(&mut conn)
        .await?;
        conn.close().await?;
        Ok(())
    }
}

/// Escape `%`, `_`, and `\` so a url prefix matches literally in LIKE.
fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
