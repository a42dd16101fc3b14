//! Remote vector store backed by the Qdrant REST API.
//!
//! One collection per (product, version). Chunk identifiers that are not
//! already valid point ids are mapped to UUIDs derived from their SHA-256,
//! so repeated runs resolve to the same point. List-style operations
//! (`chunks_for_document`, `remove_obsolete`) page through the scroll API
//! with a bounded page size and continuation token until exhausted, then
//! sort locally by `chunk_index` where present — the service does not
//! guarantee chunk ordering.
//!
//! Checkpoints are stored as reserved points in a `docdex_meta` collection,
//! keyed by source identity.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::models::{ChunkRange, DocumentChunk, ScoredChunk, SearchFilters, StoredChunk};
use crate::store::VectorStore;

/// Page size for scroll pagination.
const SCROLL_LIMIT: usize = 128;

/// Collection holding checkpoint/metadata points.
const META_COLLECTION: &str = "docdex_meta";

pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dims: usize,
    client: reqwest::Client,
    collection_ready: AtomicBool,
    meta_ready: AtomicBool,
}

impl QdrantStore {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        product: &str,
        version: &str,
        dims: usize,
    ) -> Result<Self> {
        if dims == 0 {
            bail!("qdrant store requires a non-zero vector dimensionality");
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            collection: collection_name(product, version),
            dims,
            client: reqwest::Client::new(),
            collection_ready: AtomicBool::new(false),
            meta_ready: AtomicBool::new(false),
        })
    }

    /// Open a store on an explicitly named collection.
    pub fn with_collection(
        base_url: &str,
        api_key: Option<String>,
        collection: &str,
        dims: usize,
    ) -> Result<Self> {
        if dims == 0 {
            bail!("qdrant store requires a non-zero vector dimensionality");
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            collection: collection.to_string(),
            dims,
            client: reqwest::Client::new(),
            collection_ready: AtomicBool::new(false),
            meta_ready: AtomicBool::new(false),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = builder
            .send()
            .await
            .context("qdrant request failed (transport)")?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| json!({ "status": status.as_u16() }));
        if !status.is_success() {
            bail!("qdrant error {}: {}", status, body);
        }
        Ok(body)
    }

    /// Create the collection when it does not exist yet.
    async fn ensure_collection(&self, name: &str, dims: usize, flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::Relaxed) {
            return Ok(());
        }

        let exists = self
            .request(reqwest::Method::GET, &format!("/collections/{}", name))
            .send()
            .await
            .context("qdrant request failed (transport)")?
            .status()
            .is_success();

        if !exists {
            let body = json!({
                "vectors": { "size": dims, "distance": "Cosine" }
            });
            self.send(
                self.request(reqwest::Method::PUT, &format!("/collections/{}", name))
                    .json(&body),
            )
            .await?;
        }

        flag.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Scroll every point matching `filter`, paging until the continuation
    /// token runs out.
    async fn scroll_all(&self, filter: Option<Value>) -> Result<Vec<Value>> {
        let mut points = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": SCROLL_LIMIT,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(ref f) = filter {
                body["filter"] = f.clone();
            }
            if let Some(ref o) = offset {
                body["offset"] = o.clone();
            }

            let response = self
                .request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/scroll", self.collection),
                )
                .json(&body)
                .send()
                .await
                .context("qdrant request failed (transport)")?;

            // Missing collection is an empty result, not an error.
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            let status = response.status();
            let json: Value = response.json().await?;
            if !status.is_success() {
                bail!("qdrant error {}: {}", status, json);
            }

            let result = &json["result"];
            if let Some(batch) = result["points"].as_array() {
                points.extend(batch.iter().cloned());
            }

            match &result["next_page_offset"] {
                Value::Null => break,
                next => offset = Some(next.clone()),
            }
        }

        Ok(points)
    }
}

/// Map a chunk identifier onto a valid Qdrant point id. Identifiers that
/// already parse as UUIDs pass through; anything else is hashed so the
/// mapping stays stable across runs.
pub fn point_id(chunk_id: &str) -> String {
    if let Ok(uuid) = Uuid::parse_str(chunk_id) {
        return uuid.to_string();
    }
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

fn collection_name(product: &str, version: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}_{}", sanitize(product), sanitize(version))
}

/// Equality filters as a conjunction of payload-match conditions.
fn filter_conditions(filters: &SearchFilters) -> Vec<Value> {
    let pairs = [
        ("product_name", &filters.product_name),
        ("version", &filters.version),
        ("branch", &filters.branch),
        ("repo", &filters.repo),
    ];
    pairs
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .map(|v| json!({ "key": key, "match": { "value": v } }))
        })
        .collect()
}

fn must_filter(conditions: Vec<Value>) -> Option<Value> {
    if conditions.is_empty() {
        None
    } else {
        Some(json!({ "must": conditions }))
    }
}

fn chunk_payload(chunk: &DocumentChunk) -> Value {
    json!({
        "chunk_id": chunk.chunk_id,
        "url": chunk.url,
        "title": chunk.title,
        "content": chunk.content,
        "content_hash": chunk.content_hash,
        "section": chunk.section,
        "heading_hierarchy": chunk.heading_hierarchy,
        "chunk_index": chunk.chunk_index,
        "total_chunks": chunk.total_chunks,
        "product_name": chunk.product_name,
        "version": chunk.version,
        "branch": chunk.branch,
        "repo": chunk.repo,
    })
}

/// Explicit field mapping from a point payload to the fixed result struct.
fn payload_to_chunk(payload: &Value) -> StoredChunk {
    let get_str = |key: &str| payload[key].as_str().map(|s| s.to_string());
    StoredChunk {
        chunk_id: get_str("chunk_id").unwrap_or_default(),
        content: get_str("content").unwrap_or_default(),
        content_hash: get_str("content_hash").unwrap_or_default(),
        url: get_str("url").unwrap_or_default(),
        title: get_str("title"),
        section: get_str("section"),
        heading_hierarchy: payload["heading_hierarchy"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        chunk_index: payload["chunk_index"].as_i64(),
        total_chunks: payload["total_chunks"].as_i64(),
        product_name: get_str("product_name"),
        version: get_str("version"),
        branch: get_str("branch"),
        repo: get_str("repo"),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn lookup_hash(&self, chunk_id: &str) -> Result<Option<String>> {
        let body = json!({
            "ids": [point_id(chunk_id)],
            "with_payload": ["content_hash"],
        });

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points", self.collection),
            )
            .json(&body)
            .send()
            .await
            .context("qdrant request failed (transport)")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        let json: Value = response.json().await?;
        if !status.is_success() {
            bail!("qdrant error {}: {}", status, json);
        }

        Ok(json["result"]
            .as_array()
            .and_then(|points| points.first())
            .and_then(|p| p["payload"]["content_hash"].as_str())
            .map(|s| s.to_string()))
    }

    async fn upsert(&self, chunk: &DocumentChunk, embedding: &[f32]) -> Result<()> {
        self.ensure_collection(&self.collection, self.dims, &self.collection_ready)
            .await?;

        let body = json!({
            "points": [{
                "id": point_id(&chunk.chunk_id),
                "vector": embedding,
                "payload": chunk_payload(chunk),
            }]
        });

        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&body),
        )
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = must_filter(filter_conditions(filters)) {
            body["filter"] = filter;
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&body)
            .send()
            .await
            .context("qdrant request failed (transport)")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let status = response.status();
        let json: Value = response.json().await?;
        if !status.is_success() {
            bail!("qdrant error {}: {}", status, json);
        }

        let hits = json["result"].as_array().cloned().unwrap_or_default();
        Ok(hits
            .iter()
            .map(|hit| {
                // Qdrant reports cosine similarity; convert to a distance so
                // smaller continues to mean closer.
                let score = hit["score"].as_f64().unwrap_or(0.0) as f32;
                ScoredChunk {
                    chunk: payload_to_chunk(&hit["payload"]),
                    distance: 1.0 - score,
                }
            })
            .collect())
    }

    async fn chunks_for_document(
        &self,
        url: &str,
        filters: &SearchFilters,
        range: Option<ChunkRange>,
    ) -> Result<Vec<StoredChunk>> {
        let mut conditions = filter_conditions(filters);
        conditions.push(json!({ "key": "url", "match": { "value": url } }));

        let points = self.scroll_all(must_filter(conditions)).await?;

        let mut chunks: Vec<StoredChunk> = points
            .iter()
            .map(|p| payload_to_chunk(&p["payload"]))
            .collect();

        if let Some(r) = range {
            chunks.retain(|c| match c.chunk_index {
                Some(i) => i >= r.start && i <= r.end,
                None => true,
            });
        }

        // The service does not guarantee ordering; sort locally.
        chunks.sort_by_key(|c| c.chunk_index.unwrap_or(i64::MAX));

        Ok(chunks)
    }

    async fn remove_obsolete(&self, url_prefix: &str, keep: &HashSet<String>) -> Result<u64> {
        let points = self.scroll_all(None).await?;

        let obsolete: Vec<String> = points
            .iter()
            .filter(|p| {
                p["payload"]["url"]
                    .as_str()
                    .map(|u| u.starts_with(url_prefix))
                    .unwrap_or(false)
            })
            .filter(|p| {
                p["payload"]["chunk_id"]
                    .as_str()
                    .map(|id| !keep.contains(id))
                    .unwrap_or(true)
            })
            .filter_map(|p| match &p["id"] {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();

        if obsolete.is_empty() {
            return Ok(0);
        }

        let body = json!({ "points": obsolete });
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!(
                    "/collections/{}/points/delete?wait=true",
                    self.collection
                ),
            )
            .json(&body),
        )
        .await?;

        Ok(obsolete.len() as u64)
    }

    async fn checkpoint(&self, source_key: &str) -> Result<Option<String>> {
        let body = json!({
            "ids": [point_id(source_key)],
            "with_payload": ["cursor"],
        });

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points", META_COLLECTION),
            )
            .json(&body)
            .send()
            .await
            .context("qdrant request failed (transport)")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        let json: Value = response.json().await?;
        if !status.is_success() {
            bail!("qdrant error {}: {}", status, json);
        }

        Ok(json["result"]
            .as_array()
            .and_then(|points| points.first())
            .and_then(|p| p["payload"]["cursor"].as_str())
            .map(|s| s.to_string()))
    }

    async fn set_checkpoint(&self, source_key: &str, cursor: &str) -> Result<()> {
        // The metadata collection stores no meaningful vectors; a fixed
        // single-dimension placeholder satisfies the schema.
        self.ensure_collection(META_COLLECTION, 1, &self.meta_ready)
            .await?;

        let body = json!({
            "points": [{
                "id": point_id(source_key),
                "vector": [0.0],
                "payload": {
                    "source_key": source_key,
                    "cursor": cursor,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                },
            }]
        });

        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", META_COLLECTION),
            )
            .json(&body),
        )
        .await?;

        Ok(())
    }
}
