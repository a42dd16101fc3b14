//! Integration tests for the embedded SQLite store.

use std::collections::HashSet;

use docdex::chunk::{chunk_id, content_hash};
use docdex::models::{ChunkRange, DocumentChunk, SearchFilters};
use docdex::store::sqlite::SqliteStore;
use docdex::store::VectorStore;

fn make_chunk(url: &str, index: i64, total: i64, content: &str) -> DocumentChunk {
    DocumentChunk {
        chunk_id: chunk_id(url, index),
        content: content.to_string(),
        content_hash: content_hash(content),
        url: url.to_string(),
        title: Some("Test Doc".to_string()),
        section: None,
        heading_hierarchy: vec!["Intro".to_string()],
        chunk_index: index,
        total_chunks: total,
        product_name: "widget".to_string(),
        version: "1.2".to_string(),
        branch: None,
        repo: None,
    }
}

fn store_in(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::new(dir.path(), "widget").unwrap()
}

#[tokio::test]
async fn test_upsert_then_lookup_hash() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = store_in(&tmp);

    let chunk = make_chunk("https://docs.acme.dev/a", 0, 1, "hello world");
    store.upsert(&chunk, &[1.0, 0.0, 0.0]).await.unwrap();

    let hash = store.lookup_hash(&chunk.chunk_id).await.unwrap();
    assert_eq!(hash.as_deref(), Some(chunk.content_hash.as_str()));

    assert_eq!(store.lookup_hash("no-such-chunk").await.unwrap(), None);
}

#[tokio::test]
async fn test_upsert_replaces_existing_record() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = store_in(&tmp);

    let first = make_chunk("https://docs.acme.dev/a", 0, 1, "old text");
    store.upsert(&first, &[1.0, 0.0, 0.0]).await.unwrap();

    let second = make_chunk("https://docs.acme.dev/a", 0, 1, "new text");
    store.upsert(&second, &[0.0, 1.0, 0.0]).await.unwrap();

    let hash = store.lookup_hash(&second.chunk_id).await.unwrap();
    assert_eq!(hash.as_deref(), Some(second.content_hash.as_str()));

    let chunks = store
        .chunks_for_document("https://docs.acme.dev/a", &SearchFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "new text");
}

#[tokio::test]
async fn test_query_orders_by_distance_and_applies_filters() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = store_in(&tmp);

    let close = make_chunk("https://docs.acme.dev/close", 0, 1, "close");
    let far = make_chunk("https://docs.acme.dev/far", 0, 1, "far");
    let mut other_version = make_chunk("https://docs.acme.dev/other", 0, 1, "other");
    other_version.version = "2.0".to_string();

    store.upsert(&close, &[1.0, 0.0, 0.0]).await.unwrap();
    store.upsert(&far, &[0.0, 1.0, 0.0]).await.unwrap();
    store.upsert(&other_version, &[1.0, 0.1, 0.0]).await.unwrap();

    let filters = SearchFilters {
        version: Some("1.2".to_string()),
        ..Default::default()
    };
    let results = store.query(&[1.0, 0.0, 0.0], &filters, 10).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.url, "https://docs.acme.dev/close");
    assert!(results[0].distance < results[1].distance);
    assert!(results.iter().all(|r| r.chunk.url != "https://docs.acme.dev/other"));
}

#[tokio::test]
async fn test_query_respects_top_k() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = store_in(&tmp);

    for i in 0..5 {
        let chunk = make_chunk(&format!("https://docs.acme.dev/{}", i), 0, 1, "text");
        store
            .upsert(&chunk, &[1.0, i as f32 * 0.1, 0.0])
            .await
            .unwrap();
    }

    let results = store
        .query(&[1.0, 0.0, 0.0], &SearchFilters::default(), 2)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_chunks_for_document_ordered_with_range() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = store_in(&tmp);

    let url = "https://docs.acme.dev/long";
    // Insert out of order; readback must be ordered by chunk_index.
    for index in [2i64, 0, 3, 1] {
        let chunk = make_chunk(url, index, 4, &format!("part {}", index));
        store.upsert(&chunk, &[1.0, 0.0]).await.unwrap();
    }

    let all = store
        .chunks_for_document(url, &SearchFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    let indices: Vec<i64> = all.iter().filter_map(|c| c.chunk_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);

    let middle = store
        .chunks_for_document(
            url,
            &SearchFilters::default(),
            Some(ChunkRange { start: 1, end: 2 }),
        )
        .await
        .unwrap();
    assert_eq!(middle.len(), 2);
    assert_eq!(middle[0].content, "part 1");
    assert_eq!(middle[1].content, "part 2");
}

#[tokio::test]
async fn test_remove_obsolete_deletes_only_unvisited_under_prefix() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = store_in(&tmp);

    let kept = make_chunk("https://docs.acme.dev/kept", 0, 1, "kept");
    let stale = make_chunk("https://docs.acme.dev/stale", 0, 1, "stale");
    let outside = make_chunk("https://other.acme.dev/page", 0, 1, "outside");

    store.upsert(&kept, &[1.0]).await.unwrap();
    store.upsert(&stale, &[1.0]).await.unwrap();
    store.upsert(&outside, &[1.0]).await.unwrap();

    let mut keep = HashSet::new();
    keep.insert(kept.chunk_id.clone());

    let deleted = store
        .remove_obsolete("https://docs.acme.dev/", &keep)
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    assert!(store.lookup_hash(&kept.chunk_id).await.unwrap().is_some());
    assert!(store.lookup_hash(&stale.chunk_id).await.unwrap().is_none());
    // Prefix scoping: a chunk outside the prefix is never touched.
    assert!(store.lookup_hash(&outside.chunk_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_checkpoint_roundtrip_and_overwrite() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = store_in(&tmp);

    assert_eq!(store.checkpoint("acme/widget").await.unwrap(), None);

    store
        .set_checkpoint("acme/widget", "2026-01-01T00:00:00Z")
        .await
        .unwrap();
    assert_eq!(
        store.checkpoint("acme/widget").await.unwrap().as_deref(),
        Some("2026-01-01T00:00:00Z")
    );

    store
        .set_checkpoint("acme/widget", "2026-02-01T00:00:00Z")
        .await
        .unwrap();
    assert_eq!(
        store.checkpoint("acme/widget").await.unwrap().as_deref(),
        Some("2026-02-01T00:00:00Z")
    );
}

/// A database created before the ordering columns existed must still answer
/// document reads: the range is ignored with a warning, never an error.
#[tokio::test]
async fn test_old_schema_without_ordering_columns() {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{ConnectOptions, Connection};

    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("widget.sqlite");

    // Pre-create the chunks table the way an old release laid it out.
    let mut conn = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    sqlx::query(
        r#"
        CREATE TABLE chunks (
            chunk_id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            title TEXT,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            section TEXT,
            heading_hierarchy TEXT,
            product_name TEXT,
            version TEXT,
            branch TEXT,
            repo TEXT,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(&mut conn)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO chunks (chunk_id, url, content, content_hash, embedding) \
         VALUES ('c1', 'https://docs.acme.dev/a', 'legacy body', 'h1', x'0000803f')",
    )
    .execute(&mut conn)
    .await
    .unwrap();
    conn.close().await.unwrap();

    let store = SqliteStore::new(tmp.path(), "widget").unwrap();

    let chunks = store
        .chunks_for_document(
            "https://docs.acme.dev/a",
            &SearchFilters::default(),
            Some(ChunkRange { start: 0, end: 0 }),
        )
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "legacy body");
    assert_eq!(chunks[0].chunk_index, None);

    // Vector queries also work against the old layout.
    let results = store
        .query(&[1.0], &SearchFilters::default(), 5)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.chunk_id, "c1");
}
