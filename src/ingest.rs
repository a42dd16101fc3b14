//! Ingestion pipeline.
//!
//! For each configured source: resume from the stored crawl checkpoint,
//! traverse the source, chunk every document, and write only the chunks
//! whose content hash changed. Chunks whose stored hash matches are skipped
//! without an embedding call; the rest are embedded in batches of
//! `embedding.batch_size` within each document. After a traversal that saw
//! no network errors, stored chunks under the source's cleanup prefix that
//! were not visited this run are deleted. The checkpoint advances only once
//! every document of the run has been fully processed.

use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::chunk::chunk_document;
use crate::config::{Config, SourceConfig};
use crate::connector::{connector_for, SourceConnector};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::models::DocumentChunk;
use crate::store::{open_store, VectorStore};

/// Per-source outcome of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents_fetched: usize,
    pub chunks_written: usize,
    pub chunks_unchanged: usize,
    pub chunks_failed: usize,
    pub chunks_deleted: u64,
    pub checkpoint_advanced: bool,
}

/// Ingest one source against an already-opened store and provider.
///
/// Embedding failures are per-batch: the batch's chunks are counted as
/// failed and the run continues. Storage write failures abort the source —
/// a store that cannot accept writes makes the rest of the run pointless.
pub async fn ingest_source(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    connector: &dyn SourceConnector,
    source: &SourceConfig,
    batch_size: usize,
    full: bool,
) -> Result<IngestReport> {
    let batch_size = batch_size.max(1);
    let mut report = IngestReport::default();

    let checkpoint_key = connector.checkpoint_key();
    let checkpoint = match (&checkpoint_key, full) {
        (Some(key), false) => store
            .checkpoint(key)
            .await
            .with_context(|| format!("failed to load checkpoint for '{}'", key))?,
        _ => None,
    };
    if full && checkpoint_key.is_some() {
        info!(source = %source.label(), "full re-index requested; ignoring checkpoint");
    }

    let traversal = connector
        .traverse(checkpoint.as_deref())
        .await
        .with_context(|| format!("traversal of '{}' failed", source.label()))?;

    report.documents_fetched = traversal.documents.len();
    info!(
        source = %source.label(),
        documents = traversal.documents.len(),
        model = provider.model_name(),
        resumed_from = checkpoint.as_deref().unwrap_or("(none)"),
        "traversal complete"
    );

    let mut visited: HashSet<String> = HashSet::new();
    let mut all_processed = true;

    for document in &traversal.documents {
        let chunks = chunk_document(
            &document.content,
            source,
            &document.url,
            document.title.as_deref(),
        );

        let mut pending: Vec<&DocumentChunk> = Vec::new();
        for chunk in &chunks {
            visited.insert(chunk.chunk_id.clone());

            let stored_hash = store.lookup_hash(&chunk.chunk_id).await?;
            if stored_hash.as_deref() == Some(chunk.content_hash.as_str()) {
                debug!(chunk_id = %chunk.chunk_id, url = %chunk.url, "unchanged; skipped");
                report.chunks_unchanged += 1;
            } else {
                pending.push(chunk);
            }
        }

        for batch in pending.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embeddings = match provider.embed_batch(&texts).await {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    warn!(
                        url = %document.url,
                        expected = batch.len(),
                        got = v.len(),
                        "embedding count mismatch; batch skipped"
                    );
                    report.chunks_failed += batch.len();
                    all_processed = false;
                    continue;
                }
                Err(e) => {
                    warn!(
                        url = %document.url,
                        chunks = batch.len(),
                        error = %e,
                        "embedding failed; batch skipped"
                    );
                    report.chunks_failed += batch.len();
                    all_processed = false;
                    continue;
                }
            };

            for (chunk, embedding) in batch.iter().zip(embeddings.iter()) {
                store
                    .upsert(chunk, embedding)
                    .await
                    .with_context(|| format!("failed to store chunk for {}", chunk.url))?;
                report.chunks_written += 1;
            }
        }
    }

    // Deletion is only safe when this run saw the complete live set: a
    // traversal with network errors may have silently missed documents.
    if traversal.network_error {
        warn!(
            source = %source.label(),
            "network errors during traversal; skipping cleanup"
        );
    } else if let Some(prefix) = source.cleanup_prefix() {
        let deleted = store
            .remove_obsolete(&prefix, &visited)
            .await
            .with_context(|| format!("cleanup under '{}' failed", prefix))?;
        report.chunks_deleted = deleted;
        if deleted > 0 {
            info!(source = %source.label(), deleted, "obsolete chunks removed");
        }
    }

    // Advancing the checkpoint past documents that failed embedding would
    // skip them forever on incremental runs.
    if let (Some(key), Some(cursor)) = (&checkpoint_key, &traversal.next_checkpoint) {
        if all_processed {
            store.set_checkpoint(key, cursor).await?;
            report.checkpoint_advanced = true;
            debug!(key = %key, cursor = %cursor, "checkpoint advanced");
        } else {
            warn!(
                source = %source.label(),
                "some chunks failed; checkpoint not advanced"
            );
        }
    }

    Ok(report)
}

/// Run ingestion for every configured source, or just the ones whose label
/// contains `source_filter`. A failing source is reported and skipped; the
/// remaining sources still run.
pub async fn run_ingest(config: &Config, source_filter: Option<&str>, full: bool) -> Result<()> {
    let selected: Vec<&SourceConfig> = config
        .sources
        .iter()
        .filter(|s| {
            source_filter
                .map(|f| s.label().contains(f) || s.product.contains(f))
                .unwrap_or(true)
        })
        .collect();

    if selected.is_empty() {
        anyhow::bail!(
            "no sources matched{}",
            source_filter
                .map(|f| format!(" filter '{}'", f))
                .unwrap_or_default()
        );
    }

    let mut failures = 0usize;

    for source in selected {
        let label = source.label();
        println!("Ingesting {} ({} {})...", label, source.product, source.version);

        let embedding = source.embedding.as_ref().unwrap_or(&config.embedding);
        let result: Result<IngestReport> = async {
            let provider = create_provider(embedding)?;
            let store = open_store(config, &source.product, &source.version, provider.dims())?;
            let connector = connector_for(source);
            ingest_source(
                store.as_ref(),
                provider.as_ref(),
                connector.as_ref(),
                source,
                embedding.batch_size,
                full,
            )
            .await
        }
        .await;

        match result {
            Ok(report) => {
                println!(
                    "  {} documents, {} chunks written, {} unchanged, {} failed, {} deleted{}",
                    report.documents_fetched,
                    report.chunks_written,
                    report.chunks_unchanged,
                    report.chunks_failed,
                    report.chunks_deleted,
                    if report.checkpoint_advanced {
                        ", checkpoint advanced"
                    } else {
                        ""
                    }
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("  Failed: {:#}", e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} source(s) failed", failures);
    }
    Ok(())
}
