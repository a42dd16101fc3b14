//! Full-document retrieval by url.

use anyhow::Result;

use crate::config::Config;
use crate::models::{ChunkRange, SearchFilters};
use crate::store::open_store;

pub struct GetArgs {
    pub url: String,
    pub product: String,
    pub version: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// Print every stored chunk of one document in order, optionally limited to
/// an inclusive chunk-index range.
pub async fn run_get(config: &Config, args: &GetArgs) -> Result<()> {
    // The embedding provider is not needed to read chunks back; dims only
    // matter when a Qdrant collection has to be created, which a read
    // never does.
    let store = open_store(config, &args.product, &args.version, 1)?;

    let filters = SearchFilters {
        product_name: Some(args.product.clone()),
        version: Some(args.version.clone()),
        ..Default::default()
    };

    let range = match (args.start, args.end) {
        (None, None) => None,
        (start, end) => Some(ChunkRange {
            start: start.unwrap_or(0),
            end: end.unwrap_or(i64::MAX),
        }),
    };

    let chunks = store.chunks_for_document(&args.url, &filters, range).await?;

    if chunks.is_empty() {
        println!("No chunks stored for {}", args.url);
        return Ok(());
    }

    if let Some(title) = chunks.iter().find_map(|c| c.title.as_deref()) {
        println!("# {}", title);
        println!();
    }
    println!("{} ({} chunks)", args.url, chunks.len());
    println!();

    for chunk in &chunks {
        if let Some(index) = chunk.chunk_index {
            let total = chunk
                .total_chunks
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("--- chunk {}/{} ---", index + 1, total);
        }
        println!("{}", chunk.content);
        println!();
    }

    Ok(())
}
