//! Semantic search over the stored index.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::models::SearchFilters;
use crate::store::open_store;

pub struct SearchArgs {
    pub query: String,
    pub product: String,
    pub version: String,
    pub branch: Option<String>,
    pub repo: Option<String>,
    pub limit: usize,
}

/// Embed the query and print the nearest stored chunks.
pub async fn run_search(config: &Config, args: &SearchArgs) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let store = open_store(config, &args.product, &args.version, provider.dims())?;

    let vector = provider
        .embed(&args.query)
        .await
        .context("failed to embed query")?;

    let filters = SearchFilters {
        product_name: Some(args.product.clone()),
        version: Some(args.version.clone()),
        branch: args.branch.clone(),
        repo: args.repo.clone(),
    };

    let results = store.query(&vector, &filters, args.limit).await?;

    if results.is_empty() {
        println!("No results for '{}'", args.query);
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        let chunk = &hit.chunk;
        println!(
            "{}. [{:.4}] {}",
            i + 1,
            hit.distance,
            chunk.title.as_deref().unwrap_or(&chunk.url)
        );
        println!("   {}", chunk.url);
        if !chunk.heading_hierarchy.is_empty() {
            println!("   {}", chunk.heading_hierarchy.join(" > "));
        }
        if let (Some(index), Some(total)) = (chunk.chunk_index, chunk.total_chunks) {
            println!("   chunk {}/{}", index + 1, total);
        }
        println!();
        for line in chunk.content.lines().take(6) {
            println!("   {}", line);
        }
        if chunk.content.lines().count() > 6 {
            println!("   ...");
        }
        println!();
    }

    Ok(())
}
