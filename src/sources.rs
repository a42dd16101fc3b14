//! Source listing.

use anyhow::Result;

use crate::config::Config;
use crate::connector::connector_for;
use crate::store::open_store;

/// Print every configured source with its checkpoint state.
pub async fn run_sources(config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("Configured sources ({}):", config.sources.len());
    println!();

    for source in &config.sources {
        println!("  {} ({} {})", source.label(), source.product, source.version);

        match source.cleanup_prefix() {
            Some(prefix) => println!("    cleanup prefix: {}", prefix),
            None => println!("    cleanup: disabled (incremental source)"),
        }

        let connector = connector_for(source);
        if let Some(key) = connector.checkpoint_key() {
            let dims = source
                .embedding
                .as_ref()
                .unwrap_or(&config.embedding)
                .dims
                .unwrap_or(1);
            let store = open_store(config, &source.product, &source.version, dims)?;
            match store.checkpoint(&key).await {
                Ok(Some(cursor)) => println!("    checkpoint: {}", cursor),
                Ok(None) => println!("    checkpoint: (none; next run is full)"),
                Err(e) => println!("    checkpoint: unavailable ({})", e),
            }
        }
        println!();
    }

    Ok(())
}
