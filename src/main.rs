use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docdex::config::load_config;
use docdex::get::{run_get, GetArgs};
use docdex::ingest::run_ingest;
use docdex::search::{run_search, SearchArgs};
use docdex::sources::run_sources;

#[derive(Parser)]
#[command(name = "docdex")]
#[command(about = "Incremental vector indexing and semantic search over documentation sources")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "./docdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest configured sources into the vector store
    Ingest {
        /// Only ingest sources whose label or product matches this filter
        source: Option<String>,

        /// Ignore stored checkpoints and re-enumerate everything
        #[arg(long)]
        full: bool,
    },

    /// Search the index for chunks semantically close to a query
    Search {
        /// Natural-language query
        query: String,

        /// Product to search
        #[arg(long)]
        product: String,

        /// Product version to search
        #[arg(long)]
        version: String,

        /// Restrict results to one branch
        #[arg(long)]
        branch: Option<String>,

        /// Restrict results to one repository
        #[arg(long)]
        repo: Option<String>,

        /// Maximum number of results
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Print the stored chunks of one document
    Get {
        /// Document url as stored in the index
        url: String,

        /// Product the document belongs to
        #[arg(long)]
        product: String,

        /// Product version
        #[arg(long)]
        version: String,

        /// First chunk index to print (inclusive)
        #[arg(long)]
        start: Option<i64>,

        /// Last chunk index to print (inclusive)
        #[arg(long)]
        end: Option<i64>,
    },

    /// List configured sources and their checkpoint state
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docdex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { source, full } => {
            run_ingest(&config, source.as_deref(), full).await?;
        }
        Commands::Search {
            query,
            product,
            version,
            branch,
            repo,
            limit,
        } => {
            run_search(
                &config,
                &SearchArgs {
                    query,
                    product,
                    version,
                    branch,
                    repo,
                    limit,
                },
            )
            .await?;
        }
        Commands::Get {
            url,
            product,
            version,
            start,
            end,
        } => {
            run_get(
                &config,
                &GetArgs {
                    url,
                    product,
                    version,
                    start,
                    end,
                },
            )
            .await?;
        }
        Commands::Sources => {
            run_sources(&config).await?;
        }
    }

    Ok(())
}
