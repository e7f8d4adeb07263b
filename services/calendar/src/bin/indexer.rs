//! Operator tool for the date→media index.
//!
//! Runs outside the live request path: `build` does a full rebuild from the
//! processed prefix, `prune` drops index entries whose objects were deleted.
//! Both accept `--dry-run` to compute and report without persisting.

use anyhow::{Context, Result};
use calendar_service::bucket::MediaBucket;
use calendar_service::capture_date::{CaptureDateCache, CaptureDateExtractor};
use calendar_service::config::Config;
use calendar_service::index::IndexBuilder;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "indexer", about = "Build or prune the date-media index")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rebuild the index from every object under the processed prefix
    Build {
        /// Compute the index without uploading it
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove index entries whose backing objects no longer exist
    Prune {
        /// Report removals without uploading the pruned index
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.clone())),
        )
        .init();

    let bucket = Arc::new(
        MediaBucket::new(&config.s3)
            .await
            .context("Failed to initialize media bucket client")?,
    );
    let cache = Arc::new(CaptureDateCache::new());
    let extractor = Arc::new(CaptureDateExtractor::new(
        bucket.clone(),
        cache,
        config.media.clone(),
    ));
    let builder = IndexBuilder::new(
        bucket,
        extractor,
        &config.s3.processed_prefix,
        config.media.extraction_batch_size,
    );

    match cli.command {
        Command::Build { dry_run } => {
            let (index, summary) = builder.build(dry_run).await?;
            info!(
                scanned = summary.scanned,
                indexed = summary.indexed,
                undated = summary.undated,
                dates = summary.dates,
                dry_run = summary.dry_run,
                "Index build finished"
            );
            if dry_run {
                println!("{}", serde_json::to_string_pretty(&index)?);
            }
        }
        Command::Prune { dry_run } => {
            let (_, summary) = builder.prune(dry_run).await?;
            info!(
                removed_urls = summary.removed_urls,
                removed_dates = summary.removed_dates,
                uploaded = summary.uploaded,
                dry_run = summary.dry_run,
                "Index prune finished"
            );
        }
    }

    Ok(())
}
