//! Market Sweep CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use market_sweep::application::dedup_registry::dedup_registry;
use market_sweep::domain::partition::NewPartition;
use market_sweep::domain::result_item::{ResultQuery, ResultSort};
use market_sweep::domain::search_job::JobId;
use market_sweep::infrastructure::logging::init_logging_with_config;
use market_sweep::infrastructure::{DatabaseConnection, MarketplaceScraper, SqliteGateway};
use market_sweep::{AppConfig, SearchService};

/// Market Sweep - one search across every marketplace partition
#[derive(Parser)]
#[command(name = "market-sweep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to config/default.toml when present)
    #[arg(long, env = "MARKET_SWEEP_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import partition reference data from a JSON array
    ImportPartitions { file: PathBuf },

    /// Submit a search and wait for it to finish
    Search {
        query: String,
        #[arg(long)]
        requester: Option<String>,
    },

    /// Show progress and failed partitions of a job
    Status { job_id: JobId },

    /// Show a page of a job's results
    Results {
        job_id: JobId,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
        /// price_asc | created_at_desc
        #[arg(long, default_value = "created_at_desc")]
        sort: ResultSort,
        /// Only listings still on sale
        #[arg(long)]
        available: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    init_logging_with_config(&config.logging)?;

    let db = DatabaseConnection::new(&config.database).await?;
    db.migrate().await?;
    let gateway = Arc::new(SqliteGateway::new(db.pool().clone()));

    match cli.command {
        Commands::ImportPartitions { file } => import_partitions(&gateway, &file).await?,
        Commands::Search { query, requester } => {
            run_search(&config, gateway, &query, requester).await?;
        }
        Commands::Status { job_id } => {
            let service = build_service(&config, gateway, CancellationToken::new())?;
            print_json(&service.status(job_id).await?)?;
        }
        Commands::Results { job_id, page, page_size, sort, available } => {
            let service = build_service(&config, gateway, CancellationToken::new())?;
            let options = ResultQuery {
                page,
                page_size,
                sort,
                only_available: available,
                ..ResultQuery::default()
            };
            print_json(&service.results(job_id, &options).await?)?;
        }
    }

    Ok(())
}

fn build_service(
    config: &AppConfig,
    gateway: Arc<SqliteGateway>,
    shutdown: CancellationToken,
) -> Result<SearchService> {
    let scraper = Arc::new(MarketplaceScraper::new(config.scraper.clone())?);
    Ok(SearchService::new(
        gateway,
        scraper.clone(),
        scraper,
        dedup_registry(),
        config,
        shutdown,
    ))
}

async fn import_partitions(gateway: &SqliteGateway, file: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let rows: Vec<NewPartition> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid partition file {}", file.display()))?;
    let inserted = gateway.seed_partitions(&rows).await?;
    info!("📥 Imported {} of {} partitions", inserted, rows.len());
    Ok(())
}

async fn run_search(
    config: &AppConfig,
    gateway: Arc<SqliteGateway>,
    query: &str,
    requester: Option<String>,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing in-flight partitions");
            signal_token.cancel();
        }
    });

    let service = build_service(config, gateway, shutdown)?;
    let handle = service.submit(query, requester).await?;
    info!(
        job_id = %handle.job_id,
        "First response: {} items{}",
        handle.items.len(),
        if handle.reused { " (existing job)" } else { "" }
    );
    print_json(&handle.items)?;

    if let Some(completion) = handle.completion {
        let outcome = completion.await.context("Background crawl task failed")?;
        info!(job_id = %handle.job_id, "Search finished: {}", outcome);
    }

    print_json(&service.status(handle.job_id).await?)?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
