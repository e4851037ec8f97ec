//! Zonefeed - CZDS zone file ingestion tool

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use zonefeed_common::logging::{init_logging, LogConfig, LogLevel};
use zonefeed_common::types::DownloadSummary;
use zonefeed_ingest::config::{CzdsConfig, IngestConfig, RetryConfig};
use zonefeed_ingest::czds::CzdsClient;
use zonefeed_ingest::orchestrator::{IngestOrchestrator, ParallelOrchestrator};
use zonefeed_ingest::storage::{MemoryStore, StoreFactory, LAST_SUMMARY_KEY};
use zonefeed_ingest::zone::ZoneParser;

#[derive(Parser, Debug)]
#[command(name = "zonefeed")]
#[command(author, version, about = "CZDS zone file ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Download and store every approved TLD
    Run {
        /// Process several TLDs at once
        #[arg(short, long)]
        parallel: bool,
    },

    /// List the TLDs the account is approved for
    Tlds,

    /// Download a single zone file without storing it
    Download {
        /// TLD to download, e.g. "com"
        tld: String,

        /// Output directory
        #[arg(short, long, default_value = "./data/zones")]
        output: PathBuf,
    },

    /// Count the records in a local zone file
    Parse {
        /// Path to a gzip-compressed zone file
        file: PathBuf,

        /// TLD the file belongs to
        #[arg(short, long)]
        tld: String,
    },

    /// Show the summary of the last completed run
    Status {
        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _log_guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run { parallel } => run(parallel).await?,
        Command::Tlds => {
            let client = client_from_env()?;
            client.authenticate().await?;
            for tld in client.get_approved_tlds().await? {
                println!("{tld}");
            }
        },
        Command::Download { tld, output } => {
            let client = client_from_env()?;
            tokio::fs::create_dir_all(&output)
                .await
                .with_context(|| format!("Failed to create {}", output.display()))?;
            let result = client.download_zone_file(&tld, &output).await;
            if let Some(message) = &result.error_message {
                anyhow::bail!("{message}");
            }
            println!("{} ({} bytes)", result.file_path, result.file_size);
        },
        Command::Parse { file, tld } => {
            let parser = ZoneParser::new(tld.clone(), Utc::now().date_naive());
            let records =
                tokio::task::spawn_blocking(move || parser.count_records(&file)).await??;
            println!("{tld}: {records} records");
        },
        Command::Status { database_url } => {
            let factory = open_store(database_url.as_deref()).await?;
            let store = factory.connect().await?;
            match store.get_setting(LAST_SUMMARY_KEY).await? {
                Some(value) => {
                    let summary: DownloadSummary = serde_json::from_str(&value)
                        .context("Stored run summary is not valid JSON")?;
                    print_summary(&summary)?;
                },
                None => println!("No completed run recorded"),
            }
        },
    }

    Ok(())
}

async fn run(parallel: bool) -> Result<()> {
    let config = IngestConfig::from_env()?;
    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.temp_dir.display()))?;

    let factory = open_store(config.database_url.as_deref()).await?;
    let client = Arc::new(CzdsClient::new(config.czds.clone(), config.retry)?);

    let summary = if parallel {
        let orchestrator = ParallelOrchestrator::new(client, factory, config);
        let run = orchestrator.run_full_download();
        tokio::pin!(run);
        tokio::select! {
            summary = &mut run => summary?,
            _ = tokio::signal::ctrl_c() => {
                orchestrator.stop();
                run.await?
            },
        }
    } else {
        let orchestrator = IngestOrchestrator::new(client, factory, config);
        let run = orchestrator.run_full_download();
        tokio::pin!(run);
        tokio::select! {
            summary = &mut run => summary?,
            _ = tokio::signal::ctrl_c() => {
                orchestrator.stop();
                run.await?
            },
        }
    };

    match summary {
        Some(summary) => print_summary(&summary)?,
        None => warn!("A download run is already in progress"),
    }
    Ok(())
}

fn client_from_env() -> Result<CzdsClient> {
    let czds = CzdsConfig::from_env();
    czds.validate()?;
    Ok(CzdsClient::new(czds, RetryConfig::from_env())?)
}

#[cfg(feature = "database")]
async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn StoreFactory>> {
    use zonefeed_ingest::storage::{PgStore, PgStoreFactory};

    let Some(url) = database_url else {
        info!("DATABASE_URL not set, using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    };
    let store = PgStore::connect(url, 16).await?;
    store.ensure_schema().await?;
    info!("Connected to PostgreSQL");
    Ok(Arc::new(PgStoreFactory::new(&store)))
}

#[cfg(not(feature = "database"))]
async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn StoreFactory>> {
    if database_url.is_some() {
        warn!("Built without the `database` feature, ignoring DATABASE_URL");
    }
    info!("Using in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}

fn print_summary(summary: &DownloadSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
