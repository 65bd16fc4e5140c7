use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bronze_ingest::api::{AlphaVantageClient, ApiRateLimiter};
use bronze_ingest::ingestion_worker::IngestionWorker;
use bronze_ingest::models::{Config, PlannerEvent, WorkerEvent};
use bronze_ingest::planner::{handle_planner_event, DEFAULT_BATCH_SIZE};
use bronze_ingest::storage::{BronzeStore, SourceReader};

/// Intraday market data ingestion into the bronze layer
#[derive(Parser)]
#[command(name = "bronze-ingest")]
#[command(version)]
#[command(about = "Plan and run Alpha Vantage intraday ingestion into the bronze layer")]
#[command(long_about = "
Plans month ranges and symbol batches, then fetches one month of 1-minute bars per
(symbol, month) and stores the raw JSON under a deterministic object key.

Configuration comes from the environment (or a .env file): ALPHA_API_KEY,
S3_BRONZE_BUCKET or BRONZE_LOCAL_DIR, S3_BRONZE_PREFIX, RATE_LIMIT_PER_MINUTE.

Examples:
  bronze-ingest plan --symbols-uri s3://bucket/universe.csv --batch-size 50
  bronze-ingest ingest --event batch_0.json
  bronze-ingest ingest --symbols-uri universe.csv --start 2020-01 --end 2020-02 --limit 3
  bronze-ingest earliest-month IBM
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the ingest range and split the universe into batches
    Plan(PlanArgs),
    /// Fetch and store every (symbol, month) of one batch
    Ingest(IngestArgs),
    /// Look up tickers by keywords
    Search {
        keywords: String,
        /// Store the raw response in the bronze layer
        #[arg(long)]
        save: bool,
    },
    /// Earliest month with data for a symbol
    EarliestMonth { symbol: String },
    /// Monthly adjusted series for a symbol
    MonthlyAdjusted {
        symbol: String,
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct PlanArgs {
    /// Planner trigger as a JSON file; other flags are ignored when set
    #[arg(long)]
    event: Option<PathBuf>,

    /// Universe table location (s3://bucket/key or local path)
    #[arg(long)]
    symbols_uri: Option<String>,

    #[arg(
        long,
        short = 'b',
        default_value_t = DEFAULT_BATCH_SIZE as i64,
        allow_negative_numbers = true
    )]
    batch_size: i64,

    /// First month (YYYY-MM); needs --end
    #[arg(long, short = 's')]
    start: Option<String>,

    /// Last month (YYYY-MM); needs --start
    #[arg(long, short = 'e')]
    end: Option<String>,

    /// Trigger time (ISO-8601), defaults to now
    #[arg(long)]
    time: Option<String>,
}

#[derive(Args)]
struct IngestArgs {
    /// Worker event or batch descriptor as a JSON file; other flags are ignored when set
    #[arg(long)]
    event: Option<PathBuf>,

    #[arg(long)]
    symbols_uri: Option<String>,

    #[arg(long, short = 's')]
    start: Option<String>,

    #[arg(long, short = 'e')]
    end: Option<String>,

    /// Restrict to these symbols (comma separated)
    #[arg(long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Only the first N rows of the universe
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `LOG_LEVEL` (default `info`).
fn init_logging() {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Plan(args) => {
            let event = match &args.event {
                Some(path) => read_event(path)?,
                None => PlannerEvent {
                    symbols_uri: args.symbols_uri.context("--symbols-uri or --event is required")?,
                    batch_size: Some(args.batch_size),
                    year_month_start: args.start,
                    year_month_end: args.end,
                    time: args.time,
                },
            };

            let output = handle_planner_event(&event, &SourceReader::new()).await?;
            print_json(&output)
        }
        Command::Ingest(args) => {
            let event = match &args.event {
                Some(path) => read_event(path)?,
                None => WorkerEvent {
                    symbols_uri: args.symbols_uri.context("--symbols-uri or --event is required")?,
                    year_month_start: args.start.context("--start is required")?,
                    year_month_end: args.end.context("--end is required")?,
                    symbols_subset: args.symbols,
                    limit: args.limit,
                },
            };

            let config = Config::from_env()?;
            let client = gateway(&config)?;
            let worker = IngestionWorker::new(
                client,
                SourceReader::new(),
                ApiRateLimiter::new(config.rate_limit_per_minute),
            );

            let output = worker.run(&event).await?;
            print_json(&output)
        }
        Command::Search { keywords, save } => {
            let client = gateway(&Config::from_env()?)?;
            let data = client.search_symbol(&keywords, save).await?;
            print_json(&data)
        }
        Command::EarliestMonth { symbol } => {
            let client = gateway(&Config::from_env()?)?;
            let month = client.symbol_earliest_month(&symbol).await?;
            info!("📅 Earliest month for {}: {}", symbol, month);
            println!("{month}");
            Ok(())
        }
        Command::MonthlyAdjusted { symbol, save } => {
            let client = gateway(&Config::from_env()?)?;
            let data = client.fetch_monthly_adjusted(&symbol, save).await?;
            print_json(&data)
        }
    }
}

fn gateway(config: &Config) -> Result<AlphaVantageClient> {
    let store = BronzeStore::from_config(config)?;
    let client = AlphaVantageClient::from_config(config)
        .context("failed to build HTTP client")?
        .with_bronze_store(store);
    Ok(client)
}

fn read_event<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read event file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid event JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
