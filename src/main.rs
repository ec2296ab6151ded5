use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, Context};
use log::{info, error};
use clap::Parser;

use booking_ingest::booking::{BookingExtractor, BookingProcessor};
use booking_ingest::config::Config;
use booking_ingest::database::Database;
use booking_ingest::id_generator::SnowflakeGenerator;
use booking_ingest::imap_client::ImapConnector;
use booking_ingest::ingest::{IngestLoop, IngestWorker, LoopSettings};

#[derive(Parser)]
#[command(name = "booking-ingest")]
#[command(about = "Watches a mailbox over IMAP IDLE and stores OTA booking notifications")]
#[command(version = "0.1.0")]
struct Args {
    /// Dry-run mode: extract bookings without saving them to the database
    #[arg(short, long)]
    dry_run: bool,

    /// Check the configuration without connecting
    #[arg(long)]
    check_config: bool,

    /// Extract the booking from one .eml or .html file and exit
    #[arg(short, long, value_name = "FILE")]
    extract: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load the .env file if present
    dotenv::dotenv().ok();

    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Some(path) = &args.extract {
        return extract_file(path);
    }

    if args.dry_run {
        info!("🧪 Starting booking ingestion in DRY-RUN mode");
    } else {
        info!("🚀 Starting booking ingestion");
    }

    let config = Config::new(args.dry_run)?;

    if args.check_config {
        print_config(&config, args.dry_run);
        return Ok(());
    }

    let ids = Arc::new(
        SnowflakeGenerator::new(config.ingest.id_node).context("Invalid ID_NODE")?,
    );

    let database = if args.dry_run {
        None
    } else {
        let database = Database::new(&config.database)
            .await
            .context("Unable to initialise the database")?;
        Some(Arc::new(database))
    };

    let processor = match &database {
        Some(database) => BookingProcessor::new(ids, database.clone())?,
        None => BookingProcessor::new_dry_run(ids)?,
    };

    let ingest = IngestLoop::new(
        ImapConnector::new(config.imap.clone()),
        processor,
        LoopSettings::from_config(&config.ingest),
        config.ingest.backoff(),
    );

    let worker = IngestWorker::start(ingest);
    info!("✅ Watching '{}' on {}. Press Ctrl+C to stop", config.imap.mailbox, config.imap.server);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Unable to listen for Ctrl+C: {}", e);
    }

    worker.stop().await;

    if let Some(database) = database {
        database.close().await?;
    }

    info!("👋 Booking ingestion stopped");
    Ok(())
}

fn extract_file(path: &Path) -> Result<()> {
    let raw = std::fs::read(path)
        .with_context(|| format!("Unable to read {}", path.display()))?;

    let extractor = BookingExtractor::new()?;
    let booking = extractor
        .extract(&raw)
        .with_context(|| format!("No booking extracted from {}", path.display()))?;

    println!("{}", serde_json::to_string_pretty(&booking)?);
    Ok(())
}

fn print_config(config: &Config, dry_run: bool) {
    println!("✅ Configuration valid!");
    println!("📧 IMAP: {}@{}:{} (mailbox '{}')",
             config.imap.username, config.imap.server, config.imap.port, config.imap.mailbox);
    println!("🔎 Subject filter: '{}'", config.ingest.booking_subject);
    println!("⏱️  IDLE lifetime: {:?}, health check every {:?}",
             config.ingest.idle_lifetime(), config.ingest.health_check_interval());
    println!("⌛ Command timeout: {:?}", config.ingest.command_timeout());
    println!("🔁 Backoff: {:?} base, {:?} max",
             config.ingest.backoff().delay(0), config.ingest.backoff().max_delay());
    if !dry_run {
        println!("🗄️  Database: {}@{}:{}/{}",
                 config.database.username, config.database.host,
                 config.database.port, config.database.database);
    }
}
