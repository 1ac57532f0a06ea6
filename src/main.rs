mod crawl;
mod db;
mod error;
mod extract;
mod fetch;
mod interchange;
mod loader;
mod normalize;
mod record;
mod reports;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use settings::Settings;

#[derive(Parser)]
#[command(name = "ml_scraper", about = "MercadoLibre listing scraper, loader and SQL reports")]
struct Cli {
    /// Configuration file (default: ./ml_scraper.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape → CSV → database → reports
    Run {
        /// Reuse the existing CSV instead of scraping
        #[arg(long)]
        skip_scrape: bool,
    },
    /// Scrape every configured category into the CSV
    Scrape,
    /// Load the CSV into the database
    Load,
    /// Print the analysis reports (database must already hold data)
    Analyze,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    let result = match cli.command {
        Commands::Run { skip_scrape } => {
            if !skip_scrape {
                scrape(&settings).await?;
            }
            let conn = open_store(&settings)?;
            load(&conn, &settings)?;
            analyze(&conn)
        }
        Commands::Scrape => scrape(&settings).await,
        Commands::Load => {
            let conn = open_store(&settings)?;
            load(&conn, &settings)
        }
        Commands::Analyze => {
            let conn = open_store(&settings)?;
            analyze(&conn)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn scrape(settings: &Settings) -> anyhow::Result<()> {
    let fetcher = Arc::new(fetch::HttpFetcher::new(&settings.http)?);
    let targets = settings.targets();
    let names: Vec<&str> = targets.iter().map(|t| t.category.as_str()).collect();
    println!("Scraping {} categories: {}", targets.len(), names.join(", "));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current page");
            on_ctrl_c.cancel();
        }
    });

    let (records, outcomes) = crawl::harvest(fetcher, targets, settings.pacing(), cancel).await;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(t) => println!(
                "  {:<14} {:>2} pages  {:>4} records  ({:?})",
                t.category, t.pages_fetched, t.records, t.stop
            ),
            Err(e) => {
                failed += 1;
                println!("  {:<14} FAILED: {}", outcome.category, e);
            }
        }
    }

    if records.is_empty() {
        warn!("no records scraped, CSV left untouched");
        if failed == outcomes.len() {
            bail!("every category failed");
        }
        return Ok(());
    }

    let written = interchange::write_records(&settings.csv_path, &records)?;
    println!("Wrote {} records to {}", written, settings.csv_path.display());
    Ok(())
}

fn open_store(settings: &Settings) -> anyhow::Result<rusqlite::Connection> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn).context("Failed to create schema")?;
    info!(path = %settings.db_path.display(), "database ready");
    Ok(conn)
}

fn load(conn: &rusqlite::Connection, settings: &Settings) -> anyhow::Result<()> {
    let report = loader::load_csv(conn, &settings.csv_path, settings.load.dedup_key)?;
    println!(
        "Loaded {}: {} rows read, {} inserted, {} already present, {} skipped",
        settings.csv_path.display(),
        report.batch_size,
        report.inserted,
        report.duplicates,
        report.skipped,
    );
    Ok(())
}

fn analyze(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let total = db::count_products(conn)?;
    if total == 0 {
        println!("No products stored. Run 'load' first.");
        return Ok(());
    }
    for (title, table) in reports::run_all(conn)? {
        println!("\n{}", "=".repeat(60));
        println!("  {}", title);
        println!("{}", "=".repeat(60));
        println!("{}", reports::render(&table));
    }
    println!("\nAll {} reports run over {} products.", reports::REPORTS.len(), total);
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
