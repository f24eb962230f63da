mod config;
mod cursor;
mod download;
mod error;
mod extract;
mod loader;
mod models;
mod pipeline;
mod portal;
mod storage;
mod transform;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::loader::export_csv;
use crate::models::Period;
use crate::pipeline::Pipeline;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "vtea-etl", about = "Monthly VTEA energy valuation ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Download and load the period after the latest one loaded
    Run,

    /// Download and load every period in an inclusive range
    Backfill {
        /// First period, YYYY-MM (default: pipeline.backfill_from)
        #[arg(long)]
        from: Option<Period>,
        /// Last period, YYYY-MM (default: pipeline.backfill_to)
        #[arg(long)]
        to: Option<Period>,
    },

    /// Load an already downloaded workbook
    Ingest {
        file: PathBuf,
        #[arg(short, long)]
        period: Period,
    },

    /// Extract a workbook to CSV without touching the database
    Export {
        file: PathBuf,
        #[arg(short, long)]
        period: Period,
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Populate the period dimension for an inclusive range
    SeedPeriods {
        #[arg(long)]
        from: Period,
        #[arg(long)]
        to: Period,
    },

    /// Set the period the first incremental run starts from
    SetStart { period: Period },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "vtea_etl=info,warn",
        1 => "vtea_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let _t = utils::Timer::start("Incremental run");
            let (period, rows) = Pipeline::new(config)?.run_next().await?;
            info!("Done: {} loaded with {} rows", period, rows);
        }

        Command::Backfill { from, to } => {
            let from = from.or(config.pipeline.backfill_from);
            let to = to.or(config.pipeline.backfill_to);
            let (Some(from), Some(to)) = (from, to) else {
                anyhow::bail!("backfill needs --from/--to or pipeline.backfill_from/backfill_to");
            };
            let _t = utils::Timer::start(format!("Backfill {} → {}", from, to));
            let stats = Pipeline::new(config)?.run_backfill(from, to).await?;
            if !stats.failed.is_empty() {
                let failed: Vec<String> = stats.failed.iter().map(Period::to_string).collect();
                warn!("Failed periods: {}", failed.join(", "));
            }
        }

        Command::Ingest { file, period } => {
            let _t = utils::Timer::start(format!("Ingest {:?}", file));
            let rows = Pipeline::new(config)?.ingest_file(&file, &period)?;
            info!("Done: {} rows loaded for {}", rows, period);
        }

        Command::Export { file, period, out } => {
            let table = extract::extract_from_file(&file, &config.pipeline.sheet_name)?;
            let rows = transform::normalize_now(&table, &period);
            let n = export_csv(&rows, &out)?;
            info!("Wrote {} rows to {:?}", n, out);
        }

        Command::SeedPeriods { from, to } => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let n = repo.seed_period_dimension(from, to)?;
            println!("{} periods added ({} → {}).", n, from, to);
        }

        Command::SetStart { period } => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            repo.seed_period_dimension(period, period)?;
            repo.set_general(&config.storage.initial_period_variable, &period.to_string())?;
            println!(
                "{} = {}",
                config.storage.initial_period_variable, period
            );
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let rows = repo.staging_count()?;
            let (min, max) = repo.period_range().unwrap_or((None, None));
            let last = repo.last_run().unwrap_or(None);
            println!("─────────────────────────────────");
            println!("  VTEA ETL Database Stats");
            println!("─────────────────────────────────");
            println!("  Rows     : {}", rows);
            println!("  From     : {}", utils::or_dash(min));
            println!("  To       : {}", utils::or_dash(max));
            println!(
                "  Last run : {}",
                utils::or_dash(last.map(|(p, status)| format!("{} ({})", p, status)))
            );
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
