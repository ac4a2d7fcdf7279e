use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nutrilog::commands::{
    ConfigCommand, DiaryCommand, FoodCommand, LogCommand, StatsCommand, SyncCommand,
};
use nutrilog::config::Config;
use nutrilog::db::init_db;
use nutrilog::diary::DiaryStore;
use nutrilog::index::FoodIndex;

#[derive(Parser)]
#[command(name = "nutrilog")]
#[command(version)]
#[command(about = "A local-first food logging CLI", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a food by barcode, photo labels, or text search
    Log(LogCommand),

    /// Manage the nutrition database
    Food(FoodCommand),

    /// Show and edit diary entries
    Diary(DiaryCommand),

    /// Daily nutrient totals against your goal
    Stats(StatsCommand),

    /// Sync the diary with a remote server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutrilog=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Log(cmd)) => {
            let pool = init_db(config.database_path.clone()).await?;
            let mut index = FoodIndex::open(pool.clone()).await?;
            let (store, report) = DiaryStore::open(pool).await?;
            if report.needs_resync() {
                eprintln!(
                    "Warning: {} corrupt diary row(s) skipped; run `nutrilog sync now` to recover",
                    report.corrupt
                );
            }
            cmd.run(&mut index, &store).await?;
        }
        Some(Commands::Food(cmd)) => {
            let pool = init_db(config.database_path.clone()).await?;
            let mut index = FoodIndex::open(pool).await?;
            cmd.run(&mut index).await?;
        }
        Some(Commands::Diary(cmd)) => {
            let pool = init_db(config.database_path.clone()).await?;
            let index = FoodIndex::open(pool.clone()).await?;
            let (store, _) = DiaryStore::open(pool).await?;
            cmd.run(&store, &index).await?;
        }
        Some(Commands::Stats(cmd)) => {
            let pool = init_db(config.database_path.clone()).await?;
            let index = FoodIndex::open(pool.clone()).await?;
            let (store, _) = DiaryStore::open(pool).await?;
            cmd.run(&store, &index, &config).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let pool = init_db(config.database_path.clone()).await?;
            let (store, report) = DiaryStore::open(pool.clone()).await?;
            cmd.run(&store, &pool, &config, &report).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
