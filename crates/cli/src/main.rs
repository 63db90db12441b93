use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rotator_core::portfolio::PortfolioState;
use rotator_core::traits::{Interval, PriceFeed};
use rotator_core::{AppConfig, ConfigLoader};
use rotator_data::{CandleFeed, FileReporter, StatePersistence};
use rotator_rebalancer::RebalancingLoop;
use rotator_strategy::AllocationManager;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "rotator")]
#[command(about = "Momentum/volatility rotation bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rebalancing loop until interrupted
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Fetch and rank the universe once, then print the candidates
    Rank {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Print the persisted portfolio state
    Status {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run { config } => run_loop(&config).await?,
        Commands::Rank { config } => rank_once(&config).await?,
        Commands::Status { config } => show_status(&config)?,
    }

    Ok(())
}

async fn run_loop(config_path: &str) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let persistence = StatePersistence::new(PathBuf::from(&config.persistence.state_path));

    // Resume from the last snapshot; a missing snapshot means the
    // first cycle performs the initial allocation.
    let state = persistence
        .load()
        .context("Failed to load persisted state")?
        .unwrap_or_else(PortfolioState::new);
    if !state.is_unallocated() {
        info!(positions = state.positions.len(), "Resuming persisted portfolio");
    }

    let feed = CandleFeed::new(config.feed.api_url.clone());
    let reporter = FileReporter::new(PathBuf::from(&config.report.dir));
    let manager = AllocationManager::new(config.strategy.clone(), state);
    let mut looped = RebalancingLoop::new(config, feed, reporter, persistence, manager)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    looped.run(shutdown_rx).await
}

async fn rank_once(config_path: &str) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let interval = Interval::parse(&config.feed.interval)
        .with_context(|| format!("Unknown feed interval: {}", config.feed.interval))?;

    let feed = CandleFeed::new(config.feed.api_url.clone());
    let data = feed
        .fetch(&config.universe, config.feed.lookback, interval)
        .await?;

    let universe_data: Vec<(String, Vec<f64>)> = config
        .universe
        .iter()
        .filter_map(|s| data.get(s).map(|series| (s.clone(), series.clone())))
        .collect();
    let ranked = rotator_signals::rank(
        &universe_data,
        config.strategy.momentum_window,
        config.strategy.top_n_volatility,
    );

    println!("Ranked candidates ({}):", ranked.len());
    for (i, symbol) in ranked.iter().enumerate() {
        println!("{:>3}. {symbol}", i + 1);
    }
    Ok(())
}

fn show_status(config_path: &str) -> Result<()> {
    let config: AppConfig = ConfigLoader::load(config_path)?;
    let persistence = StatePersistence::new(PathBuf::from(&config.persistence.state_path));

    match persistence.load()? {
        None => println!("No prior state."),
        Some(state) => {
            println!("Positions:");
            for (symbol, position) in &state.positions {
                println!(
                    "  {symbol:<10} allocation: ${:.2}   entry: {:.4}",
                    position.allocation, position.entry_price
                );
            }
            println!("All-time high: ${:.2}", state.all_time_high);
            if state.all_time_low.is_finite() {
                println!("All-time low:  ${:.2}", state.all_time_low);
            }
        }
    }
    Ok(())
}
