//! # Run a backtest
//! dispersion-backtest run --config config.json
//!
//! # Override the data directory
//! dispersion-backtest run --config config.json --data data/processed

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dispersion_backtest::backtest::{BacktestEngine, Instrument, PortfolioSnapshot, TradeRecord};
use dispersion_backtest::config::BacktestConfig;
use dispersion_backtest::data::{load_index_weights, select_components, DataLoader};
use dispersion_backtest::signal::DispersionIndexSignal;

#[derive(Parser)]
#[command(name = "dispersion-backtest")]
#[command(about = "Options dispersion strategy backtesting engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest with the given configuration
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Override the data directory from the config
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, data } => run(config, data),
    }
}

fn run(config_path: PathBuf, data_override: Option<PathBuf>) -> Result<()> {
    let mut config = BacktestConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    if let Some(data) = data_override {
        config.paths.data_dir = data.display().to_string();
    }

    let weights = load_index_weights(Path::new(&config.universe.constituents_file))
        .context("loading index constituent weights")?;
    let components = select_components(&config.universe, &weights);

    let loader = DataLoader::new(config.paths.data_dir.as_str());
    let (market, components) = loader
        .load_market(&config, &components)
        .context("loading price history")?;

    let signal = DispersionIndexSignal::from_csv(
        Path::new(&config.dispersion.index_file),
        &config.dispersion,
    )
    .context("loading dispersion index history")?;

    let results_dir = PathBuf::from(&config.paths.results_dir);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("creating {}", results_dir.display()))?;

    let mut engine = BacktestEngine::new(config, market, components, weights, Box::new(signal));
    let result = engine.run().context("backtest aborted")?;

    println!("{}", result.summary());

    write_portfolio_history(&results_dir.join("portfolio_history.csv"), &result.snapshots)?;
    write_trade_history(&results_dir.join("trade_history.csv"), &result.trades)?;
    println!("\nResults saved to {}", results_dir.display());

    Ok(())
}

fn write_portfolio_history(path: &Path, snapshots: &[PortfolioSnapshot]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for snapshot in snapshots {
        writer.serialize(snapshot)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_trade_history(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "date",
        "ticker",
        "trade_type",
        "instrument",
        "option_type",
        "strike",
        "expiration",
        "quantity",
        "price",
        "value",
        "strategy",
        "exit_reason",
    ])?;

    for trade in trades {
        let (option_type, strike, expiration) = match trade.instrument {
            Instrument::Option {
                option_type,
                strike,
                expiration,
            } => (
                option_type.as_str().to_string(),
                strike.to_string(),
                expiration.to_string(),
            ),
            Instrument::Stock => (String::new(), String::new(), String::new()),
        };

        writer.write_record([
            trade.date.to_string(),
            trade.ticker.clone(),
            trade.trade_type.as_str().to_string(),
            trade.instrument.kind_str().to_string(),
            option_type,
            strike,
            expiration,
            trade.quantity.to_string(),
            trade.price.to_string(),
            trade.value.to_string(),
            trade.strategy.as_str().to_string(),
            trade
                .exit_reason
                .map(|r| r.as_str().to_string())
                .unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
