//! Backtest engine: positions, ledger, and the day-loop orchestrator.

mod engine;
mod ledger;
mod position;

use chrono::NaiveDate;
use thiserror::Error;

pub use engine::{BacktestEngine, BacktestResult};
pub use ledger::{Ledger, PortfolioSnapshot};
pub use position::{
    ExitReason, Instrument, Position, PositionId, PositionStatus, StrategyTag, TradeRecord,
    TradeType, CONTRACT_MULTIPLIER,
};

use crate::data::LoaderError;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("No price for {ticker} on or before {date}")]
    MissingPrice { ticker: String, date: NaiveDate },

    #[error(transparent)]
    Loader(#[from] LoaderError),
}
