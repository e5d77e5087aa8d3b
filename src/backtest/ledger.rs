//! Position and portfolio ledger.
//!
//! Owns the position arena, cash balance, trade history, and daily
//! snapshots. Cash moves only through `open_position` / `close_position` /
//! expiration settlement, so `cash + sum(open position values)` always
//! equals the portfolio value.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::MarketData;
use crate::pricing::OptionPricer;

use super::position::{
    ExitReason, Instrument, Position, PositionId, PositionStatus, TradeRecord, TradeType,
};
use super::BacktestError;

/// One end-of-day portfolio record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub date: NaiveDate,
    pub value: Decimal,
    pub cash: Decimal,
    pub drawdown: f64,
    pub long_exposure: Decimal,
    pub short_exposure: Decimal,
    pub net_exposure: Decimal,
    pub net_exposure_pct: f64,
    pub index_exposure: Decimal,
    pub components_exposure: Decimal,
    pub recovery_mode: bool,
}

/// The portfolio ledger.
pub struct Ledger {
    cash: Decimal,
    positions: Vec<Position>,
    trades: Vec<TradeRecord>,
    snapshots: Vec<PortfolioSnapshot>,
}

fn to_decimal(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        Decimal::try_from(value).ok()
    } else {
        None
    }
}

impl Ledger {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash,
            positions: Vec::new(),
            trades: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self, id: PositionId) -> &Position {
        &self.positions[id.0]
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn snapshots(&self) -> &[PortfolioSnapshot] {
        &self.snapshots
    }

    pub fn open_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    /// Handles of all open positions.
    pub fn open_ids(&self) -> Vec<PositionId> {
        self.positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_open())
            .map(|(i, _)| PositionId(i))
            .collect()
    }

    /// Portfolio value: cash plus open position values.
    pub fn total_value(&self) -> Decimal {
        let positions: Decimal = self
            .positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.current_value)
            .sum();
        self.cash + positions
    }

    /// Add a position to the arena, adjusting cash by its entry notional.
    pub fn open_position(&mut self, position: Position) -> PositionId {
        self.cash -= position.entry_value;
        self.trades.push(TradeRecord {
            date: position.entry_date,
            ticker: position.ticker.clone(),
            trade_type: TradeType::Open,
            instrument: position.instrument,
            quantity: position.quantity,
            price: position.entry_price,
            value: position.entry_value,
            strategy: position.strategy,
            exit_reason: None,
        });
        self.positions.push(position);
        PositionId(self.positions.len() - 1)
    }

    /// Close a position at `price`, crediting the liquidation proceeds.
    pub fn close_position(
        &mut self,
        id: PositionId,
        date: NaiveDate,
        price: Decimal,
        reason: ExitReason,
    ) {
        let position = &mut self.positions[id.0];
        if position.status != PositionStatus::Open {
            return;
        }

        let exit_value = Decimal::from(position.quantity) * price * position.instrument.multiplier();
        self.cash += exit_value;
        position.close(date, price, exit_value, reason);

        let record = TradeRecord {
            date,
            ticker: position.ticker.clone(),
            trade_type: TradeType::Close,
            instrument: position.instrument,
            quantity: position.quantity,
            price,
            value: exit_value,
            strategy: position.strategy,
            exit_reason: Some(reason),
        };
        self.trades.push(record);
    }

    /// Mark every open position to market.
    ///
    /// Stock marks at spot; options at the model price. A transient pricing
    /// failure retains the position's last known value rather than aborting
    /// the day.
    pub fn revalue(&mut self, market: &MarketData, pricer: &OptionPricer, date: NaiveDate) {
        for position in self.positions.iter_mut().filter(|p| p.is_open()) {
            match position.instrument {
                Instrument::Stock => {
                    let Some(spot) = market.close_on_or_before(&position.ticker, date) else {
                        warn!(ticker = %position.ticker, %date, "no spot price, retaining last value");
                        continue;
                    };
                    if let Some(spot) = to_decimal(spot) {
                        position.current_value = Decimal::from(position.quantity) * spot;
                    }
                }
                Instrument::Option {
                    option_type,
                    strike,
                    expiration,
                } => {
                    match pricer.price(market, &position.ticker, date, expiration, strike, option_type)
                    {
                        Ok(price) => {
                            if let Some(price) = to_decimal(price) {
                                position.current_value = Decimal::from(position.quantity)
                                    * price
                                    * position.instrument.multiplier();
                            }
                        }
                        Err(e) => {
                            warn!(
                                ticker = %position.ticker,
                                %date,
                                error = %e,
                                "pricing failed, retaining last position value"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Settle every open option at or past expiration at intrinsic value.
    pub fn process_expirations(
        &mut self,
        market: &MarketData,
        date: NaiveDate,
    ) -> Result<(), BacktestError> {
        let expired: Vec<PositionId> = self
            .positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_open() && p.is_expired(date))
            .map(|(i, _)| PositionId(i))
            .collect();

        for id in expired {
            let (ticker, option_type, strike) = {
                let position = &self.positions[id.0];
                match position.instrument {
                    Instrument::Option {
                        option_type,
                        strike,
                        ..
                    } => (position.ticker.clone(), option_type, strike),
                    Instrument::Stock => continue,
                }
            };

            let spot = market.close_on_or_before(&ticker, date).ok_or_else(|| {
                BacktestError::MissingPrice {
                    ticker: ticker.clone(),
                    date,
                }
            })?;

            let intrinsic = option_type.intrinsic(spot, strike);
            let price = to_decimal(intrinsic).unwrap_or(Decimal::ZERO);
            self.close_position(id, date, price, ExitReason::Expired);
        }

        Ok(())
    }

    /// Record the end-of-day snapshot and return its value.
    pub fn record_snapshot(
        &mut self,
        date: NaiveDate,
        index_ticker: &str,
        drawdown: f64,
        recovery_mode: bool,
    ) -> Decimal {
        let mut long_exposure = Decimal::ZERO;
        let mut short_exposure = Decimal::ZERO;
        let mut index_exposure = Decimal::ZERO;
        let mut components_exposure = Decimal::ZERO;

        for position in self.positions.iter().filter(|p| p.is_open()) {
            if position.quantity > 0 {
                long_exposure += position.current_value;
            } else {
                short_exposure += position.current_value;
            }
            if position.ticker == index_ticker {
                index_exposure += position.current_value;
            } else {
                components_exposure += position.current_value;
            }
        }

        let value = self.total_value();
        let net_exposure = long_exposure + short_exposure;
        let net_exposure_pct = if value.is_zero() {
            0.0
        } else {
            (net_exposure / value).try_into().unwrap_or(0.0)
        };

        self.snapshots.push(PortfolioSnapshot {
            date,
            value,
            cash: self.cash,
            drawdown,
            long_exposure,
            short_exposure,
            net_exposure,
            net_exposure_pct,
            index_exposure,
            components_exposure,
            recovery_mode,
        });

        value
    }
}
