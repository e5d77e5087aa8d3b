//! Core backtesting engine.
//!
//! Runs the simulation loop, one trading day at a time:
//! 1. Mark open positions to market and sweep stop losses
//! 2. Settle expired options at intrinsic value
//! 3. Force-liquidate if the risk manager demands it, or
//! 4. Request a signal and dispatch to the strategy executors
//! 5. Record the daily snapshot and feed the ending value into the risk
//!    manager, which gates the next day's decisions

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::BacktestConfig;
use crate::data::{MarketData, OptionType};
use crate::metrics::SummaryMetrics;
use crate::pricing::OptionPricer;
use crate::risk::RiskManager;
use crate::signal::{Signal, SignalProvider};

use super::ledger::{Ledger, PortfolioSnapshot};
use super::position::{
    ExitReason, Instrument, Position, StrategyTag, TradeRecord, CONTRACT_MULTIPLIER,
};
use super::BacktestError;

/// Maximum component names traded per entry.
const MAX_COMPONENT_LEGS: usize = 50;

/// Target days to expiration for new straddles.
const TARGET_DTE_DAYS: i64 = 30;

/// Minimum days to expiration for new straddles.
const MIN_DTE_DAYS: i64 = 7;

fn to_f64(value: Decimal) -> f64 {
    value.try_into().unwrap_or(0.0)
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default()
}

/// Result of a completed backtest.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_value: Decimal,
    pub trades: Vec<TradeRecord>,
    pub snapshots: Vec<PortfolioSnapshot>,
    pub metrics: SummaryMetrics,
}

impl BacktestResult {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        format!(
            "Backtest Results ({} to {})\n\
             ----------------------------------------\n\
             Initial Value: ${}\n\
             Trades: {}\n\
             \n\
             {}",
            self.start_date,
            self.end_date,
            self.initial_value,
            self.trades.len(),
            self.metrics.summary(),
        )
    }
}

/// The main backtesting engine.
pub struct BacktestEngine {
    config: BacktestConfig,
    market: MarketData,
    components: Vec<String>,
    weights: HashMap<String, f64>,
    signal: Box<dyn SignalProvider>,
    pricer: OptionPricer,
    risk: RiskManager,
    ledger: Ledger,
    active_strategy: Option<StrategyTag>,
}

impl BacktestEngine {
    /// Create an engine over pre-loaded market data.
    pub fn new(
        config: BacktestConfig,
        market: MarketData,
        components: Vec<String>,
        weights: HashMap<String, f64>,
        signal: Box<dyn SignalProvider>,
    ) -> Self {
        let initial_cash = config.portfolio.initial_cash;
        let pricer = OptionPricer::from_config(&config.options);
        let risk = RiskManager::new(config.risk_management.clone(), initial_cash);
        Self {
            config,
            market,
            components,
            weights,
            signal,
            pricer,
            risk,
            ledger: Ledger::new(initial_cash),
            active_strategy: None,
        }
    }

    /// Run the backtest over the full trading calendar.
    pub fn run(&mut self) -> Result<BacktestResult, BacktestError> {
        let dates: Vec<NaiveDate> = self.market.trading_dates().to_vec();
        info!(
            start = %self.config.backtest.start_date,
            end = %self.config.backtest.end_date,
            trading_days = dates.len(),
            components = self.components.len(),
            "starting backtest"
        );

        for date in &dates {
            self.process_day(*date)?;
        }

        let metrics = SummaryMetrics::from_snapshots(self.ledger.snapshots());
        Ok(BacktestResult {
            start_date: self.config.backtest.start_date,
            end_date: self.config.backtest.end_date,
            initial_value: self.config.portfolio.initial_cash,
            trades: self.ledger.trades().to_vec(),
            snapshots: self.ledger.snapshots().to_vec(),
            metrics,
        })
    }

    /// Process a single trading day.
    fn process_day(&mut self, date: NaiveDate) -> Result<(), BacktestError> {
        // 1. Mark to market, then sweep stop losses
        self.ledger.revalue(&self.market, &self.pricer, date);
        for id in self.ledger.open_ids() {
            if self.risk.check_stop_loss(self.ledger.position(id)) {
                let price = {
                    let position = self.ledger.position(id);
                    self.exit_price(position, date)
                };
                self.ledger
                    .close_position(id, date, price, ExitReason::StopLoss);
            }
        }

        // 2. Settle expirations
        self.ledger.process_expirations(&self.market, date)?;

        // 3. Forced liquidation pre-empts all entry logic for the day
        if self.risk.should_force_liquidate() {
            warn!(%date, "force liquidating all open positions");
            self.close_positions(date, ExitReason::RiskLimit, None);
            self.active_strategy = None;
        } else if self.risk.can_enter_new_trades(date) {
            // 4. Ask the signal generator what to do
            let decision = self.signal.generate(date);
            debug!(
                %date,
                signal = decision.signal.as_str(),
                z_score = decision.metrics.z_score,
                value = decision.metrics.value,
                "signal generated"
            );

            // 5. Dispatch
            match decision.signal {
                Signal::EnterDispersion => self.enter_dispersion(date),
                Signal::EnterReverseDispersion => self.enter_reverse_dispersion(date),
                Signal::Exit => {
                    if let Some(strategy) = self.active_strategy.take() {
                        info!(%date, strategy = strategy.as_str(), "exit signal, closing strategy positions");
                        self.close_positions(date, ExitReason::Signal, Some(strategy));
                    }
                }
                Signal::Hold => {}
            }
        } else {
            debug!(%date, "risk constraints prevent new trades today");
        }

        // 6. End-of-day snapshot; the risk update gates the next day
        let value = self.ledger.total_value();
        self.risk.update(value, date);
        let index_ticker = self.market.index_ticker().to_string();
        self.ledger.record_snapshot(
            date,
            &index_ticker,
            self.risk.current_drawdown(),
            self.risk.state().is_recovery(),
        );
        Ok(())
    }

    /// Current market exit price for a position.
    fn exit_price(&self, position: &Position, date: NaiveDate) -> Decimal {
        match position.instrument {
            Instrument::Option {
                option_type,
                strike,
                expiration,
            } => {
                let quote = self.pricer.quote(
                    &self.market,
                    &position.ticker,
                    date,
                    expiration,
                    strike,
                    option_type,
                );
                to_decimal(quote.value())
            }
            Instrument::Stock => match self.market.close_on_or_before(&position.ticker, date) {
                Some(spot) => to_decimal(spot),
                None => {
                    // No spot at all: back the price out of the last mark
                    position.current_value / Decimal::from(position.quantity)
                }
            },
        }
    }

    /// Close open positions at market, optionally filtered by strategy.
    fn close_positions(
        &mut self,
        date: NaiveDate,
        reason: ExitReason,
        strategy: Option<StrategyTag>,
    ) {
        for id in self.ledger.open_ids() {
            let price = {
                let position = self.ledger.position(id);
                if let Some(strategy) = strategy {
                    if position.strategy != strategy {
                        continue;
                    }
                }
                self.exit_price(position, date)
            };
            self.ledger.close_position(id, date, price, reason);
        }
    }

    /// Nearest trading-calendar expiry at least `MIN_DTE_DAYS` out and
    /// closest to `TARGET_DTE_DAYS` from today.
    fn pick_expiration(&self, date: NaiveDate) -> Option<NaiveDate> {
        let candidates: Vec<NaiveDate> = self
            .market
            .dates_after(date)
            .iter()
            .copied()
            .filter(|d| (*d - date).num_days() >= MIN_DTE_DAYS)
            .collect();

        let target = date + Duration::days(TARGET_DTE_DAYS);
        candidates
            .iter()
            .copied()
            .find(|d| *d >= target)
            .or_else(|| candidates.last().copied())
    }

    /// Components with index weights, top `MAX_COMPONENT_LEGS` by weight,
    /// renormalized to sum to one.
    fn weighted_components(&self) -> Vec<(String, f64)> {
        let mut weighted: Vec<(String, f64)> = self
            .components
            .iter()
            .filter_map(|t| self.weights.get(t).map(|w| (t.clone(), *w)))
            .filter(|(_, w)| *w > 0.0)
            .collect();

        if weighted.is_empty() {
            // No weight data: equal-weight the head of the universe
            let selected: Vec<String> = self
                .components
                .iter()
                .take(MAX_COMPONENT_LEGS)
                .cloned()
                .collect();
            if selected.is_empty() {
                return Vec::new();
            }
            let weight = 1.0 / selected.len() as f64;
            return selected.into_iter().map(|t| (t, weight)).collect();
        }

        weighted.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        weighted.truncate(MAX_COMPONENT_LEGS);

        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        weighted.into_iter().map(|(t, w)| (t, w / total)).collect()
    }

    /// Enter a dispersion trade: short the index ATM straddle, buy
    /// component straddles out of the collected premium.
    fn enter_dispersion(&mut self, date: NaiveDate) {
        let Some(expiry) = self.pick_expiration(date) else {
            warn!(%date, "no valid expiration available, skipping entry");
            return;
        };
        let index_ticker = self.market.index_ticker().to_string();
        let Some(index_spot) = self.market.close_on_or_before(&index_ticker, date) else {
            warn!(%date, "no index spot price, skipping entry");
            return;
        };
        let strike = index_spot.round();
        let portfolio_value = self.ledger.total_value();
        info!(
            %date,
            %expiry,
            dte = (expiry - date).num_days(),
            strike,
            "entering dispersion trade"
        );

        // Short index straddle
        let mut short_exposure = Decimal::ZERO;
        let mut premium_collected = Decimal::ZERO;
        for option_type in [OptionType::Call, OptionType::Put] {
            let quote = self.pricer.quote(
                &self.market,
                &index_ticker,
                date,
                expiry,
                strike,
                option_type,
            );
            let contracts = self.risk.size_position(
                StrategyTag::Dispersion,
                &index_ticker,
                option_type,
                quote.value(),
                to_f64(portfolio_value),
            );
            if contracts <= 0 {
                continue;
            }

            let price = to_decimal(quote.value());
            let value = Decimal::from(-contracts) * price * Decimal::from(CONTRACT_MULTIPLIER);
            if !self.risk.check_portfolio_risk(value, portfolio_value) {
                info!(ticker = %index_ticker, option_type = option_type.as_str(), "skipping index leg: portfolio risk limit");
                continue;
            }

            let position = Position::open_option(
                &index_ticker,
                option_type,
                strike,
                expiry,
                -contracts,
                price,
                date,
                StrategyTag::Dispersion,
            );
            short_exposure += position.entry_value;
            premium_collected -= position.entry_value;
            self.ledger.open_position(position);
        }

        if premium_collected <= Decimal::ZERO {
            info!(%date, "no index premium collected, skipping component legs");
            return;
        }
        self.active_strategy = Some(StrategyTag::Dispersion);
        info!(premium = %premium_collected, "premium collected from index straddle");

        // Long component straddles out of the premium budget
        let budget = self.risk.component_budget(premium_collected, portfolio_value);
        let selected = self.weighted_components();
        info!(components = selected.len(), budget = %budget, "allocating component premium budget");

        let mut long_exposure = Decimal::ZERO;
        for (ticker, weight) in &selected {
            long_exposure += self.enter_component_straddle(
                date,
                expiry,
                ticker,
                *weight,
                budget,
                portfolio_value,
                StrategyTag::Dispersion,
                true,
            );
        }

        self.log_balance(long_exposure, short_exposure);
    }

    /// Enter a reverse dispersion trade: long the index ATM straddle,
    /// short component straddles against it.
    fn enter_reverse_dispersion(&mut self, date: NaiveDate) {
        let Some(expiry) = self.pick_expiration(date) else {
            warn!(%date, "no valid expiration available, skipping entry");
            return;
        };
        let index_ticker = self.market.index_ticker().to_string();
        let Some(index_spot) = self.market.close_on_or_before(&index_ticker, date) else {
            warn!(%date, "no index spot price, skipping entry");
            return;
        };
        let strike = index_spot.round();
        let portfolio_value = self.ledger.total_value();
        info!(
            %date,
            %expiry,
            dte = (expiry - date).num_days(),
            strike,
            "entering reverse dispersion trade"
        );

        // Long index straddle
        let mut long_exposure = Decimal::ZERO;
        for option_type in [OptionType::Call, OptionType::Put] {
            let quote = self.pricer.quote(
                &self.market,
                &index_ticker,
                date,
                expiry,
                strike,
                option_type,
            );
            let contracts = self.risk.size_position(
                StrategyTag::ReverseDispersion,
                &index_ticker,
                option_type,
                quote.value(),
                to_f64(portfolio_value),
            );
            if contracts <= 0 {
                continue;
            }

            let price = to_decimal(quote.value());
            let value = Decimal::from(contracts) * price * Decimal::from(CONTRACT_MULTIPLIER);
            if !self.risk.check_portfolio_risk(value, portfolio_value) {
                info!(ticker = %index_ticker, option_type = option_type.as_str(), "skipping index leg: portfolio risk limit");
                continue;
            }

            let position = Position::open_option(
                &index_ticker,
                option_type,
                strike,
                expiry,
                contracts,
                price,
                date,
                StrategyTag::ReverseDispersion,
            );
            long_exposure += position.entry_value;
            self.ledger.open_position(position);
        }

        if long_exposure <= Decimal::ZERO {
            info!(%date, "no index options purchased, skipping component legs");
            return;
        }
        self.active_strategy = Some(StrategyTag::ReverseDispersion);
        info!(cost = %long_exposure, "index straddle purchased");

        // The mirror trade collects component premium against the index
        // cost, so the budget divides by the balance factor
        let factor = to_decimal(self.risk.long_short_balance_factor());
        let budget = if factor > Decimal::ZERO {
            long_exposure / factor
        } else {
            long_exposure
        };
        let selected = self.weighted_components();
        info!(components = selected.len(), budget = %budget, "allocating component premium target");

        let mut short_exposure = Decimal::ZERO;
        for (ticker, weight) in &selected {
            short_exposure += self.enter_component_straddle(
                date,
                expiry,
                ticker,
                *weight,
                budget,
                portfolio_value,
                StrategyTag::ReverseDispersion,
                false,
            );
        }

        self.log_balance(long_exposure, short_exposure);
    }

    /// Open one component's ATM straddle toward its premium share.
    ///
    /// Returns the signed exposure actually opened. Failures on one
    /// component never abort the entry: the caller moves on to the next.
    #[allow(clippy::too_many_arguments)]
    fn enter_component_straddle(
        &mut self,
        date: NaiveDate,
        expiry: NaiveDate,
        ticker: &str,
        weight: f64,
        budget: Decimal,
        portfolio_value: Decimal,
        strategy: StrategyTag,
        long: bool,
    ) -> Decimal {
        let Some(spot) = self.market.close_on_or_before(ticker, date) else {
            warn!(ticker, %date, "no spot price, skipping component");
            return Decimal::ZERO;
        };
        let strike = spot.round();
        let target_premium = to_f64(budget) * weight;
        debug!(ticker, weight, target_premium, "component premium target");

        let mut exposure = Decimal::ZERO;
        for option_type in [OptionType::Call, OptionType::Put] {
            let quote = self
                .pricer
                .quote(&self.market, ticker, date, expiry, strike, option_type);
            let price = quote.value();
            if price <= 0.0 {
                continue;
            }

            // Contracts to hit this leg's half of the premium share
            let mut target_contracts = (target_premium / 2.0 / (price * 100.0)) as i64;
            if target_contracts == 0 && target_premium > 0.0 {
                target_contracts = 1;
            }
            let risk_contracts = self.risk.size_position(
                strategy,
                ticker,
                option_type,
                price,
                to_f64(portfolio_value) * weight,
            );
            let contracts = target_contracts.min(risk_contracts);
            if contracts <= 0 {
                continue;
            }

            let quantity = if long { contracts } else { -contracts };
            let price = to_decimal(price);
            let value = Decimal::from(quantity) * price * Decimal::from(CONTRACT_MULTIPLIER);
            if !self.risk.check_portfolio_risk(value, portfolio_value) {
                info!(ticker, option_type = option_type.as_str(), "skipping component leg: portfolio risk limit");
                continue;
            }

            let position = Position::open_option(
                ticker,
                option_type,
                strike,
                expiry,
                quantity,
                price,
                date,
                strategy,
            );
            exposure += position.entry_value;
            self.ledger.open_position(position);
        }
        exposure
    }

    /// Informational balance check after an entry; imbalance never blocks.
    fn log_balance(&self, long_exposure: Decimal, short_exposure: Decimal) {
        if self.risk.check_trade_balance(long_exposure, short_exposure) {
            info!(long = %long_exposure, short = %short_exposure, "trade exposure is balanced");
        } else {
            let short_abs = to_f64(short_exposure).abs();
            let ratio = if short_abs > 0.0 {
                to_f64(long_exposure) / short_abs
            } else {
                f64::INFINITY
            };
            warn!(
                long = %long_exposure,
                short = %short_exposure,
                ratio,
                "trade exposure is not balanced"
            );
        }
    }
}
