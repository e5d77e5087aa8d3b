//! History-driven option pricer.
//!
//! Volatility is estimated from the trailing window of daily returns, so a
//! price request needs nothing beyond the loaded close series and the
//! contract terms.

use chrono::NaiveDate;
use tracing::warn;

use crate::config::{OptionsConfig, PricingModel};
use crate::data::{MarketData, OptionType, PriceSeries};

use super::models::{binomial_tree, black_scholes};
use super::{PriceQuote, PricingError};

/// Trailing observations required to estimate volatility.
pub const VOLATILITY_LOOKBACK: usize = 30;

/// Substitute price when a model price is unavailable or unusable.
const FALLBACK_PRICE: f64 = 0.01;

/// Trading days per year for annualization.
const TRADING_DAYS: f64 = 252.0;

/// Annualized volatility from the trailing window of daily returns.
///
/// Sample standard deviation (n-1) over the most recent
/// `VOLATILITY_LOOKBACK` returns, scaled by the square root of the trading
/// year.
pub fn historical_volatility(
    series: &PriceSeries,
    ticker: &str,
    as_of: NaiveDate,
) -> Result<f64, PricingError> {
    let bars = series.bars_through(as_of);
    if bars.len() < VOLATILITY_LOOKBACK {
        return Err(PricingError::InsufficientHistory {
            ticker: ticker.to_string(),
            date: as_of,
            have: bars.len(),
            need: VOLATILITY_LOOKBACK,
        });
    }

    // One extra close yields exactly `lookback` returns when available
    let window_start = bars.len().saturating_sub(VOLATILITY_LOOKBACK + 1);
    let window = &bars[window_start..];
    let returns: Vec<f64> = window
        .windows(2)
        .map(|pair| pair[1].adjusted_close / pair[0].adjusted_close - 1.0)
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

    Ok(variance.sqrt() * TRADING_DAYS.sqrt())
}

/// Prices options off the loaded market history.
#[derive(Debug, Clone)]
pub struct OptionPricer {
    model: PricingModel,
    risk_free_rate: f64,
    binomial_steps: usize,
}

impl OptionPricer {
    pub fn new(model: PricingModel, risk_free_rate: f64, binomial_steps: usize) -> Self {
        Self {
            model,
            risk_free_rate,
            binomial_steps,
        }
    }

    pub fn from_config(options: &OptionsConfig) -> Self {
        Self::new(
            options.pricing_model,
            options.risk_free_rate,
            options.binomial_steps,
        )
    }

    pub fn model(&self) -> PricingModel {
        self.model
    }

    /// Price one option contract as of `as_of`.
    pub fn price(
        &self,
        market: &MarketData,
        ticker: &str,
        as_of: NaiveDate,
        expiry: NaiveDate,
        strike: f64,
        option_type: OptionType,
    ) -> Result<f64, PricingError> {
        if expiry <= as_of {
            return Err(PricingError::InvalidExpiry { as_of, expiry });
        }

        let series = market
            .series(ticker)
            .ok_or_else(|| PricingError::DataNotFound(ticker.to_string()))?;

        let sigma = historical_volatility(series, ticker, as_of)?;
        let spot = series
            .close_on_or_before(as_of)
            .ok_or_else(|| PricingError::DataNotFound(ticker.to_string()))?;

        let t = (expiry - as_of).num_days() as f64 / 365.0;
        let price = match self.model {
            PricingModel::BlackScholes => {
                black_scholes(spot, strike, t, self.risk_free_rate, sigma, option_type)
            }
            PricingModel::Binomial => binomial_tree(
                spot,
                strike,
                t,
                self.risk_free_rate,
                sigma,
                self.binomial_steps,
                option_type,
            ),
        };

        Ok(price)
    }

    /// Price with the degraded-fallback policy applied.
    ///
    /// Any pricing failure, or a non-finite/non-positive model price, is
    /// replaced by a small positive constant carried in an explicit
    /// `Fallback` variant and logged.
    pub fn quote(
        &self,
        market: &MarketData,
        ticker: &str,
        as_of: NaiveDate,
        expiry: NaiveDate,
        strike: f64,
        option_type: OptionType,
    ) -> PriceQuote {
        match self.price(market, ticker, as_of, expiry, strike, option_type) {
            Ok(price) if price.is_finite() && price > 0.0 => PriceQuote::Model(price),
            Ok(price) => {
                let reason = format!("model returned unusable price {price}");
                warn!(ticker, %as_of, strike, option_type = option_type.as_str(), reason = %reason, "using fallback option price");
                PriceQuote::Fallback {
                    price: FALLBACK_PRICE,
                    reason,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(ticker, %as_of, strike, option_type = option_type.as_str(), reason = %reason, "using fallback option price");
                PriceQuote::Fallback {
                    price: FALLBACK_PRICE,
                    reason,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceBar;
    use approx::assert_relative_eq;
    use chrono::Duration;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Closes alternating +1% / -1% daily moves, `n` bars from 2020-01-01.
    fn alternating_series(n: usize) -> PriceSeries {
        let start = date(2020, 1, 1);
        let mut close = 100.0;
        let mut bars = Vec::with_capacity(n);
        for i in 0..n {
            bars.push(PriceBar {
                date: start + Duration::days(i as i64),
                adjusted_close: close,
            });
            close *= if i % 2 == 0 { 1.01 } else { 0.99 };
        }
        PriceSeries::new(bars)
    }

    fn market_with(ticker: &str, series: PriceSeries) -> MarketData {
        let first = series.bars()[0].date;
        let last = series.bars()[series.len() - 1].date;
        let mut map = HashMap::new();
        map.insert(ticker.to_string(), series);
        MarketData::new(ticker, map, first, last).unwrap()
    }

    #[test]
    fn test_historical_volatility_alternating_returns() {
        let series = alternating_series(31);
        let as_of = series.bars()[30].date;
        let vol = historical_volatility(&series, "TST", as_of).unwrap();

        // 30 returns of +/-1% with mean 0: sample std = 0.01 * sqrt(30/29)
        let expected = 0.01 * (30.0_f64 / 29.0).sqrt() * 252.0_f64.sqrt();
        assert_relative_eq!(vol, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_insufficient_history() {
        let series = alternating_series(10);
        let as_of = series.bars()[9].date;
        let err = historical_volatility(&series, "TST", as_of).unwrap_err();
        assert!(matches!(
            err,
            PricingError::InsufficientHistory { have: 10, need: 30, .. }
        ));
    }

    #[test]
    fn test_invalid_expiry_rejected() {
        let series = alternating_series(40);
        let as_of = series.bars()[39].date;
        let market = market_with("TST", series);
        let pricer = OptionPricer::new(PricingModel::BlackScholes, 0.02, 100);

        let err = pricer
            .price(&market, "TST", as_of, as_of, 100.0, OptionType::Call)
            .unwrap_err();
        assert!(matches!(err, PricingError::InvalidExpiry { .. }));
    }

    #[test]
    fn test_unknown_ticker_is_data_not_found() {
        let series = alternating_series(40);
        let as_of = series.bars()[39].date;
        let market = market_with("TST", series);
        let pricer = OptionPricer::new(PricingModel::BlackScholes, 0.02, 100);

        let err = pricer
            .price(
                &market,
                "MISSING",
                as_of,
                as_of + Duration::days(30),
                100.0,
                OptionType::Call,
            )
            .unwrap_err();
        assert!(matches!(err, PricingError::DataNotFound(_)));
    }

    #[test]
    fn test_models_agree_for_atm_call() {
        let series = alternating_series(60);
        let as_of = series.bars()[59].date;
        let expiry = as_of + Duration::days(30);
        let market = market_with("TST", series);

        let bs = OptionPricer::new(PricingModel::BlackScholes, 0.02, 100)
            .price(&market, "TST", as_of, expiry, 100.0, OptionType::Call)
            .unwrap();
        let tree = OptionPricer::new(PricingModel::Binomial, 0.02, 500)
            .price(&market, "TST", as_of, expiry, 100.0, OptionType::Call)
            .unwrap();

        assert!(bs > 0.0);
        assert!((tree - bs).abs() / bs < 0.01);
    }

    #[test]
    fn test_quote_falls_back_on_error() {
        let series = alternating_series(10); // too short for volatility
        let as_of = series.bars()[9].date;
        let market = market_with("TST", series);
        let pricer = OptionPricer::new(PricingModel::BlackScholes, 0.02, 100);

        let quote = pricer.quote(
            &market,
            "TST",
            as_of,
            as_of + Duration::days(30),
            100.0,
            OptionType::Put,
        );
        assert!(quote.is_fallback());
        assert_eq!(quote.value(), 0.01);
    }
}
