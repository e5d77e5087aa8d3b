//! Core market data types.
//!
//! A backtest runs over per-ticker daily series of adjusted closes. The
//! `MarketData` store owns every loaded series and derives the trading
//! calendar from the index series, so all "price on or before" lookups
//! share one source of truth.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }

    /// Immediate-exercise payoff.
    pub fn intrinsic(&self, spot: f64, strike: f64) -> f64 {
        match self {
            Self::Call => (spot - strike).max(0.0),
            Self::Put => (strike - spot).max(0.0),
        }
    }
}

/// One daily observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub adjusted_close: f64,
}

/// A ticker's daily close series, sorted ascending by date.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    /// Build a series from (possibly unsorted) bars.
    pub fn new(mut bars: Vec<PriceBar>) -> Self {
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.bars.iter().map(|b| b.date)
    }

    /// All bars dated on or before `date`.
    pub fn bars_through(&self, date: NaiveDate) -> &[PriceBar] {
        let end = self.bars.partition_point(|b| b.date <= date);
        &self.bars[..end]
    }

    /// Most recent close on or before `date`.
    pub fn close_on_or_before(&self, date: NaiveDate) -> Option<f64> {
        self.bars_through(date).last().map(|b| b.adjusted_close)
    }

    /// Fraction of `calendar` dates this series has an observation for.
    pub fn coverage(&self, calendar: &[NaiveDate]) -> f64 {
        if calendar.is_empty() {
            return 0.0;
        }
        let have: std::collections::HashSet<NaiveDate> = self.dates().collect();
        let hits = calendar.iter().filter(|d| have.contains(*d)).count();
        hits as f64 / calendar.len() as f64
    }
}

/// All loaded price series plus the trading calendar.
///
/// The calendar is the index ticker's observation dates restricted to the
/// backtest window; component series may have gaps, which on-or-before
/// lookups tolerate.
#[derive(Debug, Clone)]
pub struct MarketData {
    index_ticker: String,
    series: HashMap<String, PriceSeries>,
    trading_dates: Vec<NaiveDate>,
}

impl MarketData {
    /// Assemble a store from pre-loaded series. The index ticker must be
    /// present; its dates inside the window become the trading calendar.
    pub fn new(
        index_ticker: &str,
        series: HashMap<String, PriceSeries>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<Self> {
        let index = series.get(index_ticker)?;
        let trading_dates: Vec<NaiveDate> = index
            .dates()
            .filter(|d| *d >= start && *d <= end)
            .collect();
        Some(Self {
            index_ticker: index_ticker.to_string(),
            series,
            trading_dates,
        })
    }

    pub fn index_ticker(&self) -> &str {
        &self.index_ticker
    }

    pub fn trading_dates(&self) -> &[NaiveDate] {
        &self.trading_dates
    }

    pub fn has_series(&self, ticker: &str) -> bool {
        self.series.contains_key(ticker)
    }

    pub fn series(&self, ticker: &str) -> Option<&PriceSeries> {
        self.series.get(ticker)
    }

    /// Most recent close for `ticker` on or before `date`.
    pub fn close_on_or_before(&self, ticker: &str, date: NaiveDate) -> Option<f64> {
        self.series.get(ticker)?.close_on_or_before(date)
    }

    /// Trading dates strictly after `date`.
    pub fn dates_after(&self, date: NaiveDate) -> &[NaiveDate] {
        let start = self.trading_dates.partition_point(|d| *d <= date);
        &self.trading_dates[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(y: i32, m: u32, d: u32, close: f64) -> PriceBar {
        PriceBar {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            adjusted_close: close,
        }
    }

    #[test]
    fn test_intrinsic_value() {
        assert_eq!(OptionType::Call.intrinsic(110.0, 100.0), 10.0);
        assert_eq!(OptionType::Call.intrinsic(90.0, 100.0), 0.0);
        assert_eq!(OptionType::Put.intrinsic(90.0, 100.0), 10.0);
        assert_eq!(OptionType::Put.intrinsic(110.0, 100.0), 0.0);
    }

    #[test]
    fn test_series_sorted_and_deduped() {
        let series = PriceSeries::new(vec![
            bar(2020, 1, 3, 102.0),
            bar(2020, 1, 2, 101.0),
            bar(2020, 1, 3, 102.0),
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[0].adjusted_close, 101.0);
    }

    #[test]
    fn test_close_on_or_before() {
        let series = PriceSeries::new(vec![
            bar(2020, 1, 2, 101.0),
            bar(2020, 1, 3, 102.0),
            bar(2020, 1, 6, 103.0),
        ]);

        // Exact date
        let d = NaiveDate::from_ymd_opt(2020, 1, 3).unwrap();
        assert_eq!(series.close_on_or_before(d), Some(102.0));

        // Weekend falls back to Friday
        let d = NaiveDate::from_ymd_opt(2020, 1, 5).unwrap();
        assert_eq!(series.close_on_or_before(d), Some(102.0));

        // Before the series starts
        let d = NaiveDate::from_ymd_opt(2019, 12, 31).unwrap();
        assert_eq!(series.close_on_or_before(d), None);
    }

    #[test]
    fn test_market_data_calendar() {
        let mut series = HashMap::new();
        series.insert(
            "SPY".to_string(),
            PriceSeries::new(vec![
                bar(2020, 1, 2, 320.0),
                bar(2020, 1, 3, 322.0),
                bar(2020, 1, 6, 321.0),
                bar(2020, 1, 7, 325.0),
            ]),
        );

        let market = MarketData::new(
            "SPY",
            series,
            NaiveDate::from_ymd_opt(2020, 1, 3).unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 6).unwrap(),
        )
        .unwrap();

        assert_eq!(market.trading_dates().len(), 2);
        let after = market.dates_after(NaiveDate::from_ymd_opt(2020, 1, 3).unwrap());
        assert_eq!(after, &[NaiveDate::from_ymd_opt(2020, 1, 6).unwrap()]);
    }
}
