//! CSV loaders for price history and index constituents.
//!
//! Price files live under the data directory as `<TICKER>.csv` with a
//! `date` column and an adjusted close column (`Adjusted` or
//! `adjusted_close`). Rows with unparseable values are skipped, matching
//! how upstream exporters emit `NA` for halted sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{BacktestConfig, UniverseConfig};

use super::types::{MarketData, PriceBar, PriceSeries};

/// Minimum fraction of index trading days a component series must cover.
const COVERAGE_FLOOR: f64 = 0.9;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("No usable price rows in {0}")]
    EmptySeries(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    date: NaiveDate,
    #[serde(rename = "Adjusted", alias = "adjusted_close")]
    adjusted_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ConstituentRow {
    #[serde(rename = "Symbol", alias = "symbol")]
    symbol: String,
    #[serde(rename = "Weight", alias = "weight")]
    weight: Option<String>,
}

/// CSV price data loader.
pub struct DataLoader {
    data_dir: PathBuf,
}

impl DataLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn series_path(&self, ticker: &str) -> PathBuf {
        self.data_dir.join(format!("{ticker}.csv"))
    }

    /// Load one ticker's close series.
    pub fn load_series(&self, ticker: &str) -> Result<PriceSeries, LoaderError> {
        let path = self.series_path(ticker);
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let mut bars = Vec::new();
        let mut skipped = 0usize;

        for row in reader.deserialize::<PriceRow>() {
            match row {
                Ok(PriceRow {
                    date,
                    adjusted_close: Some(close),
                }) if close.is_finite() && close > 0.0 => {
                    bars.push(PriceBar {
                        date,
                        adjusted_close: close,
                    });
                }
                Ok(_) => skipped += 1,
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            debug!(ticker, skipped, "skipped unusable price rows");
        }
        if bars.is_empty() {
            return Err(LoaderError::EmptySeries(ticker.to_string()));
        }

        Ok(PriceSeries::new(bars))
    }

    /// Load the index and component series and assemble the market store.
    ///
    /// A missing index series is fatal. Components with missing files or
    /// insufficient calendar coverage are dropped with a warning; the
    /// returned list holds the survivors.
    pub fn load_market(
        &self,
        config: &BacktestConfig,
        components: &[String],
    ) -> Result<(MarketData, Vec<String>), LoaderError> {
        let index_ticker = &config.universe.index;
        let index_series = self.load_series(index_ticker)?;

        let calendar: Vec<NaiveDate> = index_series
            .dates()
            .filter(|d| *d >= config.backtest.start_date && *d <= config.backtest.end_date)
            .collect();
        if calendar.is_empty() {
            return Err(LoaderError::InvalidData(format!(
                "index {index_ticker} has no observations between {} and {}",
                config.backtest.start_date, config.backtest.end_date
            )));
        }

        let mut series = HashMap::new();
        let mut valid = Vec::new();
        for ticker in components {
            let loaded = match self.load_series(ticker) {
                Ok(s) => s,
                Err(e) => {
                    warn!(ticker, error = %e, "excluding component from universe");
                    continue;
                }
            };
            if loaded.coverage(&calendar) < COVERAGE_FLOOR {
                warn!(ticker, "insufficient data coverage, excluding from universe");
                continue;
            }
            series.insert(ticker.clone(), loaded);
            valid.push(ticker.clone());
        }

        series.insert(index_ticker.clone(), index_series);
        let market = MarketData::new(
            index_ticker,
            series,
            config.backtest.start_date,
            config.backtest.end_date,
        )
        .ok_or_else(|| LoaderError::EmptySeries(index_ticker.clone()))?;

        Ok((market, valid))
    }
}

/// Load constituent weights, normalized to sum to 1.0.
///
/// Weights are accepted as decimals or percent strings ("6.71%"); a file
/// without a weight column yields equal weights.
pub fn load_index_weights(path: &Path) -> Result<HashMap<String, f64>, LoaderError> {
    if !path.exists() {
        return Err(LoaderError::FileNotFound(path.display().to_string()));
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut raw: Vec<(String, f64)> = Vec::new();
    for row in reader.deserialize::<ConstituentRow>() {
        let row = row?;
        let weight = row
            .weight
            .as_deref()
            .map(parse_weight)
            .unwrap_or(Some(0.0))
            .unwrap_or_else(|| {
                warn!(symbol = %row.symbol, "invalid weight format, using zero");
                0.0
            });
        raw.push((row.symbol, weight));
    }

    if raw.is_empty() {
        return Err(LoaderError::InvalidData(format!(
            "no constituents in {}",
            path.display()
        )));
    }

    let total: f64 = raw.iter().map(|(_, w)| w).sum();
    let weights = if total > 0.0 {
        raw.into_iter().map(|(s, w)| (s, w / total)).collect()
    } else {
        // No weight column at all: fall back to equal weighting
        let n = raw.len() as f64;
        raw.into_iter().map(|(s, _)| (s, 1.0 / n)).collect()
    };

    Ok(weights)
}

fn parse_weight(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if let Some(pct) = trimmed.strip_suffix('%') {
        pct.trim().parse::<f64>().ok().map(|w| w / 100.0)
    } else {
        trimmed.parse::<f64>().ok()
    }
}

/// Resolve the component universe from configuration.
///
/// An explicit ticker list wins; otherwise the top `num_components`
/// constituents by index weight are selected, ties broken by symbol so the
/// result is deterministic across runs.
pub fn select_components(
    config: &UniverseConfig,
    weights: &HashMap<String, f64>,
) -> Vec<String> {
    if !config.tickers.is_empty() {
        return config.tickers.clone();
    }

    let mut ranked: Vec<(&String, f64)> = weights
        .iter()
        .filter(|(symbol, _)| **symbol != config.index)
        .map(|(s, w)| (s, *w))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    ranked
        .into_iter()
        .take(config.num_components)
        .map(|(s, _)| s.clone())
        .collect()
}
