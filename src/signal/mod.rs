//! Trading signals.
//!
//! The engine consumes signals through the `SignalProvider` trait; the
//! shipped implementation computes a z-score of a dispersion index (e.g.
//! CBOE DSPX) against its rolling history.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DispersionConfig;
use crate::data::LoaderError;

/// Strategy action for one trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    EnterDispersion,
    EnterReverseDispersion,
    Exit,
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnterDispersion => "ENTER_DISPERSION",
            Self::EnterReverseDispersion => "ENTER_REVERSE_DISPERSION",
            Self::Exit => "EXIT",
            Self::Hold => "HOLD",
        }
    }
}

/// Diagnostics attached to a signal, for logging only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
}

/// A signal plus its diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SignalDecision {
    pub signal: Signal,
    pub metrics: SignalMetrics,
}

impl SignalDecision {
    pub fn hold() -> Self {
        Self {
            signal: Signal::Hold,
            metrics: SignalMetrics::default(),
        }
    }
}

/// Source of daily strategy signals.
pub trait SignalProvider {
    fn generate(&self, date: NaiveDate) -> SignalDecision;
}

/// Z-score signal over a dispersion index series.
///
/// The current value is compared against the mean and sample standard
/// deviation of the preceding `lookback` observations; thresholds are in
/// standard deviations.
pub struct DispersionIndexSignal {
    /// (date, index value), sorted ascending.
    observations: Vec<(NaiveDate, f64)>,
    lookback: usize,
    entry_threshold: f64,
    exit_threshold: f64,
}

impl DispersionIndexSignal {
    pub fn new(
        mut observations: Vec<(NaiveDate, f64)>,
        lookback: usize,
        entry_threshold: f64,
        exit_threshold: f64,
    ) -> Self {
        observations.sort_by_key(|(d, _)| *d);
        Self {
            observations,
            lookback,
            entry_threshold,
            exit_threshold,
        }
    }

    /// Load the index history from CSV.
    ///
    /// Accepts `DATE`/`Date`/`date` for the date column (ISO or
    /// month/day/year) and `DSPX` or any `*close*`/`*value*` header for the
    /// value column.
    pub fn from_csv(path: &Path, config: &DispersionConfig) -> Result<Self, LoaderError> {
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }

        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let date_col = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case("date"))
            .ok_or_else(|| LoaderError::InvalidData("no date column".to_string()))?;
        let value_col = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case("dspx"))
            .or_else(|| {
                headers.iter().position(|h| {
                    let h = h.to_lowercase();
                    h.contains("close") || h.contains("value")
                })
            })
            .ok_or_else(|| LoaderError::InvalidData("no dispersion value column".to_string()))?;

        let mut observations = Vec::new();
        for record in reader.records() {
            let record = record?;
            let Some(date) = record.get(date_col).and_then(parse_date) else {
                continue;
            };
            let Some(value) = record
                .get(value_col)
                .and_then(|v| v.trim().parse::<f64>().ok())
            else {
                continue;
            };
            observations.push((date, value));
        }

        if observations.is_empty() {
            return Err(LoaderError::EmptySeries(path.display().to_string()));
        }

        Ok(Self::new(
            observations,
            config.lookback,
            config.entry_threshold,
            config.exit_threshold,
        ))
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

impl SignalProvider for DispersionIndexSignal {
    fn generate(&self, date: NaiveDate) -> SignalDecision {
        let end = self.observations.partition_point(|(d, _)| *d <= date);
        let history = &self.observations[..end];

        if history.len() < self.lookback + 1 {
            debug!(%date, have = history.len(), "insufficient dispersion history, holding");
            return SignalDecision::hold();
        }

        let current = history[history.len() - 1].1;
        let window = &history[history.len() - 1 - self.lookback..history.len() - 1];

        let n = window.len() as f64;
        let mean = window.iter().map(|(_, v)| v).sum::<f64>() / n;
        let variance =
            window.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();

        let z_score = if std_dev > 0.0 {
            (current - mean) / std_dev
        } else {
            0.0
        };

        let signal = if z_score > self.entry_threshold {
            Signal::EnterDispersion
        } else if z_score < -self.entry_threshold {
            Signal::EnterReverseDispersion
        } else if z_score.abs() < self.exit_threshold {
            Signal::Exit
        } else {
            Signal::Hold
        };

        if std_dev <= 0.0 {
            warn!(%date, "dispersion index window has zero variance");
        }

        SignalDecision {
            signal,
            metrics: SignalMetrics {
                value: current,
                mean,
                std_dev,
                z_score,
            },
        }
    }
}
