//! Option pricing engine.
//!
//! Pure model functions (Black-Scholes, CRR binomial) plus a pricer that
//! derives volatility from the loaded price history. Degraded prices are
//! surfaced as explicit fallback quotes rather than silently substituted.

mod engine;
mod models;

use chrono::NaiveDate;
use thiserror::Error;

pub use engine::{historical_volatility, OptionPricer, VOLATILITY_LOOKBACK};
pub use models::{binomial_tree, black_scholes};

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("No price history for {0}")]
    DataNotFound(String),

    #[error("Not enough history for {ticker} before {date}: {have} of {need} observations")]
    InsufficientHistory {
        ticker: String,
        date: NaiveDate,
        have: usize,
        need: usize,
    },

    #[error("Expiration {expiry} is not after pricing date {as_of}")]
    InvalidExpiry {
        as_of: NaiveDate,
        expiry: NaiveDate,
    },

    #[error("Unknown pricing model: {0}")]
    InvalidModel(String),
}

/// A priced option: either a model output or an explicit fallback.
///
/// Fallbacks keep downstream sizing arithmetic away from zero while staying
/// observable in logs and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceQuote {
    /// Computed by the configured model.
    Model(f64),
    /// Degraded substitute carrying the failure reason.
    Fallback { price: f64, reason: String },
}

impl PriceQuote {
    pub fn value(&self) -> f64 {
        match self {
            Self::Model(p) => *p,
            Self::Fallback { price, .. } => *price,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}
