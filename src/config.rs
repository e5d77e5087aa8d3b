//! Backtest configuration.
//!
//! Deserialized from a JSON file with one section per subsystem. Every
//! field has a default so partial config files stay usable.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::PricingError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Option pricing model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    /// Black-Scholes closed form (European).
    BlackScholes,
    /// Cox-Ross-Rubinstein binomial tree (American, early exercise).
    Binomial,
}

impl FromStr for PricingModel {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "black_scholes" => Ok(Self::BlackScholes),
            "binomial" => Ok(Self::Binomial),
            other => Err(PricingError::InvalidModel(other.to_string())),
        }
    }
}

/// Position sizing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    /// Risk the same dollar amount on each position.
    EqualRisk,
    /// Half of equal-risk (conservative Kelly simplification).
    Kelly,
    /// Fixed fraction of the allocatable value.
    FixedFraction,
}

impl Default for SizingMethod {
    fn default() -> Self {
        Self::EqualRisk
    }
}

/// Backtest date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Default for BacktestWindow {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        }
    }
}

/// Starting portfolio state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub initial_cash: Decimal,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(1_000_000),
        }
    }
}

/// Trading universe: the index plus its components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Index ticker (e.g. "SPY").
    pub index: String,

    /// Explicit component list. Empty means "select from constituents file".
    #[serde(default)]
    pub tickers: Vec<String>,

    /// Number of components selected when `tickers` is empty.
    #[serde(default = "default_num_components")]
    pub num_components: usize,

    /// Constituents file with symbols and index weights.
    #[serde(default = "default_constituents_file")]
    pub constituents_file: String,
}

fn default_num_components() -> usize {
    50
}

fn default_constituents_file() -> String {
    "constituents-sp500.csv".to_string()
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            index: "SPY".to_string(),
            tickers: Vec::new(),
            num_components: default_num_components(),
            constituents_file: default_constituents_file(),
        }
    }
}

/// Option pricing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    #[serde(default = "default_pricing_model")]
    pub pricing_model: PricingModel,

    /// Annual risk-free rate as a decimal.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    /// Step count for the binomial tree.
    #[serde(default = "default_binomial_steps")]
    pub binomial_steps: usize,
}

fn default_pricing_model() -> PricingModel {
    PricingModel::BlackScholes
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_binomial_steps() -> usize {
    100
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            pricing_model: default_pricing_model(),
            risk_free_rate: default_risk_free_rate(),
            binomial_steps: default_binomial_steps(),
        }
    }
}

/// Dispersion signal parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispersionConfig {
    /// Entry threshold in standard deviations of the dispersion index.
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,

    /// Exit threshold in standard deviations.
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f64,

    /// Lookback window (trading days) for the rolling mean/stddev.
    #[serde(default = "default_signal_lookback")]
    pub lookback: usize,

    /// Dispersion index history file.
    #[serde(default = "default_dispersion_file")]
    pub index_file: String,
}

fn default_entry_threshold() -> f64 {
    1.0
}

fn default_exit_threshold() -> f64 {
    0.5
}

fn default_signal_lookback() -> usize {
    30
}

fn default_dispersion_file() -> String {
    "DSPX_History.csv".to_string()
}

impl Default for DispersionConfig {
    fn default() -> Self {
        Self {
            entry_threshold: default_entry_threshold(),
            exit_threshold: default_exit_threshold(),
            lookback: default_signal_lookback(),
            index_file: default_dispersion_file(),
        }
    }
}

/// Risk management limits and recovery parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Master switch. When false every gate passes and sizing falls back
    /// to a fixed 5% of the allocatable value.
    #[serde(default = "default_true")]
    pub risk_limits_enabled: bool,

    /// Maximum single new position as a fraction of portfolio value.
    #[serde(default = "default_max_portfolio_risk")]
    pub max_portfolio_risk_pct: f64,

    /// Per-position risk budget as a fraction of the allocatable value.
    #[serde(default = "default_max_position_risk")]
    pub max_position_risk_pct: f64,

    /// Per-position stop loss as a fraction of entry value.
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,

    /// Drawdown from peak that triggers forced liquidation and recovery.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown_pct: f64,

    /// Trading days of hard recovery before trading resumes at reduced size.
    #[serde(default = "default_recovery_days")]
    pub recovery_days: usize,

    /// Fraction of the drawdown that defines the diagnostic recovery target.
    #[serde(default = "default_recovery_percentage")]
    pub recovery_percentage: f64,

    /// Position size multiplier while in soft recovery.
    #[serde(default = "default_recovery_scaling")]
    pub recovery_scaling_factor: f64,

    /// Component premium budget as a fraction of index premium.
    #[serde(default = "default_balance_factor")]
    pub long_short_balance_factor: f64,

    /// Maximum long/|short| exposure ratio considered balanced.
    #[serde(default = "default_max_ls_ratio")]
    pub max_long_short_ratio: f64,

    #[serde(default)]
    pub position_sizing_method: SizingMethod,
}

fn default_true() -> bool {
    true
}

fn default_max_portfolio_risk() -> f64 {
    0.2
}

fn default_max_position_risk() -> f64 {
    0.05
}

fn default_stop_loss() -> f64 {
    0.15
}

fn default_max_drawdown() -> f64 {
    0.25
}

fn default_recovery_days() -> usize {
    10
}

fn default_recovery_percentage() -> f64 {
    0.5
}

fn default_recovery_scaling() -> f64 {
    0.5
}

fn default_balance_factor() -> f64 {
    0.9
}

fn default_max_ls_ratio() -> f64 {
    1.1
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_limits_enabled: true,
            max_portfolio_risk_pct: default_max_portfolio_risk(),
            max_position_risk_pct: default_max_position_risk(),
            stop_loss_pct: default_stop_loss(),
            max_drawdown_pct: default_max_drawdown(),
            recovery_days: default_recovery_days(),
            recovery_percentage: default_recovery_percentage(),
            recovery_scaling_factor: default_recovery_scaling(),
            long_short_balance_factor: default_balance_factor(),
            max_long_short_ratio: default_max_ls_ratio(),
            position_sizing_method: SizingMethod::default(),
        }
    }
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_results_dir")]
    pub results_dir: String,
}

fn default_data_dir() -> String {
    "data/processed".to_string()
}

fn default_results_dir() -> String {
    "results".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
        }
    }
}

/// Top-level backtest configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default)]
    pub backtest: BacktestWindow,

    #[serde(default)]
    pub portfolio: PortfolioConfig,

    #[serde(default)]
    pub universe: UniverseConfig,

    #[serde(default)]
    pub options: OptionsConfig,

    #[serde(default)]
    pub dispersion: DispersionConfig,

    #[serde(default)]
    pub risk_management: RiskConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

impl BacktestConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backtest.start_date >= self.backtest.end_date {
            return Err(ConfigError::Invalid(format!(
                "start_date {} must be before end_date {}",
                self.backtest.start_date, self.backtest.end_date
            )));
        }
        if self.universe.index.is_empty() {
            return Err(ConfigError::Invalid("universe.index is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BacktestConfig::default();
        assert_eq!(config.universe.index, "SPY");
        assert_eq!(config.risk_management.max_drawdown_pct, 0.25);
        assert_eq!(config.risk_management.recovery_days, 10);
        assert_eq!(config.options.binomial_steps, 100);
        assert_eq!(config.options.pricing_model, PricingModel::BlackScholes);
    }

    #[test]
    fn test_parse_partial_json() {
        let json = r#"{
            "backtest": {"start_date": "2020-01-01", "end_date": "2021-12-31"},
            "portfolio": {"initial_cash": 500000},
            "universe": {"index": "SPY", "tickers": ["AAPL", "MSFT"]},
            "options": {"pricing_model": "binomial", "risk_free_rate": 0.03},
            "risk_management": {"max_drawdown_pct": 0.15}
        }"#;
        let config: BacktestConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.options.pricing_model, PricingModel::Binomial);
        assert_eq!(config.options.binomial_steps, 100); // default preserved
        assert_eq!(config.risk_management.max_drawdown_pct, 0.15);
        assert_eq!(config.risk_management.stop_loss_pct, 0.15); // default
        assert_eq!(config.universe.tickers.len(), 2);
    }

    #[test]
    fn test_invalid_model_name() {
        let err = "garch".parse::<PricingModel>().unwrap_err();
        assert!(matches!(err, PricingError::InvalidModel(_)));
        assert!("black_scholes".parse::<PricingModel>().is_ok());
        assert!("binomial".parse::<PricingModel>().is_ok());
    }

    #[test]
    fn test_date_order_validated() {
        let json = r#"{
            "backtest": {"start_date": "2022-01-01", "end_date": "2020-12-31"}
        }"#;
        let config: BacktestConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }
}
