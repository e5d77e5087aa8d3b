//! Summary performance metrics.
//!
//! Derived by post-processing the daily snapshot history; nothing here is
//! maintained incrementally by the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::PortfolioSnapshot;

/// Trading days per year for annualization.
const TRADING_DAYS: f64 = 252.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub avg_net_exposure_pct: f64,
    pub max_net_exposure_pct: f64,
    pub final_value: Decimal,
    pub trading_days: usize,
}

impl SummaryMetrics {
    /// Compute metrics from the snapshot history.
    pub fn from_snapshots(snapshots: &[PortfolioSnapshot]) -> Self {
        if snapshots.is_empty() {
            return Self::default();
        }

        let values: Vec<f64> = snapshots
            .iter()
            .map(|s| s.value.try_into().unwrap_or(0.0))
            .collect();

        let returns: Vec<f64> = values
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();

        let first = values[0];
        let last = values[values.len() - 1];
        let total_return = if first != 0.0 { last / first - 1.0 } else { 0.0 };

        let (mean, std_dev) = if returns.is_empty() {
            (0.0, 0.0)
        } else {
            let n = returns.len() as f64;
            let mean = returns.iter().sum::<f64>() / n;
            let variance = if returns.len() > 1 {
                returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0)
            } else {
                0.0
            };
            (mean, variance.sqrt())
        };

        let sharpe_ratio = if std_dev > 0.0 {
            mean / std_dev * TRADING_DAYS.sqrt()
        } else {
            0.0
        };

        let max_drawdown = snapshots.iter().map(|s| s.drawdown).fold(0.0, f64::max);
        let exposures: Vec<f64> = snapshots.iter().map(|s| s.net_exposure_pct).collect();
        let avg_net_exposure_pct = exposures.iter().sum::<f64>() / exposures.len() as f64;
        let max_net_exposure_pct = exposures.iter().copied().fold(f64::MIN, f64::max);

        Self {
            total_return,
            annualized_return: mean * TRADING_DAYS,
            annualized_volatility: std_dev * TRADING_DAYS.sqrt(),
            sharpe_ratio,
            max_drawdown,
            avg_net_exposure_pct,
            max_net_exposure_pct,
            final_value: snapshots[snapshots.len() - 1].value,
            trading_days: snapshots.len(),
        }
    }

    /// Generate a summary report.
    pub fn summary(&self) -> String {
        format!(
            "Performance Summary\n\
             ----------------------------------------\n\
             Total Return: {:.2}%\n\
             Annualized Return: {:.2}%\n\
             Annualized Volatility: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             Max Drawdown: {:.2}%\n\
             \n\
             Avg Net Exposure: {:.2}%\n\
             Max Net Exposure: {:.2}%\n\
             Final Value: ${:.2}\n\
             Trading Days: {}",
            self.total_return * 100.0,
            self.annualized_return * 100.0,
            self.annualized_volatility * 100.0,
            self.sharpe_ratio,
            self.max_drawdown * 100.0,
            self.avg_net_exposure_pct * 100.0,
            self.max_net_exposure_pct * 100.0,
            self.final_value,
            self.trading_days,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn snapshot(day: u32, value: Decimal, drawdown: f64) -> PortfolioSnapshot {
        PortfolioSnapshot {
            date: NaiveDate::from_ymd_opt(2020, 1, day).unwrap(),
            value,
            cash: value,
            drawdown,
            long_exposure: Decimal::ZERO,
            short_exposure: Decimal::ZERO,
            net_exposure: Decimal::ZERO,
            net_exposure_pct: 0.1,
            index_exposure: Decimal::ZERO,
            components_exposure: Decimal::ZERO,
            recovery_mode: false,
        }
    }

    #[test]
    fn test_empty_history() {
        let metrics = SummaryMetrics::from_snapshots(&[]);
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.trading_days, 0);
    }

    #[test]
    fn test_total_return_and_drawdown() {
        let snapshots = vec![
            snapshot(2, dec!(1_000_000), 0.0),
            snapshot(3, dec!(1_100_000), 0.0),
            snapshot(6, dec!(990_000), 0.10),
        ];
        let metrics = SummaryMetrics::from_snapshots(&snapshots);

        assert!((metrics.total_return - (-0.01)).abs() < 1e-12);
        assert_eq!(metrics.max_drawdown, 0.10);
        assert_eq!(metrics.final_value, dec!(990_000));
        assert_eq!(metrics.trading_days, 3);
        assert!((metrics.avg_net_exposure_pct - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_flat_history_has_zero_sharpe() {
        let snapshots = vec![
            snapshot(2, dec!(1_000_000), 0.0),
            snapshot(3, dec!(1_000_000), 0.0),
            snapshot(6, dec!(1_000_000), 0.0),
        ];
        let metrics = SummaryMetrics::from_snapshots(&snapshots);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.annualized_volatility, 0.0);
    }
}
