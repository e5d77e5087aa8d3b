pub mod backtest;
pub mod config;
pub mod data;
pub mod metrics;
pub mod pricing;
pub mod risk;
pub mod signal;

// Re-export commonly used types
pub use backtest::{BacktestEngine, BacktestResult, Ledger, Position, PositionId, TradeRecord};
pub use config::{BacktestConfig, PricingModel, SizingMethod};
pub use data::{DataLoader, LoaderError, MarketData, OptionType, PriceSeries};
pub use metrics::SummaryMetrics;
pub use pricing::{OptionPricer, PriceQuote, PricingError};
pub use risk::{RecoveryState, RiskManager};
pub use signal::{DispersionIndexSignal, Signal, SignalProvider};
