//! Market data loading and storage.

mod loader;
mod types;

pub use loader::{load_index_weights, select_components, DataLoader, LoaderError};
pub use types::{MarketData, OptionType, PriceBar, PriceSeries};
