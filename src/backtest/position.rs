//! Positions and trade records.
//!
//! Instruments are a tagged enum so an option position cannot exist without
//! its strike and expiration. Monetary values are signed by quantity:
//! positive for long, negative for short.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::OptionType;

/// Shares per option contract.
pub const CONTRACT_MULTIPLIER: i64 = 100;

/// Strategy that opened a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    /// Short index volatility, long component volatility.
    Dispersion,
    /// Long index volatility, short component volatility.
    ReverseDispersion,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispersion => "dispersion",
            Self::ReverseDispersion => "reverse_dispersion",
        }
    }
}

/// Status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Reason a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Option reached its expiration date.
    Expired,
    /// Per-position stop loss.
    StopLoss,
    /// Forced liquidation by the risk manager.
    RiskLimit,
    /// Strategy exit signal.
    Signal,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::StopLoss => "stop_loss",
            Self::RiskLimit => "risk_limit",
            Self::Signal => "signal",
        }
    }
}

/// What a position holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Instrument {
    Stock,
    Option {
        option_type: OptionType,
        strike: f64,
        expiration: NaiveDate,
    },
}

impl Instrument {
    pub fn is_option(&self) -> bool {
        matches!(self, Self::Option { .. })
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Option { .. } => "option",
        }
    }

    /// Value multiplier: 100 shares per option contract, 1 for stock.
    pub fn multiplier(&self) -> Decimal {
        match self {
            Self::Stock => Decimal::ONE,
            Self::Option { .. } => Decimal::from(CONTRACT_MULTIPLIER),
        }
    }
}

/// Opaque handle into the ledger's position arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(pub(crate) usize);

impl std::fmt::Display for PositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A stock or option holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub instrument: Instrument,
    /// Contracts or shares; sign encodes long (+) / short (-).
    pub quantity: i64,
    pub entry_date: NaiveDate,
    pub entry_price: Decimal,
    /// Signed notional at entry: `quantity * entry_price * multiplier`.
    pub entry_value: Decimal,
    pub current_value: Decimal,
    pub status: PositionStatus,
    pub strategy: StrategyTag,
    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<Decimal>,
    pub exit_value: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    /// Open an option position.
    #[allow(clippy::too_many_arguments)]
    pub fn open_option(
        ticker: &str,
        option_type: OptionType,
        strike: f64,
        expiration: NaiveDate,
        quantity: i64,
        entry_price: Decimal,
        entry_date: NaiveDate,
        strategy: StrategyTag,
    ) -> Self {
        let instrument = Instrument::Option {
            option_type,
            strike,
            expiration,
        };
        let entry_value = Decimal::from(quantity) * entry_price * instrument.multiplier();
        Self {
            ticker: ticker.to_string(),
            instrument,
            quantity,
            entry_date,
            entry_price,
            entry_value,
            current_value: entry_value,
            status: PositionStatus::Open,
            strategy,
            exit_date: None,
            exit_price: None,
            exit_value: None,
            exit_reason: None,
        }
    }

    /// Open a stock position.
    pub fn open_stock(
        ticker: &str,
        quantity: i64,
        entry_price: Decimal,
        entry_date: NaiveDate,
        strategy: StrategyTag,
    ) -> Self {
        let entry_value = Decimal::from(quantity) * entry_price;
        Self {
            ticker: ticker.to_string(),
            instrument: Instrument::Stock,
            quantity,
            entry_date,
            entry_price,
            entry_value,
            current_value: entry_value,
            status: PositionStatus::Open,
            strategy,
            exit_date: None,
            exit_price: None,
            exit_value: None,
            exit_reason: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    /// Expiration date, if this is an option.
    pub fn expiration(&self) -> Option<NaiveDate> {
        match self.instrument {
            Instrument::Option { expiration, .. } => Some(expiration),
            Instrument::Stock => None,
        }
    }

    /// Whether an option position has reached expiration.
    pub fn is_expired(&self, date: NaiveDate) -> bool {
        self.expiration().is_some_and(|e| e <= date)
    }

    /// Mark closed at `price`, crediting `exit_value` to the seller.
    pub fn close(
        &mut self,
        date: NaiveDate,
        price: Decimal,
        exit_value: Decimal,
        reason: ExitReason,
    ) {
        self.status = PositionStatus::Closed;
        self.exit_date = Some(date);
        self.exit_price = Some(price);
        self.exit_value = Some(exit_value);
        self.exit_reason = Some(reason);
        self.current_value = Decimal::ZERO;
    }
}

/// Whether a trade opened or closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Open,
    Close,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

/// Immutable record of one executed leg. Appended once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub trade_type: TradeType,
    pub instrument: Instrument,
    /// Signed held quantity: positive long, negative short.
    pub quantity: i64,
    pub price: Decimal,
    /// Signed notional: cash moves by `-value` on open, `+value` on close.
    pub value: Decimal,
    pub strategy: StrategyTag,
    pub exit_reason: Option<ExitReason>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_option_entry_value_invariant() {
        let position = Position::open_option(
            "SPY",
            OptionType::Call,
            320.0,
            date(2020, 3, 20),
            5,
            dec!(4.20),
            date(2020, 2, 14),
            StrategyTag::Dispersion,
        );
        // quantity * price * 100
        assert_eq!(position.entry_value, dec!(2100));
        assert_eq!(position.current_value, dec!(2100));
        assert!(!position.is_short());
    }

    #[test]
    fn test_short_option_entry_value_negative() {
        let position = Position::open_option(
            "SPY",
            OptionType::Put,
            320.0,
            date(2020, 3, 20),
            -3,
            dec!(5.00),
            date(2020, 2, 14),
            StrategyTag::Dispersion,
        );
        assert_eq!(position.entry_value, dec!(-1500));
        assert!(position.is_short());
    }

    #[test]
    fn test_stock_entry_value_has_no_multiplier() {
        let position = Position::open_stock(
            "AAPL",
            10,
            dec!(150.00),
            date(2020, 2, 14),
            StrategyTag::Dispersion,
        );
        assert_eq!(position.entry_value, dec!(1500));
        assert!(position.expiration().is_none());
    }

    #[test]
    fn test_expiration_check() {
        let position = Position::open_option(
            "SPY",
            OptionType::Call,
            320.0,
            date(2020, 3, 20),
            1,
            dec!(4.20),
            date(2020, 2, 14),
            StrategyTag::Dispersion,
        );
        assert!(!position.is_expired(date(2020, 3, 19)));
        assert!(position.is_expired(date(2020, 3, 20)));
        assert!(position.is_expired(date(2020, 3, 23)));
    }

    #[test]
    fn test_close_records_exit() {
        let mut position = Position::open_option(
            "SPY",
            OptionType::Call,
            320.0,
            date(2020, 3, 20),
            2,
            dec!(4.00),
            date(2020, 2, 14),
            StrategyTag::Dispersion,
        );
        position.close(date(2020, 3, 2), dec!(6.00), dec!(1200), ExitReason::Signal);

        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_price, Some(dec!(6.00)));
        assert_eq!(position.exit_value, Some(dec!(1200)));
        assert_eq!(position.exit_reason, Some(ExitReason::Signal));
        assert_eq!(position.current_value, Decimal::ZERO);
        assert!(!position.is_open());
    }
}
