//! Risk manager with a drawdown-recovery state machine.
//!
//! Tracks portfolio value against its high-water mark and gates every trade
//! decision. A drawdown breach forces liquidation and enters a hard
//! recovery pause; after the cooling period trading resumes at reduced size
//! until the prior peak is regained.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backtest::{Position, StrategyTag};
use crate::config::{RiskConfig, SizingMethod};
use crate::data::OptionType;

/// Recovery state. The three states are mutually exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryState {
    /// Normal operation, trading allowed.
    Normal,
    /// Drawdown breach cooling period: no new trades.
    HardRecovery,
    /// Cooling period served: trading at reduced size until the peak is regained.
    SoftRecovery,
}

impl RecoveryState {
    pub fn is_recovery(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// Point-in-time view of the risk manager, recorded with each snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskStatus {
    pub enabled: bool,
    pub state: RecoveryState,
    pub current_drawdown: f64,
    pub peak_value: Decimal,
    pub breach_date: Option<NaiveDate>,
    pub breach_value: Option<Decimal>,
    pub recovery_target_value: Option<Decimal>,
    pub days_in_recovery: usize,
}

/// Gates trade entry, sizes positions, and triggers forced liquidation.
pub struct RiskManager {
    config: RiskConfig,
    initial_value: Decimal,
    current_value: Decimal,
    peak_value: Decimal,
    current_drawdown: f64,
    state: RecoveryState,
    breach_date: Option<NaiveDate>,
    breach_value: Option<Decimal>,
    recovery_target_value: Option<Decimal>,
    /// Trading-day updates since the breach.
    days_in_recovery: usize,
    /// Set only on the update that first crosses the drawdown limit.
    breach_today: bool,
}

fn to_f64(value: Decimal) -> f64 {
    value.try_into().unwrap_or(0.0)
}

fn from_f64(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default()
}

impl RiskManager {
    pub fn new(config: RiskConfig, initial_value: Decimal) -> Self {
        Self {
            config,
            initial_value,
            current_value: initial_value,
            peak_value: initial_value,
            current_drawdown: 0.0,
            state: RecoveryState::Normal,
            breach_date: None,
            breach_value: None,
            recovery_target_value: None,
            days_in_recovery: 0,
            breach_today: false,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn current_drawdown(&self) -> f64 {
        self.current_drawdown
    }

    pub fn peak_value(&self) -> Decimal {
        self.peak_value
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            enabled: self.config.risk_limits_enabled,
            state: self.state,
            current_drawdown: self.current_drawdown,
            peak_value: self.peak_value,
            breach_date: self.breach_date,
            breach_value: self.breach_value,
            recovery_target_value: self.recovery_target_value,
            days_in_recovery: self.days_in_recovery,
        }
    }

    /// Feed one trading day's ending portfolio value.
    ///
    /// Updates the watermark, drawdown, and recovery state; returns whether
    /// trading is permitted (false only in hard recovery).
    pub fn update(&mut self, value: Decimal, date: NaiveDate) -> bool {
        self.breach_today = false;
        self.current_value = value;

        let prior_peak = self.peak_value;
        if value > self.peak_value {
            self.peak_value = value;
        }

        let peak = to_f64(self.peak_value);
        self.current_drawdown = if peak > 0.0 {
            ((peak - to_f64(value)) / peak).clamp(0.0, 1.0)
        } else {
            0.0
        };

        match self.state {
            RecoveryState::Normal => {
                if self.config.risk_limits_enabled
                    && self.current_drawdown > self.config.max_drawdown_pct
                {
                    self.enter_hard_recovery(value, prior_peak, date);
                }
            }
            RecoveryState::HardRecovery | RecoveryState::SoftRecovery => {
                if value >= prior_peak {
                    info!(
                        value = %value,
                        peak = %prior_peak,
                        "full recovery complete, resuming normal trading"
                    );
                    self.state = RecoveryState::Normal;
                    self.breach_date = None;
                    self.breach_value = None;
                    self.recovery_target_value = None;
                    self.days_in_recovery = 0;
                } else {
                    self.days_in_recovery += 1;
                    if self.state == RecoveryState::HardRecovery
                        && self.days_in_recovery >= self.config.recovery_days
                    {
                        info!(
                            days = self.days_in_recovery,
                            "cooling period served, resuming trading at reduced size"
                        );
                        self.state = RecoveryState::SoftRecovery;
                    }
                }
            }
        }

        self.state != RecoveryState::HardRecovery
    }

    fn enter_hard_recovery(&mut self, value: Decimal, peak: Decimal, date: NaiveDate) {
        warn!(
            drawdown = self.current_drawdown,
            limit = self.config.max_drawdown_pct,
            value = %value,
            peak = %peak,
            "maximum drawdown exceeded, entering hard recovery"
        );
        self.state = RecoveryState::HardRecovery;
        self.breach_date = Some(date);
        self.breach_value = Some(value);
        self.days_in_recovery = 0;
        self.breach_today = true;

        // Diagnostic progress marker only; exits are gated by elapsed days
        // and by regaining the peak, never by this target.
        let recovery_amount =
            (peak - value) * from_f64(self.config.recovery_percentage);
        self.recovery_target_value = Some(value + recovery_amount);
    }

    /// Whether every open position must be closed now.
    ///
    /// True exactly on the update that first crosses the drawdown limit,
    /// and whenever the portfolio has lost half its initial capital.
    pub fn should_force_liquidate(&self) -> bool {
        if !self.config.risk_limits_enabled {
            return false;
        }
        if self.breach_today {
            return true;
        }
        if self.current_value * Decimal::from(2) < self.initial_value {
            warn!(value = %self.current_value, "portfolio below half of initial capital");
            return true;
        }
        false
    }

    /// Whether new positions may be opened today.
    pub fn can_enter_new_trades(&self, _date: NaiveDate) -> bool {
        if !self.config.risk_limits_enabled {
            return true;
        }
        match self.state {
            RecoveryState::HardRecovery => false,
            RecoveryState::SoftRecovery => true,
            RecoveryState::Normal => self.current_drawdown <= self.config.max_drawdown_pct,
        }
    }

    /// Contract count for a new option leg.
    ///
    /// The risk budget is `max_position_risk_pct` of the allocatable value;
    /// a computed count of zero is floored to one contract while the price
    /// is positive, and soft recovery halves the result.
    pub fn size_position(
        &self,
        strategy: StrategyTag,
        ticker: &str,
        option_type: OptionType,
        option_price: f64,
        allocatable_value: f64,
    ) -> i64 {
        if option_price <= 0.0 || allocatable_value <= 0.0 {
            return 0;
        }
        let contract_cost = option_price * 100.0;

        if !self.config.risk_limits_enabled {
            return (0.05 * allocatable_value / contract_cost) as i64;
        }
        if self.state == RecoveryState::HardRecovery {
            return 0;
        }

        let risk_budget = self.config.max_position_risk_pct * allocatable_value;
        let mut contracts = match self.config.position_sizing_method {
            SizingMethod::EqualRisk => (risk_budget / contract_cost) as i64,
            SizingMethod::Kelly => (0.5 * risk_budget / contract_cost) as i64,
            SizingMethod::FixedFraction => {
                (self.config.max_position_risk_pct * allocatable_value / contract_cost) as i64
            }
        };

        if contracts == 0 {
            contracts = 1;
        }

        if self.state == RecoveryState::SoftRecovery {
            contracts = (contracts as f64 * self.config.recovery_scaling_factor) as i64;
            debug!(
                strategy = strategy.as_str(),
                ticker,
                option_type = option_type.as_str(),
                contracts,
                "soft recovery: position size reduced"
            );
        }

        contracts
    }

    /// Whether a position's loss has exceeded the stop-loss limit.
    ///
    /// Values are signed by quantity, so one formula serves both sides: a
    /// short's liability shrinking toward zero reads as positive P&L.
    pub fn check_stop_loss(&self, position: &Position) -> bool {
        if !self.config.risk_limits_enabled {
            return false;
        }
        let entry = to_f64(position.entry_value);
        let current = to_f64(position.current_value);
        if entry == 0.0 {
            return false;
        }

        let pnl_pct = (current - entry) / entry.abs();
        if pnl_pct < -self.config.stop_loss_pct {
            warn!(ticker = %position.ticker, pnl_pct, "stop-loss triggered");
            return true;
        }
        false
    }

    /// Whether a new position of this size fits the portfolio risk limit.
    pub fn check_portfolio_risk(
        &self,
        new_position_value: Decimal,
        portfolio_value: Decimal,
    ) -> bool {
        if !self.config.risk_limits_enabled {
            return true;
        }
        if self.state == RecoveryState::HardRecovery {
            return false;
        }
        let portfolio = to_f64(portfolio_value);
        if portfolio <= 0.0 {
            return false;
        }

        let risk = to_f64(new_position_value).abs() / portfolio;
        if risk > self.config.max_portfolio_risk_pct {
            warn!(
                risk,
                limit = self.config.max_portfolio_risk_pct,
                "position would exceed portfolio risk limit"
            );
            return false;
        }
        true
    }

    /// Whether long and short exposure are acceptably balanced.
    pub fn check_trade_balance(&self, long_exposure: Decimal, short_exposure: Decimal) -> bool {
        if !self.config.risk_limits_enabled {
            return true;
        }
        if self.state.is_recovery() {
            return false;
        }

        let long = to_f64(long_exposure);
        let short = to_f64(short_exposure).abs();
        if long <= 0.0 || short <= 0.0 {
            warn!("trade is not balanced: missing exposure on one side");
            return false;
        }

        let ratio = long / short;
        if ratio > self.config.max_long_short_ratio {
            warn!(
                ratio,
                limit = self.config.max_long_short_ratio,
                "trade is not balanced: long/short ratio exceeds limit"
            );
            return false;
        }
        true
    }

    /// Premium budget for the component leg, derived from the index leg.
    pub fn component_budget(
        &self,
        premium_collected: Decimal,
        portfolio_value: Decimal,
    ) -> Decimal {
        if !self.config.risk_limits_enabled {
            return portfolio_value * from_f64(0.2);
        }
        if self.state.is_recovery() {
            return Decimal::ZERO;
        }

        let budget = premium_collected * from_f64(self.config.long_short_balance_factor);
        let cap = portfolio_value * from_f64(self.config.max_portfolio_risk_pct);
        if budget > cap {
            info!(cap = %cap, "component budget capped at portfolio risk limit");
            cap
        } else {
            budget
        }
    }

    /// The balance factor applied when deriving component budgets.
    pub fn long_short_balance_factor(&self) -> f64 {
        self.config.long_short_balance_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::Instrument;
    use rust_decimal_macros::dec;

    fn config() -> RiskConfig {
        RiskConfig {
            max_drawdown_pct: 0.15,
            ..RiskConfig::default()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn manager() -> RiskManager {
        RiskManager::new(config(), dec!(1_000_000))
    }

    fn option_position(entry_value: Decimal, current_value: Decimal) -> Position {
        let mut position = Position::open_option(
            "TST",
            OptionType::Call,
            100.0,
            date(2020, 3, 20),
            10,
            dec!(2.50),
            date(2020, 2, 3),
            StrategyTag::Dispersion,
        );
        position.entry_value = entry_value;
        position.current_value = current_value;
        position
    }

    #[test]
    fn test_drawdown_breach_enters_hard_recovery() {
        let mut rm = manager();
        assert!(rm.update(dec!(1_000_000), date(2020, 1, 2)));
        assert!(rm.update(dec!(1_100_000), date(2020, 1, 3)));

        // 22.7% drawdown from the 1.1M peak crosses the 15% limit
        let may_trade = rm.update(dec!(850_000), date(2020, 1, 6));
        assert!(!may_trade);
        assert_eq!(rm.state(), RecoveryState::HardRecovery);
        assert!((rm.current_drawdown() - 0.2272).abs() < 1e-3);
        assert!(rm.should_force_liquidate());
        assert!(!rm.can_enter_new_trades(date(2020, 1, 6)));
    }

    #[test]
    fn test_force_liquidate_fires_once_per_breach() {
        let mut rm = manager();
        rm.update(dec!(1_100_000), date(2020, 1, 3));
        rm.update(dec!(850_000), date(2020, 1, 6));
        assert!(rm.should_force_liquidate());

        // Drawdown stays elevated but the trigger is edge-based
        rm.update(dec!(860_000), date(2020, 1, 7));
        assert!(!rm.should_force_liquidate());
        assert_eq!(rm.state(), RecoveryState::HardRecovery);
    }

    #[test]
    fn test_catastrophic_stop_independent_of_state() {
        let mut rm = manager();
        rm.update(dec!(1_000_000), date(2020, 1, 2));
        rm.update(dec!(499_999), date(2020, 1, 3));
        assert!(rm.should_force_liquidate());

        // Still true on subsequent days while below half of initial
        rm.update(dec!(480_000), date(2020, 1, 6));
        assert!(rm.should_force_liquidate());
    }

    #[test]
    fn test_hard_to_soft_after_cooling_period() {
        let mut rm = RiskManager::new(
            RiskConfig {
                max_drawdown_pct: 0.15,
                recovery_days: 3,
                ..RiskConfig::default()
            },
            dec!(1_000_000),
        );
        rm.update(dec!(1_100_000), date(2020, 1, 3));
        rm.update(dec!(850_000), date(2020, 1, 6));
        assert_eq!(rm.state(), RecoveryState::HardRecovery);

        rm.update(dec!(855_000), date(2020, 1, 7));
        rm.update(dec!(860_000), date(2020, 1, 8));
        assert_eq!(rm.state(), RecoveryState::HardRecovery);

        // Third trading day since the breach completes the cooling period
        let may_trade = rm.update(dec!(858_000), date(2020, 1, 9));
        assert!(may_trade);
        assert_eq!(rm.state(), RecoveryState::SoftRecovery);
        assert!(rm.can_enter_new_trades(date(2020, 1, 9)));
    }

    #[test]
    fn test_full_recovery_resumes_normal_trading() {
        let mut rm = manager();
        rm.update(dec!(1_100_000), date(2020, 1, 3));
        rm.update(dec!(850_000), date(2020, 1, 6));
        assert_eq!(rm.state(), RecoveryState::HardRecovery);

        // Regaining the prior peak exits recovery entirely
        rm.update(dec!(1_100_000), date(2020, 1, 7));
        assert_eq!(rm.state(), RecoveryState::Normal);
        assert_eq!(rm.current_drawdown(), 0.0);
        assert!(rm.can_enter_new_trades(date(2020, 1, 7)));

        // And the watermark is ready for the next breach
        rm.update(dec!(900_000), date(2020, 1, 8));
        assert_eq!(rm.state(), RecoveryState::HardRecovery);
        assert!(rm.should_force_liquidate());
    }

    #[test]
    fn test_recovery_target_is_diagnostic() {
        let mut rm = manager();
        rm.update(dec!(1_100_000), date(2020, 1, 3));
        rm.update(dec!(850_000), date(2020, 1, 6));

        // Target = breach + 50% of (peak - breach)
        let status = rm.status();
        assert_eq!(status.recovery_target_value, Some(dec!(975_000)));

        // Reaching the target alone does not exit recovery
        rm.update(dec!(980_000), date(2020, 1, 7));
        assert!(rm.state().is_recovery());
    }

    #[test]
    fn test_position_sizing_methods() {
        let rm = manager();

        // equal_risk: 5% of 1M = 50k budget, $2.50 option = $250/contract
        let contracts = rm.size_position(
            StrategyTag::Dispersion,
            "SPY",
            OptionType::Call,
            2.50,
            1_000_000.0,
        );
        assert_eq!(contracts, 200);

        let rm_kelly = RiskManager::new(
            RiskConfig {
                position_sizing_method: SizingMethod::Kelly,
                ..config()
            },
            dec!(1_000_000),
        );
        let contracts = rm_kelly.size_position(
            StrategyTag::Dispersion,
            "SPY",
            OptionType::Call,
            2.50,
            1_000_000.0,
        );
        assert_eq!(contracts, 100);
    }

    #[test]
    fn test_sizing_floors_at_one_contract() {
        let rm = manager();
        // Budget 5% of 1000 = $50, one contract costs $250: floors to 1
        let contracts =
            rm.size_position(StrategyTag::Dispersion, "SPY", OptionType::Put, 2.50, 1_000.0);
        assert_eq!(contracts, 1);

        // Zero price sizes to zero
        let contracts =
            rm.size_position(StrategyTag::Dispersion, "SPY", OptionType::Put, 0.0, 1_000.0);
        assert_eq!(contracts, 0);
    }

    #[test]
    fn test_sizing_scaled_in_soft_recovery() {
        let mut rm = RiskManager::new(
            RiskConfig {
                max_drawdown_pct: 0.15,
                recovery_days: 1,
                ..RiskConfig::default()
            },
            dec!(1_000_000),
        );
        rm.update(dec!(1_100_000), date(2020, 1, 3));
        rm.update(dec!(850_000), date(2020, 1, 6));
        rm.update(dec!(855_000), date(2020, 1, 7));
        assert_eq!(rm.state(), RecoveryState::SoftRecovery);

        let contracts = rm.size_position(
            StrategyTag::Dispersion,
            "SPY",
            OptionType::Call,
            2.50,
            1_000_000.0,
        );
        assert_eq!(contracts, 100); // 200 halved

        // Hard recovery sizes to zero
        let mut rm = manager();
        rm.update(dec!(1_100_000), date(2020, 1, 3));
        rm.update(dec!(850_000), date(2020, 1, 6));
        let contracts = rm.size_position(
            StrategyTag::Dispersion,
            "SPY",
            OptionType::Call,
            2.50,
            1_000_000.0,
        );
        assert_eq!(contracts, 0);
    }

    #[test]
    fn test_stop_loss_long_position() {
        let rm = manager();

        // 20% loss on a long position exceeds the 15% stop
        let position = option_position(dec!(1_000), dec!(800));
        assert!(rm.check_stop_loss(&position));

        let position = option_position(dec!(1_000), dec!(900));
        assert!(!rm.check_stop_loss(&position));
    }

    #[test]
    fn test_stop_loss_short_position() {
        let rm = manager();

        // Short liability grew from 1000 to 1300: a 30% loss
        let position = option_position(dec!(-1_000), dec!(-1_300));
        assert!(rm.check_stop_loss(&position));

        // Liability shrank: profit, no stop
        let position = option_position(dec!(-1_000), dec!(-700));
        assert!(!rm.check_stop_loss(&position));
    }

    #[test]
    fn test_portfolio_risk_gate() {
        let rm = manager();
        // 25% of portfolio exceeds the 20% limit
        assert!(!rm.check_portfolio_risk(dec!(250_000), dec!(1_000_000)));
        assert!(rm.check_portfolio_risk(dec!(150_000), dec!(1_000_000)));
        // Sign does not matter
        assert!(!rm.check_portfolio_risk(dec!(-250_000), dec!(1_000_000)));
    }

    #[test]
    fn test_trade_balance_ratio() {
        let rm = manager();

        // 95k / 100k = 0.95, within the 1.1 limit
        assert!(rm.check_trade_balance(dec!(95_000), dec!(-100_000)));

        // 120k / 100k = 1.2, over the limit
        assert!(!rm.check_trade_balance(dec!(120_000), dec!(-100_000)));

        // Missing exposure on either side fails
        assert!(!rm.check_trade_balance(dec!(0), dec!(-100_000)));
        assert!(!rm.check_trade_balance(dec!(95_000), dec!(0)));
    }

    #[test]
    fn test_trade_balance_blocked_in_recovery() {
        let mut rm = manager();
        rm.update(dec!(1_100_000), date(2020, 1, 3));
        rm.update(dec!(850_000), date(2020, 1, 6));
        assert!(!rm.check_trade_balance(dec!(95_000), dec!(-100_000)));
    }

    #[test]
    fn test_component_budget() {
        let rm = manager();

        // premium * 0.9 balance factor
        let budget = rm.component_budget(dec!(100_000), dec!(1_000_000));
        assert_eq!(budget, dec!(90_000));

        // Capped at 20% of portfolio
        let budget = rm.component_budget(dec!(400_000), dec!(1_000_000));
        assert_eq!(budget, dec!(200_000));
    }

    #[test]
    fn test_disabled_risk_limits() {
        let mut rm = RiskManager::new(
            RiskConfig {
                risk_limits_enabled: false,
                max_drawdown_pct: 0.15,
                ..RiskConfig::default()
            },
            dec!(1_000_000),
        );
        rm.update(dec!(1_100_000), date(2020, 1, 3));
        assert!(rm.update(dec!(700_000), date(2020, 1, 6)));
        assert_eq!(rm.state(), RecoveryState::Normal);
        assert!(!rm.should_force_liquidate());
        assert!(rm.check_trade_balance(dec!(500_000), dec!(-100_000)));

        // Disabled sizing: fixed 5% of allocatable
        let contracts = rm.size_position(
            StrategyTag::Dispersion,
            "SPY",
            OptionType::Call,
            2.50,
            1_000_000.0,
        );
        assert_eq!(contracts, 200);
    }

    #[test]
    fn test_helper_builds_option_positions() {
        let position = option_position(dec!(1_000), dec!(1_000));
        assert!(matches!(position.instrument, Instrument::Option { .. }));
    }
}
