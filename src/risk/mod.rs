//! Risk management.

mod manager;

pub use manager::{RecoveryState, RiskManager, RiskStatus};
