//! Risk management configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for sizing, stops and portfolio-level risk checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum fraction of capital allocated to a single position
    pub max_position_fraction: Decimal,

    /// Stop-loss distance as a fraction of entry price
    pub stop_loss_fraction: Decimal,

    /// Take-profit distance as a fraction of entry price
    pub take_profit_fraction: Decimal,

    /// Annualized portfolio volatility ceiling; breaching it triggers a
    /// rebalance suggestion
    pub max_drawdown: f64,

    /// ATR multiplier for trailing-stop distance
    pub atr_multiplier: Decimal,

    /// Annual risk-free rate used in Sharpe calculations
    pub risk_free_rate: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_fraction: dec!(0.1), // Max 10% of capital per position
            stop_loss_fraction: dec!(0.02),   // 2% stop loss
            take_profit_fraction: dec!(0.05), // 5% take profit
            max_drawdown: 0.25,               // Rebalance above 25% annualized vol
            atr_multiplier: dec!(2.0),        // 2x ATR trailing distance
            risk_free_rate: 0.02,             // 2% annual risk-free rate
        }
    }
}
