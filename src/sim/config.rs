//! Simulation configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Starting capital
    pub initial_capital: Decimal,

    /// Commission charged on every fill, as a fraction of notional
    pub commission_rate: Decimal,

    /// Simulated slippage applied to market fills (0.0 to 1.0)
    pub slippage_rate: Decimal,

    /// Name of the bar indicator column holding rolling volatility
    pub volatility_column: String,

    /// Name of the bar indicator column holding ATR
    pub atr_column: String,

    /// Evaluate an ATR trailing stop on long positions in addition to
    /// the fixed stop-loss check
    pub use_trailing_stop: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(100000),
            commission_rate: dec!(0.001), // 0.1% per fill
            slippage_rate: dec!(0.001),   // 0.1% market-order slippage
            volatility_column: "volatility".to_string(),
            atr_column: "atr".to_string(),
            use_trailing_stop: false,
        }
    }
}
