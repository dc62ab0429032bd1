//! Simulation result surface.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::metrics::PerformanceMetrics;
use crate::models::Trade;

/// Aggregate results of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Symbol the run replayed
    pub symbol: String,

    /// Starting capital
    pub initial_capital: Decimal,

    /// Capital after the replay
    pub final_capital: Decimal,

    /// (final - initial) / initial
    pub total_return: Decimal,

    /// Every fill in the ledger
    pub total_trades: usize,

    /// Fills with positive realized PnL
    pub profitable_trades: usize,

    /// profitable / total (zero when no trades)
    pub win_rate: f64,

    /// Sum of net realized PnL across the ledger
    pub total_pnl: Decimal,

    /// Commission paid across the ledger
    pub total_commission: Decimal,

    /// First bar timestamp
    pub start_time: DateTime<Utc>,

    /// Last bar timestamp
    pub end_time: DateTime<Utc>,

    /// The full trade ledger, in fill order
    pub trades: Vec<Trade>,

    /// Risk and quality statistics over the realized-PnL series
    pub metrics: PerformanceMetrics,
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " SIMULATION RESULTS ")?;
        writeln!(f)?;
        writeln!(f, "Symbol:      {}", self.symbol)?;
        writeln!(
            f,
            "Period:      {} to {}",
            self.start_time.format("%Y-%m-%d"),
            self.end_time.format("%Y-%m-%d")
        )?;
        writeln!(f)?;
        writeln!(f, "--- Capital ---")?;
        writeln!(f, "Initial:     ${:.2}", self.initial_capital)?;
        writeln!(f, "Final:       ${:.2}", self.final_capital)?;
        writeln!(f, "Return:      {:.2}%", self.total_return * dec!(100))?;
        writeln!(f, "Fees Paid:   ${:.2}", self.total_commission)?;
        writeln!(f)?;
        writeln!(f, "--- Trades ---")?;
        writeln!(f, "Total:       {}", self.total_trades)?;
        writeln!(
            f,
            "Winners:     {} ({:.1}%)",
            self.profitable_trades,
            self.win_rate * 100.0
        )?;
        writeln!(f, "Total PnL:   ${:.2}", self.total_pnl)?;
        writeln!(f, "Avg Win:     ${:.2}", self.metrics.avg_win)?;
        writeln!(f, "Avg Loss:    ${:.2}", self.metrics.avg_loss)?;
        writeln!(f, "Profit Factor: {:.2}", self.metrics.profit_factor)?;
        writeln!(f)?;
        writeln!(f, "--- Risk ---")?;
        writeln!(f, "Max Drawdown: {:.2}%", self.metrics.max_drawdown * 100.0)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.metrics.sharpe_ratio)?;
        writeln!(f, "Sortino Ratio: {:.2}", self.metrics.sortino_ratio)?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

/// Results of a multi-symbol run allocated by optimizer weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioReport {
    /// Capital allocation weight per symbol, in run order
    pub weights: Vec<(String, f64)>,

    /// Whether the weight optimization converged (equal weighting is
    /// used when it did not)
    pub weights_converged: bool,

    /// Per-symbol reports
    pub symbol_reports: Vec<SimulationReport>,

    /// Starting capital across all symbols
    pub initial_capital: Decimal,

    /// Final capital across all symbols
    pub final_capital: Decimal,

    /// (final - initial) / initial
    pub total_return: Decimal,

    /// Combined ledger of all runs, ordered by fill timestamp
    pub trades: Vec<Trade>,
}

impl std::fmt::Display for PortfolioReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " PORTFOLIO RESULTS ")?;
        writeln!(f)?;
        writeln!(f, "--- Allocation ---")?;
        for (symbol, weight) in &self.weights {
            writeln!(f, "{:<12} {:.1}%", symbol, weight * 100.0)?;
        }
        if !self.weights_converged {
            writeln!(f, "(optimizer did not converge; equal weights used)")?;
        }
        writeln!(f)?;
        writeln!(f, "--- Capital ---")?;
        writeln!(f, "Initial:     ${:.2}", self.initial_capital)?;
        writeln!(f, "Final:       ${:.2}", self.final_capital)?;
        writeln!(f, "Return:      {:.2}%", self.total_return * dec!(100))?;
        writeln!(f, "Trades:      {}", self.trades.len())?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}
