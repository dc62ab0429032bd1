//! Performance analytics over a realized-PnL series.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::risk::ANNUALIZATION_FACTOR;

/// Risk and quality statistics computed from a sequence of per-fill
/// realized PnL values (ledger order).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Total realized PnL
    pub total_pnl: Decimal,

    /// Fraction of fills with positive realized PnL
    pub win_rate: f64,

    /// Average profit across winning fills
    pub avg_win: Decimal,

    /// Average loss across losing fills (absolute value)
    pub avg_loss: Decimal,

    /// Gross profit / gross loss
    pub profit_factor: f64,

    /// Mean realized PnL per fill
    pub expectancy: Decimal,

    /// Deepest peak-to-trough decline of the realized equity curve, as a
    /// fraction of the peak
    pub max_drawdown: f64,

    /// The same decline in absolute terms
    pub max_drawdown_abs: Decimal,

    /// Annualized Sharpe ratio of the PnL series (zero risk-free rate)
    pub sharpe_ratio: f64,

    /// Annualized Sortino ratio (downside deviation denominator)
    pub sortino_ratio: f64,
}

impl PerformanceMetrics {
    /// Compute metrics from a realized-PnL series. An empty series
    /// produces the zero default.
    pub fn from_pnls(pnls: &[Decimal]) -> Self {
        if pnls.is_empty() {
            return Self::default();
        }

        let mut metrics = Self::default();

        let (wins, losses): (Vec<_>, Vec<_>) = pnls.iter().partition(|&&p| p > Decimal::ZERO);
        let losses: Vec<Decimal> = losses
            .into_iter()
            .copied()
            .filter(|p| *p < Decimal::ZERO)
            .collect();

        metrics.total_pnl = pnls.iter().copied().sum();
        metrics.win_rate = wins.len() as f64 / pnls.len() as f64;
        metrics.expectancy = metrics.total_pnl / Decimal::from(pnls.len() as u32);

        if !wins.is_empty() {
            metrics.avg_win =
                wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len() as u32);
        }
        if !losses.is_empty() {
            metrics.avg_loss = losses.iter().map(|l| l.abs()).sum::<Decimal>()
                / Decimal::from(losses.len() as u32);
        }

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();
        if gross_loss > Decimal::ZERO {
            metrics.profit_factor =
                gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0);
        } else if gross_profit > Decimal::ZERO {
            metrics.profit_factor = f64::INFINITY;
        }

        Self::fill_drawdown(&mut metrics, pnls);
        Self::fill_sharpe_sortino(&mut metrics, pnls);

        metrics
    }

    /// Walk the cumulative equity curve and record the deepest decline
    /// from a running peak.
    fn fill_drawdown(metrics: &mut Self, pnls: &[Decimal]) {
        let mut equity = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;
        let mut max_dd_pct = 0.0f64;

        for pnl in pnls {
            equity += *pnl;

            if equity > peak {
                peak = equity;
            }

            if peak > Decimal::ZERO {
                let dd = peak - equity;
                if dd > max_dd {
                    max_dd = dd;
                }

                let dd_pct = dd.to_f64().unwrap_or(0.0) / peak.to_f64().unwrap_or(1.0);
                if dd_pct > max_dd_pct {
                    max_dd_pct = dd_pct;
                }
            }
        }

        metrics.max_drawdown = max_dd_pct;
        metrics.max_drawdown_abs = max_dd;
    }

    /// Annualized Sharpe and Sortino over the PnL values.
    fn fill_sharpe_sortino(metrics: &mut Self, pnls: &[Decimal]) {
        if pnls.len() < 2 {
            return;
        }

        let values: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        if values.len() < 2 {
            return;
        }

        let mean = values.clone().mean();
        let std_dev = values.clone().std_dev();

        if std_dev > 0.0 {
            metrics.sharpe_ratio = (mean / std_dev) * ANNUALIZATION_FACTOR.sqrt();
        }

        let negative: Vec<f64> = values.iter().filter(|&&v| v < 0.0).copied().collect();
        if negative.len() >= 2 {
            let downside_dev = negative.std_dev();
            if downside_dev > 0.0 {
                metrics.sortino_ratio = (mean / downside_dev) * ANNUALIZATION_FACTOR.sqrt();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_win_loss_statistics() {
        let pnls = vec![dec!(100), dec!(-50), dec!(200), dec!(-30), dec!(150)];
        let metrics = PerformanceMetrics::from_pnls(&pnls);

        assert_eq!(metrics.total_pnl, dec!(370));
        assert!((metrics.win_rate - 0.6).abs() < 1e-9);
        assert_eq!(metrics.avg_win, dec!(150));
        assert_eq!(metrics.avg_loss, dec!(40));
        assert_eq!(metrics.expectancy, dec!(74));
        assert!((metrics.profit_factor - 450.0 / 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_from_peak() {
        // Equity walks 100, 150, 70, 50, 150, 200: deepest dip is 100
        // off the 150 peak
        let pnls = vec![
            dec!(100),
            dec!(50),
            dec!(-80),
            dec!(-20),
            dec!(100),
            dec!(50),
        ];
        let metrics = PerformanceMetrics::from_pnls(&pnls);

        assert_eq!(metrics.max_drawdown_abs, dec!(100));
        assert!(metrics.max_drawdown > 0.65 && metrics.max_drawdown < 0.68);
    }

    #[test]
    fn test_zero_trades_yield_defaults() {
        let metrics = PerformanceMetrics::from_pnls(&[]);
        assert_eq!(metrics.total_pnl, Decimal::ZERO);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.profit_factor, 0.0);
    }

    #[test]
    fn test_all_wins_profit_factor_infinite() {
        let metrics = PerformanceMetrics::from_pnls(&[dec!(10), dec!(20)]);
        assert!(metrics.profit_factor.is_infinite());
        assert_eq!(metrics.win_rate, 1.0);
    }
}
