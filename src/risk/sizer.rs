//! Risk-based position sizing and exit-threshold checks.

use ndarray::{Array1, Array2};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

use super::{Objective, PortfolioOptimizer, ReturnStatistics, RiskConfig};

/// Portfolio-level risk assessment.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    /// Whether current risk exceeds the configured ceiling
    pub rebalance_needed: bool,

    /// Annualized portfolio volatility at the current weights
    pub current_risk: f64,

    /// Annualized Sharpe ratio at the current weights
    pub sharpe_ratio: f64,

    /// Suggested weights when a rebalance is needed
    pub optimal_weights: Option<Vec<f64>>,
}

/// Converts capital and volatility into bounded order quantities and
/// evaluates stop-loss / take-profit / trailing-stop thresholds.
pub struct RiskSizer {
    config: RiskConfig,
    optimizer: PortfolioOptimizer,
}

impl RiskSizer {
    /// Create a sizer with the given configuration.
    pub fn new(config: RiskConfig) -> Self {
        let optimizer = PortfolioOptimizer::new(config.risk_free_rate);
        Self { config, optimizer }
    }

    /// Access the active configuration.
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Calculate a bounded position quantity.
    ///
    /// The notional cap is `capital * max_position_fraction`. Higher
    /// volatility shrinks the size through a 1/(1+vol) multiplier; a
    /// correlation with existing exposure shrinks it further through
    /// (1 - |correlation|). The result never exceeds the unadjusted cap
    /// and is never negative.
    pub fn calculate_position_size(
        &self,
        capital: Decimal,
        price: Decimal,
        volatility: f64,
        correlation: Option<f64>,
    ) -> EngineResult<Decimal> {
        if price <= Decimal::ZERO {
            return Err(EngineError::invalid_input(format!(
                "price must be positive, got {price}"
            )));
        }
        if !volatility.is_finite() || volatility < 0.0 {
            return Err(EngineError::invalid_input(format!(
                "volatility must be finite and non-negative, got {volatility}"
            )));
        }
        if let Some(c) = correlation {
            if !c.is_finite() || !(-1.0..=1.0).contains(&c) {
                return Err(EngineError::invalid_input(format!(
                    "correlation must lie in [-1, 1], got {c}"
                )));
            }
        }
        if capital <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let max_position_value = capital * self.config.max_position_fraction;

        let vol_adjustment =
            Decimal::try_from(1.0 / (1.0 + volatility)).unwrap_or(Decimal::ONE);
        let correlation_adjustment = correlation
            .map(|c| Decimal::try_from(1.0 - c.abs()).unwrap_or(Decimal::ONE))
            .unwrap_or(Decimal::ONE);

        let adjusted_value = max_position_value * vol_adjustment * correlation_adjustment;
        let quantity = adjusted_value.min(max_position_value) / price;

        debug!(
            capital = %capital,
            price = %price,
            volatility,
            quantity = %quantity,
            "Sized position"
        );

        Ok(quantity.max(Decimal::ZERO))
    }

    /// Whether the stop-loss threshold has been breached.
    ///
    /// Long positions stop out strictly below entry * (1 - fraction);
    /// short positions strictly above entry * (1 + fraction). A zero
    /// position sign never triggers.
    pub fn check_stop_loss(
        &self,
        entry_price: Decimal,
        current_price: Decimal,
        position_sign: i8,
    ) -> bool {
        if position_sign > 0 {
            current_price < entry_price * (Decimal::ONE - self.config.stop_loss_fraction)
        } else if position_sign < 0 {
            current_price > entry_price * (Decimal::ONE + self.config.stop_loss_fraction)
        } else {
            false
        }
    }

    /// Whether the take-profit threshold has been breached. Mirror image
    /// of [`check_stop_loss`](Self::check_stop_loss) on the profitable
    /// side.
    pub fn check_take_profit(
        &self,
        entry_price: Decimal,
        current_price: Decimal,
        position_sign: i8,
    ) -> bool {
        if position_sign > 0 {
            current_price > entry_price * (Decimal::ONE + self.config.take_profit_fraction)
        } else if position_sign < 0 {
            current_price < entry_price * (Decimal::ONE - self.config.take_profit_fraction)
        } else {
            false
        }
    }

    /// Binding trailing-stop level for a long position: the tightest of
    /// the ATR stop below the current price, the fixed fractional stop
    /// from entry, and the fractional stop from the running high.
    pub fn calculate_trailing_stop(
        &self,
        entry_price: Decimal,
        current_price: Decimal,
        running_high: Decimal,
        atr: Decimal,
        atr_multiplier: Decimal,
    ) -> Decimal {
        let atr_stop = current_price - atr * atr_multiplier;
        let initial_stop = entry_price * (Decimal::ONE - self.config.stop_loss_fraction);
        let trailing_stop = running_high * (Decimal::ONE - self.config.stop_loss_fraction);

        atr_stop.max(initial_stop).max(trailing_stop)
    }

    /// Assess portfolio risk at the given weights.
    ///
    /// Computes annualized volatility and Sharpe from the returns matrix
    /// (rows = periods, columns = assets). When volatility exceeds the
    /// configured ceiling, asks the optimizer for replacement weights and
    /// flags the rebalance; otherwise only reports the current risk.
    pub fn update_portfolio_risk(
        &self,
        position_weights: &[f64],
        returns: &Array2<f64>,
    ) -> EngineResult<RiskAssessment> {
        if position_weights.len() != returns.ncols() {
            return Err(EngineError::invalid_input(format!(
                "{} weights supplied for {} assets",
                position_weights.len(),
                returns.ncols()
            )));
        }
        if position_weights.iter().any(|w| !w.is_finite()) {
            return Err(EngineError::invalid_input(
                "position weights contain non-finite values",
            ));
        }

        let stats = ReturnStatistics::from_returns(returns)?;
        let weights = Array1::from_vec(position_weights.to_vec());

        let current_risk = stats.portfolio_volatility(&weights);
        let portfolio_return = stats.portfolio_return(&weights);
        let sharpe_ratio = if current_risk > 0.0 {
            (portfolio_return - self.config.risk_free_rate) / current_risk
        } else {
            0.0
        };

        if current_risk > self.config.max_drawdown {
            warn!(
                current_risk,
                ceiling = self.config.max_drawdown,
                "Portfolio volatility above ceiling, suggesting rebalance"
            );
            let result = self
                .optimizer
                .optimize_with_stats(&stats, Objective::MaxSharpe);

            return Ok(RiskAssessment {
                rebalance_needed: true,
                current_risk,
                sharpe_ratio,
                optimal_weights: Some(result.weights),
            });
        }

        Ok(RiskAssessment {
            rebalance_needed: false,
            current_risk,
            sharpe_ratio,
            optimal_weights: None,
        })
    }

    /// Notional cap for a single position at the given capital.
    pub fn max_position_value(&self, capital: Decimal) -> Decimal {
        capital * self.config.max_position_fraction
    }
}

impl Default for RiskSizer {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rust_decimal_macros::dec;

    fn sizer() -> RiskSizer {
        RiskSizer::default()
    }

    #[test]
    fn test_position_size_respects_cap() {
        let s = sizer();

        // Zero volatility: full 10% cap at price 100 -> 100 units
        let qty = s
            .calculate_position_size(dec!(100000), dec!(100), 0.0, None)
            .unwrap();
        assert_eq!(qty, dec!(100));

        // Any volatility shrinks the size below the cap
        let qty_vol = s
            .calculate_position_size(dec!(100000), dec!(100), 0.5, None)
            .unwrap();
        assert!(qty_vol < qty);
        assert!(qty_vol > Decimal::ZERO);
    }

    #[test]
    fn test_position_size_monotone_in_volatility() {
        let s = sizer();
        let mut last = Decimal::MAX;

        for vol in [0.0, 0.1, 0.5, 1.0, 3.0, 10.0] {
            let qty = s
                .calculate_position_size(dec!(50000), dec!(25), vol, None)
                .unwrap();
            assert!(qty >= Decimal::ZERO);
            assert!(qty <= last, "size must not grow with volatility");
            last = qty;
        }
    }

    #[test]
    fn test_correlation_shrinks_size() {
        let s = sizer();

        let base = s
            .calculate_position_size(dec!(10000), dec!(10), 0.2, None)
            .unwrap();
        let correlated = s
            .calculate_position_size(dec!(10000), dec!(10), 0.2, Some(0.8))
            .unwrap();
        let anti_correlated = s
            .calculate_position_size(dec!(10000), dec!(10), 0.2, Some(-0.8))
            .unwrap();

        assert!(correlated < base);
        // |correlation| matters, not its sign
        assert_eq!(correlated, anti_correlated);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let s = sizer();

        assert!(s
            .calculate_position_size(dec!(1000), dec!(0), 0.1, None)
            .is_err());
        assert!(s
            .calculate_position_size(dec!(1000), dec!(10), f64::NAN, None)
            .is_err());
        assert!(s
            .calculate_position_size(dec!(1000), dec!(10), -0.1, None)
            .is_err());
        assert!(s
            .calculate_position_size(dec!(1000), dec!(10), 0.1, Some(1.5))
            .is_err());
    }

    #[test]
    fn test_stop_loss_boundary() {
        let s = sizer(); // stop_loss_fraction = 0.02 -> long threshold 98

        assert!(s.check_stop_loss(dec!(100), dec!(97.99), 1));
        assert!(!s.check_stop_loss(dec!(100), dec!(98.01), 1));
        // Exactly at the threshold does not trigger
        assert!(!s.check_stop_loss(dec!(100), dec!(98), 1));

        // Short side mirrors above entry
        assert!(s.check_stop_loss(dec!(100), dec!(102.01), -1));
        assert!(!s.check_stop_loss(dec!(100), dec!(101.99), -1));

        // Flat never triggers
        assert!(!s.check_stop_loss(dec!(100), dec!(50), 0));
    }

    #[test]
    fn test_take_profit_boundary() {
        let s = sizer(); // take_profit_fraction = 0.05

        assert!(s.check_take_profit(dec!(100), dec!(105.01), 1));
        assert!(!s.check_take_profit(dec!(100), dec!(104.99), 1));
        assert!(s.check_take_profit(dec!(100), dec!(94.99), -1));
        assert!(!s.check_take_profit(dec!(100), dec!(95.01), -1));
    }

    #[test]
    fn test_trailing_stop_is_max_of_three_floors() {
        let s = sizer();

        // ATR stop: 110 - 1.5*2 = 107; entry stop: 98; high stop: 112*0.98 = 109.76
        let level = s.calculate_trailing_stop(dec!(100), dec!(110), dec!(112), dec!(1.5), dec!(2));
        assert_eq!(level, dec!(109.76));

        // Wide ATR band and a low high-water mark leave the entry stop binding
        let level = s.calculate_trailing_stop(dec!(100), dec!(101), dec!(100), dec!(5), dec!(2));
        assert_eq!(level, dec!(98.00));
    }

    #[test]
    fn test_portfolio_risk_flags_rebalance() {
        let config = RiskConfig {
            max_drawdown: 0.0001, // Any realistic vol breaches this
            ..RiskConfig::default()
        };
        let s = RiskSizer::new(config);

        let returns = array![
            [0.01, -0.02],
            [-0.015, 0.025],
            [0.02, -0.01],
            [-0.01, 0.015],
        ];

        let assessment = s.update_portfolio_risk(&[0.5, 0.5], &returns).unwrap();
        assert!(assessment.rebalance_needed);
        assert!(assessment.current_risk > 0.0);

        let weights = assessment.optimal_weights.expect("suggested weights");
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_portfolio_risk_quiet_below_ceiling() {
        let config = RiskConfig {
            max_drawdown: 10.0, // Effectively unbounded
            ..RiskConfig::default()
        };
        let s = RiskSizer::new(config);

        let returns = array![
            [0.001, -0.002],
            [-0.0015, 0.0025],
            [0.002, -0.001],
            [-0.001, 0.0015],
        ];

        let assessment = s.update_portfolio_risk(&[0.6, 0.4], &returns).unwrap();
        assert!(!assessment.rebalance_needed);
        assert!(assessment.optimal_weights.is_none());
    }

    #[test]
    fn test_weight_count_mismatch_rejected() {
        let s = sizer();
        let returns = array![[0.01, -0.02], [-0.015, 0.025]];
        assert!(s.update_portfolio_risk(&[1.0], &returns).is_err());
    }
}
