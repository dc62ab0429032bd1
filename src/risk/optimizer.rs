//! Mean-variance portfolio optimization.
//!
//! Solves for long-only allocation weights (each in [0, 1], summing to 1)
//! over a matrix of periodic asset returns, under one of three objectives.
//! The solver is a projected gradient ascent from the equal-weight start:
//! each step moves along the analytic gradient of the objective, then
//! projects back onto the constraint set by clamping and renormalizing.
//! Non-convergence is reported through a flag, never as an error; the
//! caller owns any fallback policy.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Trading periods per year used for annualization.
pub const ANNUALIZATION_FACTOR: f64 = 252.0;

/// Optimization objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Maximize (annualized return - risk-free rate) / annualized volatility
    MaxSharpe,
    /// Minimize annualized portfolio volatility, ignoring expected return
    MinVariance,
    /// Maximize weighted individual volatilities / portfolio volatility
    MaxDiversification,
}

impl Objective {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "min_var" | "min_variance" => Self::MinVariance,
            "max_div" | "max_diversification" => Self::MaxDiversification,
            _ => Self::MaxSharpe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::MaxSharpe => "max_sharpe",
            Objective::MinVariance => "min_variance",
            Objective::MaxDiversification => "max_diversification",
        }
    }
}

/// Annualized summary statistics of a returns matrix.
///
/// Precomputed once so the objective functions are pure in
/// (statistics, weights).
#[derive(Debug, Clone)]
pub struct ReturnStatistics {
    /// Annualized mean return per asset
    pub mean: Array1<f64>,

    /// Annualized covariance matrix
    pub covariance: Array2<f64>,

    /// Annualized volatility per asset (sqrt of covariance diagonal)
    pub asset_vols: Array1<f64>,
}

impl ReturnStatistics {
    /// Compute statistics from a matrix of periodic returns
    /// (rows = periods, columns = assets).
    ///
    /// The caller must already have cleaned and aligned the series; any
    /// non-finite entry or a matrix smaller than 2x2 is rejected.
    pub fn from_returns(returns: &Array2<f64>) -> EngineResult<Self> {
        let periods = returns.nrows();
        let assets = returns.ncols();

        if assets < 2 {
            return Err(EngineError::invalid_input(format!(
                "optimization needs at least 2 assets, got {assets}"
            )));
        }
        if periods < 2 {
            return Err(EngineError::invalid_input(format!(
                "optimization needs at least 2 return periods, got {periods}"
            )));
        }
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(EngineError::invalid_input(
                "returns matrix contains non-finite values",
            ));
        }

        let mut period_mean = Array1::zeros(assets);
        for j in 0..assets {
            period_mean[j] = returns.column(j).sum() / periods as f64;
        }
        let mean = &period_mean * ANNUALIZATION_FACTOR;

        // Sample covariance (n-1 denominator), annualized
        let mut covariance = Array2::zeros((assets, assets));
        for i in 0..assets {
            for j in i..assets {
                let mut acc = 0.0;
                for t in 0..periods {
                    acc += (returns[[t, i]] - period_mean[i]) * (returns[[t, j]] - period_mean[j]);
                }
                let cov = acc / (periods - 1) as f64 * ANNUALIZATION_FACTOR;
                covariance[[i, j]] = cov;
                covariance[[j, i]] = cov;
            }
        }

        let asset_vols = covariance.diag().mapv(f64::sqrt);

        Ok(Self {
            mean,
            covariance,
            asset_vols,
        })
    }

    /// Annualized portfolio volatility for a weight vector.
    pub fn portfolio_volatility(&self, weights: &Array1<f64>) -> f64 {
        weights.dot(&self.covariance.dot(weights)).max(0.0).sqrt()
    }

    /// Annualized portfolio return for a weight vector.
    pub fn portfolio_return(&self, weights: &Array1<f64>) -> f64 {
        weights.dot(&self.mean)
    }
}

/// Result of one optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Allocation weights, one per asset, each in [0, 1], summing to 1
    pub weights: Vec<f64>,

    /// Achieved objective value (Sharpe ratio, volatility, or
    /// diversification ratio depending on the objective)
    pub objective_value: f64,

    /// Whether the solver reached its tolerance within the iteration
    /// budget. When false the weights are the best point found; the
    /// caller decides whether to use them or fall back.
    pub converged: bool,
}

/// Constrained mean-variance optimizer.
pub struct PortfolioOptimizer {
    risk_free_rate: f64,
    max_iterations: usize,
    learning_rate: f64,
    tolerance: f64,
}

impl Default for PortfolioOptimizer {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl PortfolioOptimizer {
    /// Create an optimizer with the given annual risk-free rate.
    pub fn new(risk_free_rate: f64) -> Self {
        Self {
            risk_free_rate,
            max_iterations: 10_000,
            learning_rate: 0.01,
            tolerance: 1e-8,
        }
    }

    /// Solve for weights over a matrix of periodic returns
    /// (rows = periods, columns = assets).
    pub fn optimize(
        &self,
        returns: &Array2<f64>,
        objective: Objective,
    ) -> EngineResult<OptimizationResult> {
        let stats = ReturnStatistics::from_returns(returns)?;
        Ok(self.optimize_with_stats(&stats, objective))
    }

    /// Solve directly from precomputed statistics.
    pub fn optimize_with_stats(
        &self,
        stats: &ReturnStatistics,
        objective: Objective,
    ) -> OptimizationResult {
        let n_assets = stats.mean.len();
        let mut weights = Array1::from_elem(n_assets, 1.0 / n_assets as f64);
        let mut converged = false;

        for _ in 0..self.max_iterations {
            let Some(gradient) = evaluate_gradient(objective, stats, self.risk_free_rate, &weights)
            else {
                // Degenerate (zero-volatility) portfolio: nothing left to
                // improve along any objective that divides by volatility.
                converged = true;
                break;
            };

            let stepped = &weights + &(gradient * self.learning_rate);
            let projected = project_to_simplex(&stepped);

            let delta = (&projected - &weights)
                .iter()
                .fold(0.0f64, |acc, d| acc.max(d.abs()));
            weights = projected;

            if delta < self.tolerance {
                converged = true;
                break;
            }
        }

        let objective_value = evaluate_value(objective, stats, self.risk_free_rate, &weights);

        OptimizationResult {
            weights: weights.to_vec(),
            objective_value,
            converged,
        }
    }
}

/// Objective value at a weight vector. Each objective reports its natural
/// sign (Sharpe ratio, volatility, diversification ratio).
fn evaluate_value(
    objective: Objective,
    stats: &ReturnStatistics,
    risk_free_rate: f64,
    weights: &Array1<f64>,
) -> f64 {
    let vol = stats.portfolio_volatility(weights);
    match objective {
        Objective::MaxSharpe => {
            if vol > 0.0 {
                (stats.portfolio_return(weights) - risk_free_rate) / vol
            } else {
                0.0
            }
        }
        Objective::MinVariance => vol,
        Objective::MaxDiversification => {
            if vol > 0.0 {
                weights.dot(&stats.asset_vols) / vol
            } else {
                0.0
            }
        }
    }
}

/// Ascent gradient of the objective at a weight vector, or None when the
/// portfolio volatility is too small to differentiate through.
fn evaluate_gradient(
    objective: Objective,
    stats: &ReturnStatistics,
    risk_free_rate: f64,
    weights: &Array1<f64>,
) -> Option<Array1<f64>> {
    let variance = weights.dot(&stats.covariance.dot(weights)).max(0.0);
    let vol = variance.sqrt();
    if vol < 1e-10 {
        return None;
    }
    let sigma_w = stats.covariance.dot(weights);

    match objective {
        Objective::MaxSharpe => {
            // d/dw [(mu.w - rf) / vol]
            let excess = stats.portfolio_return(weights) - risk_free_rate;
            Some(&stats.mean / vol - &(sigma_w * (excess / (variance * vol))))
        }
        Objective::MinVariance => {
            // Ascent on -vol
            Some(sigma_w * (-1.0 / vol))
        }
        Objective::MaxDiversification => {
            // d/dw [(v.w) / vol]
            let weighted_vols = weights.dot(&stats.asset_vols);
            Some(&stats.asset_vols / vol - &(sigma_w * (weighted_vols / (variance * vol))))
        }
    }
}

/// Project a weight vector onto the feasible set: clamp each weight to
/// [0, 1], then renormalize to sum to 1. An all-zero vector falls back to
/// equal weights.
fn project_to_simplex(weights: &Array1<f64>) -> Array1<f64> {
    let mut clamped = weights.mapv(|w| w.clamp(0.0, 1.0));
    let sum: f64 = clamped.sum();
    if sum > 0.0 {
        clamped /= sum;
        clamped
    } else {
        Array1::from_elem(weights.len(), 1.0 / weights.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Returns matrix with one calm and two noisy assets.
    fn sample_returns() -> Array2<f64> {
        array![
            [0.001, 0.012, -0.020],
            [0.002, -0.015, 0.025],
            [0.0005, 0.020, -0.015],
            [0.0015, -0.010, 0.030],
            [0.001, 0.018, -0.022],
            [0.002, -0.012, 0.028],
            [0.0008, 0.016, -0.018],
            [0.0012, -0.014, 0.024],
        ]
    }

    fn assert_valid_weights(weights: &[f64]) {
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "weights sum to {sum}");
        for &w in weights {
            assert!((-1e-9..=1.0 + 1e-9).contains(&w), "weight {w} out of bounds");
        }
    }

    #[test]
    fn test_weights_valid_for_all_objectives() {
        let returns = sample_returns();
        let optimizer = PortfolioOptimizer::default();

        for objective in [
            Objective::MaxSharpe,
            Objective::MinVariance,
            Objective::MaxDiversification,
        ] {
            let result = optimizer.optimize(&returns, objective).unwrap();
            assert_valid_weights(&result.weights);
        }
    }

    #[test]
    fn test_min_variance_prefers_calm_asset() {
        let returns = sample_returns();
        let result = PortfolioOptimizer::default()
            .optimize(&returns, Objective::MinVariance)
            .unwrap();

        // Asset 0 has far lower variance than the other two
        assert!(result.weights[0] > result.weights[1]);
        assert!(result.weights[0] > result.weights[2]);
    }

    #[test]
    fn test_diversification_ratio_at_least_one() {
        let returns = sample_returns();
        let result = PortfolioOptimizer::default()
            .optimize(&returns, Objective::MaxDiversification)
            .unwrap();

        assert!(result.objective_value >= 1.0 - 1e-9);
    }

    #[test]
    fn test_single_asset_rejected() {
        let returns = Array2::from_shape_vec((4, 1), vec![0.01, -0.02, 0.005, 0.01]).unwrap();
        let err = PortfolioOptimizer::default()
            .optimize(&returns, Objective::MaxSharpe)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_non_finite_returns_rejected() {
        let mut returns = sample_returns();
        returns[[0, 0]] = f64::NAN;
        let err = PortfolioOptimizer::default()
            .optimize(&returns, Objective::MinVariance)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_objective_parsing() {
        assert_eq!(Objective::from_str("min_var"), Objective::MinVariance);
        assert_eq!(Objective::from_str("MAX_DIV"), Objective::MaxDiversification);
        assert_eq!(Objective::from_str("sharpe"), Objective::MaxSharpe);
    }
}
