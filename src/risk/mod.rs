//! Risk management: position sizing, stop logic, portfolio optimization.

mod config;
mod optimizer;
mod sizer;

pub use config::RiskConfig;
pub use optimizer::{
    Objective, OptimizationResult, PortfolioOptimizer, ReturnStatistics, ANNUALIZATION_FACTOR,
};
pub use sizer::{RiskAssessment, RiskSizer};
