//! Bar-replay simulation: configuration, the event loop, and reports.

mod config;
mod report;
mod runner;

pub use config::SimulationConfig;
pub use report::{PortfolioReport, SimulationReport};
pub use runner::{SimulationLoop, SymbolRun};
