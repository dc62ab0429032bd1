//! Tradesim - bar-replay trading simulator.
//!
//! This crate provides:
//! - A simulated execution engine with slippage, commission, and a full
//!   order/position/ledger lifecycle
//! - Risk-based position sizing with stop-loss, take-profit, and
//!   trailing-stop checks
//! - A mean-variance portfolio optimizer (max Sharpe, min variance, max
//!   diversification ratio)
//! - A deterministic bar-by-bar simulation loop with per-symbol position
//!   state and aggregate performance reporting
//!
//! Market data and live-exchange connectivity live at the edges: the
//! [`data`] module fetches and prepares bar series, and the [`api`]
//! module talks to a live venue. The simulation core itself is
//! synchronous and touches neither.

pub mod api;
pub mod data;
pub mod db;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod models;
pub mod risk;
pub mod signals;
pub mod sim;
