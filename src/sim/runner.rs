//! The bar-by-bar simulation loop.
//!
//! Replays bars chronologically, turning signals into sized orders and
//! enforcing the per-symbol position state machine:
//!
//! ```text
//! FLAT --signal != 0--> OPEN(sign) --stop/take/opposing--> FLAT
//! ```
//!
//! While OPEN, exit conditions are evaluated in fixed priority order:
//! stop-loss, take-profit, opposing signal. The loop holds at most one
//! open position per symbol; a second entry signal while OPEN is ignored
//! until the position is flat again. This is a deliberate policy choice:
//! the execution engine itself supports incremental averaging for direct
//! callers, but anchoring exits to a single entry keeps the replay
//! unambiguous.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::data::returns_matrix;
use crate::error::{EngineError, EngineResult};
use crate::execution::{ExecutionEngine, OrderRequest};
use crate::metrics::PerformanceMetrics;
use crate::models::{Bar, OrderSide};
use crate::risk::{Objective, PortfolioOptimizer, RiskSizer};

use super::{PortfolioReport, SimulationConfig, SimulationReport};

/// One symbol's aligned inputs for a portfolio run.
#[derive(Debug, Clone, Copy)]
pub struct SymbolRun<'a> {
    pub symbol: &'a str,
    pub bars: &'a [Bar],
    pub signals: &'a [i8],
}

/// Per-symbol position state. `running_high` is the loop-owned
/// high-water mark the trailing stop anchors to.
#[derive(Debug, Clone, Copy)]
enum PositionState {
    Flat,
    Open {
        sign: i8,
        entry_price: Decimal,
        running_high: Decimal,
    },
}

/// Top-level simulation driver.
pub struct SimulationLoop {
    config: SimulationConfig,
    sizer: RiskSizer,
}

impl SimulationLoop {
    /// Create a loop with the given simulation config and risk sizer.
    pub fn new(config: SimulationConfig, sizer: RiskSizer) -> Self {
        Self { config, sizer }
    }

    /// Access the active configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Replay one symbol through its bars and index-aligned signals.
    pub fn run(
        &self,
        symbol: &str,
        bars: &[Bar],
        signals: &[i8],
    ) -> EngineResult<SimulationReport> {
        if bars.is_empty() {
            return Err(EngineError::data_feed(format!("no bars for {symbol}")));
        }
        if bars.len() != signals.len() {
            return Err(EngineError::data_feed(format!(
                "{} bars but {} signals for {symbol}",
                bars.len(),
                signals.len()
            )));
        }
        if self.config.initial_capital <= Decimal::ZERO {
            return Err(EngineError::invalid_input(
                "initial capital must be positive",
            ));
        }

        let mut engine =
            ExecutionEngine::new(self.config.commission_rate, self.config.slippage_rate);
        let mut capital = self.config.initial_capital;
        let mut state = PositionState::Flat;

        info!(
            symbol,
            bars = bars.len(),
            capital = %capital,
            "Starting replay"
        );

        for (bar, &signal) in bars.iter().zip(signals) {
            let price = bar.close;

            match state {
                PositionState::Flat => {
                    if signal == 0 {
                        continue;
                    }

                    // Leading bars without a volatility figure are the
                    // indicator warmup window; skip them.
                    let Some(volatility) = bar.indicator(&self.config.volatility_column) else {
                        debug!(symbol, ts = %bar.timestamp, "No volatility yet, skipping entry");
                        continue;
                    };

                    let quantity =
                        self.sizer
                            .calculate_position_size(capital, price, volatility, None)?;
                    if quantity <= Decimal::ZERO {
                        debug!(symbol, ts = %bar.timestamp, "Sized to zero, skipping entry");
                        continue;
                    }

                    let side = if signal > 0 {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    };
                    let order = engine.create_order(
                        OrderRequest::market(symbol, side, quantity, price),
                        bar.timestamp,
                    )?;

                    let commission = engine
                        .get_trade_history()
                        .last()
                        .map(|t| t.commission)
                        .unwrap_or(Decimal::ZERO);
                    capital -= commission;

                    info!(
                        symbol,
                        side = side.as_str(),
                        quantity = %order.filled_quantity,
                        price = %order.filled_price,
                        "Opened position"
                    );

                    state = PositionState::Open {
                        sign: signal,
                        entry_price: order.filled_price,
                        running_high: price,
                    };
                }
                PositionState::Open {
                    sign,
                    entry_price,
                    running_high,
                } => {
                    let running_high = running_high.max(price);

                    // Fixed priority: stop-loss, take-profit, opposing
                    // signal. The trailing stop, when enabled, belongs to
                    // the stop family.
                    let stop_hit = self.sizer.check_stop_loss(entry_price, price, sign)
                        || self.trailing_stop_hit(bar, sign, entry_price, price, running_high);
                    let take_hit = self.sizer.check_take_profit(entry_price, price, sign);
                    let opposing = signal != 0 && signal == -sign;

                    let exit_reason = if stop_hit {
                        Some("stop_loss")
                    } else if take_hit {
                        Some("take_profit")
                    } else if opposing {
                        Some("opposing_signal")
                    } else {
                        None
                    };

                    let Some(reason) = exit_reason else {
                        state = PositionState::Open {
                            sign,
                            entry_price,
                            running_high,
                        };
                        continue;
                    };

                    let quantity = engine
                        .get_position(symbol)
                        .map(|p| p.abs_quantity())
                        .unwrap_or(Decimal::ZERO);
                    if quantity > Decimal::ZERO {
                        let side = if sign > 0 {
                            OrderSide::Sell
                        } else {
                            OrderSide::Buy
                        };
                        engine.create_order(
                            OrderRequest::market(symbol, side, quantity, price),
                            bar.timestamp,
                        )?;

                        let realized = engine
                            .get_trade_history()
                            .last()
                            .map(|t| t.realized_pnl)
                            .unwrap_or(Decimal::ZERO);
                        capital += realized;

                        info!(
                            symbol,
                            reason,
                            price = %price,
                            realized = %realized,
                            "Closed position"
                        );
                    }

                    state = PositionState::Flat;
                }
            }
        }

        if let Some(open) = engine.get_position(symbol) {
            let last_close = bars[bars.len() - 1].close;
            warn!(
                symbol,
                quantity = %open.quantity,
                unrealized = %open.unrealized_pnl(last_close),
                "Replay ended with an open position"
            );
        }

        Ok(self.build_report(symbol, bars, capital, &engine))
    }

    /// Whether the ATR trailing stop is enabled, computable on this bar,
    /// and breached. Long positions only; shorts fall back to the fixed
    /// stop.
    fn trailing_stop_hit(
        &self,
        bar: &Bar,
        sign: i8,
        entry_price: Decimal,
        price: Decimal,
        running_high: Decimal,
    ) -> bool {
        if !self.config.use_trailing_stop || sign <= 0 {
            return false;
        }
        let Some(atr) = bar
            .indicator(&self.config.atr_column)
            .and_then(|v| Decimal::try_from(v).ok())
        else {
            return false;
        };

        let level = self.sizer.calculate_trailing_stop(
            entry_price,
            price,
            running_high,
            atr,
            self.sizer.config().atr_multiplier,
        );
        price < level
    }

    /// Aggregate the engine's ledger into a report.
    fn build_report(
        &self,
        symbol: &str,
        bars: &[Bar],
        final_capital: Decimal,
        engine: &ExecutionEngine,
    ) -> SimulationReport {
        let trades = engine.get_trade_history().to_vec();
        let pnls: Vec<Decimal> = trades.iter().map(|t| t.realized_pnl).collect();

        let total_trades = trades.len();
        let profitable_trades = trades.iter().filter(|t| t.is_profitable()).count();
        let win_rate = if total_trades > 0 {
            profitable_trades as f64 / total_trades as f64
        } else {
            0.0
        };
        let total_pnl: Decimal = pnls.iter().copied().sum();
        let total_return =
            (final_capital - self.config.initial_capital) / self.config.initial_capital;

        SimulationReport {
            symbol: symbol.to_string(),
            initial_capital: self.config.initial_capital,
            final_capital,
            total_return,
            total_trades,
            profitable_trades,
            win_rate,
            total_pnl,
            total_commission: engine.total_commission(),
            start_time: bars[0].timestamp,
            end_time: bars[bars.len() - 1].timestamp,
            trades,
            metrics: PerformanceMetrics::from_pnls(&pnls),
        }
    }

    /// Replay several symbols with capital allocated by the portfolio
    /// optimizer.
    ///
    /// Each symbol runs against its own execution engine and its slice
    /// of the initial capital; only the final ledgers are merged. When
    /// the optimizer fails to converge the split falls back to equal
    /// weights, an explicit policy of this driver rather than of the
    /// optimizer.
    pub fn run_portfolio(
        &self,
        runs: &[SymbolRun<'_>],
        objective: Objective,
    ) -> EngineResult<PortfolioReport> {
        if runs.is_empty() {
            return Err(EngineError::data_feed("no symbols to run"));
        }

        let (weights, converged) = if runs.len() == 1 {
            (vec![1.0], true)
        } else {
            let bars: Vec<&[Bar]> = runs.iter().map(|r| r.bars).collect();
            let returns = returns_matrix(&bars)?;
            let optimizer = PortfolioOptimizer::new(self.sizer.config().risk_free_rate);
            let result = optimizer.optimize(&returns, objective)?;

            if result.converged {
                (result.weights, true)
            } else {
                warn!(
                    objective = objective.as_str(),
                    "Optimizer did not converge; falling back to equal weights"
                );
                (vec![1.0 / runs.len() as f64; runs.len()], false)
            }
        };

        let mut symbol_reports = Vec::with_capacity(runs.len());
        for (run, &weight) in runs.iter().zip(&weights) {
            let allocation = self.config.initial_capital
                * Decimal::try_from(weight).unwrap_or(Decimal::ZERO);
            if allocation <= Decimal::ZERO {
                debug!(symbol = run.symbol, "Zero allocation, skipping symbol");
                continue;
            }

            let config = SimulationConfig {
                initial_capital: allocation,
                ..self.config.clone()
            };
            let runner = SimulationLoop::new(config, RiskSizer::new(self.sizer.config().clone()));
            symbol_reports.push(runner.run(run.symbol, run.bars, run.signals)?);
        }

        let initial_capital: Decimal = symbol_reports.iter().map(|r| r.initial_capital).sum();
        let final_capital: Decimal = symbol_reports.iter().map(|r| r.final_capital).sum();
        let total_return = if initial_capital > Decimal::ZERO {
            (final_capital - initial_capital) / initial_capital
        } else {
            Decimal::ZERO
        };

        let mut trades: Vec<_> = symbol_reports
            .iter()
            .flat_map(|r| r.trades.iter().cloned())
            .collect();
        trades.sort_by_key(|t| t.timestamp);

        Ok(PortfolioReport {
            weights: runs
                .iter()
                .zip(&weights)
                .map(|(r, &w)| (r.symbol.to_string(), w))
                .collect(),
            weights_converged: converged,
            symbol_reports,
            initial_capital,
            final_capital,
            total_return,
            trades,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskConfig;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn make_bar(day: i64, close: Decimal) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        let mut bar = Bar::new(ts, close, close, close, close, dec!(1000));
        bar.indicators.insert("volatility".to_string(), 0.0);
        bar
    }

    fn loop_with(
        commission: Decimal,
        slippage: Decimal,
        risk: RiskConfig,
    ) -> SimulationLoop {
        let config = SimulationConfig {
            initial_capital: dec!(100000),
            commission_rate: commission,
            slippage_rate: slippage,
            ..SimulationConfig::default()
        };
        SimulationLoop::new(config, RiskSizer::new(risk))
    }

    #[test]
    fn test_entry_exit_accounting() {
        // Entry sized to 10 units at 100 (1% of 100k capital), exit at
        // 110 on take-profit: entry commission 1.0, net realized
        // (110-100)*10 - (100+110)*10*0.001 = 97.9, final 100096.9.
        let risk = RiskConfig {
            max_position_fraction: dec!(0.01),
            ..RiskConfig::default()
        };
        let sim = loop_with(dec!(0.001), Decimal::ZERO, risk);

        let bars = vec![make_bar(0, dec!(100)), make_bar(1, dec!(110))];
        let signals = vec![1, 0];

        let report = sim.run("BTCUSDT", &bars, &signals).unwrap();

        assert_eq!(report.total_trades, 2);
        assert_eq!(report.profitable_trades, 1);
        assert!((report.win_rate - 0.5).abs() < 1e-9);
        assert_eq!(report.trades[0].commission, dec!(1.0));
        assert_eq!(report.trades[1].realized_pnl, dec!(97.9));
        assert_eq!(report.final_capital, dec!(100096.9));
        assert_eq!(report.total_pnl, dec!(97.9));
        assert_eq!(
            report.total_return,
            dec!(96.9) / dec!(100000)
        );
    }

    #[test]
    fn test_stop_loss_exit_priority() {
        // Price collapses below the 2% stop while the signal still says
        // long: the stop fires, not the signal.
        let sim = loop_with(Decimal::ZERO, Decimal::ZERO, RiskConfig::default());

        let bars = vec![
            make_bar(0, dec!(100)),
            make_bar(1, dec!(97.99)),
            make_bar(2, dec!(97)),
        ];
        let signals = vec![1, 1, 1];

        let report = sim.run("BTCUSDT", &bars, &signals).unwrap();

        // Entry, stop exit on bar 1; bar 2's long signal re-enters
        assert_eq!(report.total_trades, 3);
        assert!(report.trades[1].realized_pnl < Decimal::ZERO);
        assert_eq!(report.trades[1].timestamp, bars[1].timestamp);
    }

    #[test]
    fn test_opposing_signal_exit() {
        // Stops wide open so only the opposing signal can close
        let risk = RiskConfig {
            stop_loss_fraction: dec!(0.9),
            take_profit_fraction: dec!(0.9),
            ..RiskConfig::default()
        };
        let sim = loop_with(Decimal::ZERO, Decimal::ZERO, risk);

        let bars = vec![
            make_bar(0, dec!(100)),
            make_bar(1, dec!(101)),
            make_bar(2, dec!(102)),
        ];
        let signals = vec![1, 1, -1];

        let report = sim.run("BTCUSDT", &bars, &signals).unwrap();

        assert_eq!(report.total_trades, 2);
        assert_eq!(report.trades[1].timestamp, bars[2].timestamp);
        assert!(report.trades[1].realized_pnl > Decimal::ZERO);
    }

    #[test]
    fn test_second_entry_signal_ignored_while_open() {
        let risk = RiskConfig {
            stop_loss_fraction: dec!(0.9),
            take_profit_fraction: dec!(0.9),
            ..RiskConfig::default()
        };
        let sim = loop_with(Decimal::ZERO, Decimal::ZERO, risk);

        // Repeated long signals while OPEN must not add to the position
        let bars = vec![
            make_bar(0, dec!(100)),
            make_bar(1, dec!(101)),
            make_bar(2, dec!(102)),
            make_bar(3, dec!(103)),
        ];
        let signals = vec![1, 1, 1, 1];

        let report = sim.run("BTCUSDT", &bars, &signals).unwrap();

        // Only the single opening fill; position still open at the end
        assert_eq!(report.total_trades, 1);
    }

    #[test]
    fn test_short_entry_and_stop() {
        let sim = loop_with(Decimal::ZERO, Decimal::ZERO, RiskConfig::default());

        // Short at 100; price rises through the 2% stop at bar 1
        let bars = vec![make_bar(0, dec!(100)), make_bar(1, dec!(102.01))];
        let signals = vec![-1, 0];

        let report = sim.run("BTCUSDT", &bars, &signals).unwrap();

        assert_eq!(report.total_trades, 2);
        assert_eq!(report.trades[0].side, OrderSide::Sell);
        assert_eq!(report.trades[1].side, OrderSide::Buy);
        assert!(report.trades[1].realized_pnl < Decimal::ZERO);
    }

    #[test]
    fn test_warmup_bars_without_volatility_skip_entry() {
        let sim = loop_with(Decimal::ZERO, Decimal::ZERO, RiskConfig::default());

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bare = Bar::new(ts, dec!(100), dec!(100), dec!(100), dec!(100), dec!(1000));
        let bars = vec![bare, make_bar(1, dec!(100))];
        let signals = vec![1, 1];

        let report = sim.run("BTCUSDT", &bars, &signals).unwrap();

        // Entry only happens once volatility is available
        assert_eq!(report.total_trades, 1);
        assert_eq!(report.trades[0].timestamp, bars[1].timestamp);
    }

    #[test]
    fn test_misaligned_signals_rejected() {
        let sim = loop_with(Decimal::ZERO, Decimal::ZERO, RiskConfig::default());
        let bars = vec![make_bar(0, dec!(100))];
        let err = sim.run("BTCUSDT", &bars, &[1, 0]).unwrap_err();
        assert!(matches!(err, EngineError::DataFeed { .. }));
    }

    #[test]
    fn test_trailing_stop_exit_from_running_high() {
        let risk = RiskConfig {
            stop_loss_fraction: dec!(0.05),  // Fixed stop at 95
            take_profit_fraction: dec!(0.9), // Take-profit out of reach
            ..RiskConfig::default()
        };
        let config = SimulationConfig {
            initial_capital: dec!(100000),
            commission_rate: Decimal::ZERO,
            slippage_rate: Decimal::ZERO,
            use_trailing_stop: true,
            ..SimulationConfig::default()
        };
        let sim = SimulationLoop::new(config, RiskSizer::new(risk));

        let mut bars = vec![
            make_bar(0, dec!(100)), // Entry
            make_bar(1, dec!(120)), // Pushes the high-water mark up
            make_bar(2, dec!(110)), // Above the fixed stop, below 120 * 0.95
        ];
        for bar in &mut bars {
            bar.indicators.insert("atr".to_string(), 1.0);
        }
        let signals = vec![1, 0, 0];

        let report = sim.run("BTCUSDT", &bars, &signals).unwrap();

        // At bar 2 the binding floor is the running-high stop
        // 120 * 0.95 = 114 > 110, so the position closes in profit even
        // though neither the fixed stop nor the take-profit fired.
        assert_eq!(report.total_trades, 2);
        assert_eq!(report.trades[1].timestamp, bars[2].timestamp);
        assert!(report.trades[1].realized_pnl > Decimal::ZERO);
    }

    #[test]
    fn test_capital_reconciles_with_ledger() {
        // Over several round trips: final capital must equal initial
        // capital plus the ledger's net realized PnL minus the
        // commissions paid on opening fills (closing fills already net
        // their own and their entry's commission into realized PnL).
        let sim = loop_with(dec!(0.002), Decimal::ZERO, RiskConfig::default());

        let bars = vec![
            make_bar(0, dec!(100)),
            make_bar(1, dec!(104)),   // Take profit (> 105? no) stays
            make_bar(2, dec!(106)),   // Take profit fires
            make_bar(3, dec!(100)),
            make_bar(4, dec!(97.5)),  // Stop fires after re-entry
            make_bar(5, dec!(100)),
        ];
        let signals = vec![1, 1, 0, 1, 0, 0];

        let report = sim.run("BTCUSDT", &bars, &signals).unwrap();
        assert!(report.total_trades >= 4);

        let opening_commissions: Decimal = report
            .trades
            .iter()
            .filter(|t| t.realized_pnl == Decimal::ZERO)
            .map(|t| t.commission)
            .sum();

        assert_eq!(
            report.final_capital,
            report.initial_capital + report.total_pnl - opening_commissions
        );
    }

    #[test]
    fn test_portfolio_run_splits_capital_and_merges_ledgers() {
        let risk = RiskConfig {
            stop_loss_fraction: dec!(0.9),
            take_profit_fraction: dec!(0.01),
            ..RiskConfig::default()
        };
        let sim = loop_with(Decimal::ZERO, Decimal::ZERO, risk);

        // Two symbols with slightly different drifts; both enter on the
        // first bar and take profit on the later climb
        let bars_a = vec![
            make_bar(0, dec!(100)),
            make_bar(1, dec!(101)),
            make_bar(2, dec!(104)),
        ];
        let bars_b = vec![
            make_bar(0, dec!(50)),
            make_bar(1, dec!(50.2)),
            make_bar(2, dec!(52)),
        ];
        let signals = vec![1, 1, 0];

        let runs = [
            SymbolRun {
                symbol: "AAA",
                bars: &bars_a,
                signals: &signals,
            },
            SymbolRun {
                symbol: "BBB",
                bars: &bars_b,
                signals: &signals,
            },
        ];

        let report = sim.run_portfolio(&runs, Objective::MinVariance).unwrap();

        // Weights cover both symbols and sum to 1
        let weight_sum: f64 = report.weights.iter().map(|(_, w)| w).sum();
        assert!((weight_sum - 1.0).abs() < 1e-6);
        assert_eq!(report.symbol_reports.len(), 2);

        // Capital is conserved across the split
        assert_eq!(
            report.initial_capital,
            report.symbol_reports.iter().map(|r| r.initial_capital).sum()
        );

        // Merged ledger is time-ordered
        for pair in report.trades.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        assert!(!report.trades.is_empty());
    }
}
