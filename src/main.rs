//! Tradesim
//!
//! Replays trading signals over historical price bars with risk-based
//! position sizing, simulated execution costs, and mean-variance capital
//! allocation across symbols.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tradesim::data::{self, attach_indicators, FeedConfig, KlineFetcher};
use tradesim::db::Database;
use tradesim::models::Bar;
use tradesim::risk::{Objective, PortfolioOptimizer, RiskConfig, RiskSizer};
use tradesim::signals::momentum_signals;
use tradesim::sim::{SimulationConfig, SimulationLoop, SymbolRun};

/// Tradesim CLI.
#[derive(Parser)]
#[command(name = "tradesim")]
#[command(about = "Replay trading strategies over historical bars", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./tradesim.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON settings file overriding the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch bars for a symbol into the local cache
    Fetch {
        /// Instrument symbol, e.g. BTCUSDT
        symbol: String,

        /// Bar interval (exchange notation)
        #[arg(short, long, default_value = "1d")]
        interval: String,

        /// Number of bars to fetch
        #[arg(short = 'n', long, default_value = "500")]
        limit: u32,
    },

    /// Replay a momentum signal over one or more symbols
    Backtest {
        /// Symbols to replay; more than one allocates capital through
        /// the optimizer
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Bar interval (exchange notation)
        #[arg(short, long, default_value = "1d")]
        interval: String,

        /// Number of bars to replay
        #[arg(short = 'n', long, default_value = "500")]
        limit: u32,

        /// Initial capital (overrides settings)
        #[arg(long)]
        capital: Option<f64>,

        /// Commission rate as a fraction, e.g. 0.001 (overrides settings)
        #[arg(long)]
        commission: Option<f64>,

        /// Slippage rate as a fraction (overrides settings)
        #[arg(long)]
        slippage: Option<f64>,

        /// Allocation objective: sharpe, min_var, max_div
        #[arg(short, long, default_value = "sharpe")]
        objective: String,

        /// Momentum lookback in bars
        #[arg(long, default_value = "5")]
        lookback: usize,

        /// Evaluate an ATR trailing stop on long positions
        #[arg(long)]
        trailing: bool,

        /// Use only cached bars, never the network
        #[arg(long)]
        offline: bool,
    },

    /// Solve allocation weights for a set of symbols
    Optimize {
        /// Symbols to allocate across (at least two)
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Bar interval (exchange notation)
        #[arg(short, long, default_value = "1d")]
        interval: String,

        /// Number of bars to base returns on
        #[arg(short = 'n', long, default_value = "500")]
        limit: u32,

        /// Objective: sharpe, min_var, max_div
        #[arg(short, long, default_value = "sharpe")]
        objective: String,
    },

    /// List stored simulation runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Print the active settings as JSON
    Config,
}

/// All tunable settings, loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    simulation: SimulationConfig,
    risk: RiskConfig,
    feed: FeedConfig,
}

impl Settings {
    fn load(path: Option<&PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::load(cli.config.as_ref())?;
    let db = Database::new(&cli.database).await?;

    match cli.command {
        Commands::Fetch {
            symbol,
            interval,
            limit,
        } => {
            let fetcher = KlineFetcher::new(settings.feed.clone())?;
            let bars = fetcher.fetch_bars(&symbol, &interval, limit).await?;
            db.cache_bars(&symbol, &interval, &bars).await?;

            let cached = db.cached_bar_count(&symbol, &interval).await?;
            println!(
                "Fetched {} bars for {} ({} now cached)",
                bars.len(),
                symbol,
                cached
            );
        }

        Commands::Backtest {
            symbols,
            interval,
            limit,
            capital,
            commission,
            slippage,
            objective,
            lookback,
            trailing,
            offline,
        } => {
            let mut sim_config = settings.simulation.clone();
            if let Some(c) = capital {
                sim_config.initial_capital =
                    Decimal::try_from(c).context("Invalid capital value")?;
            }
            if let Some(c) = commission {
                sim_config.commission_rate =
                    Decimal::try_from(c).context("Invalid commission rate")?;
            }
            if let Some(s) = slippage {
                sim_config.slippage_rate =
                    Decimal::try_from(s).context("Invalid slippage rate")?;
            }
            sim_config.use_trailing_stop = trailing;

            // Assemble per-symbol inputs
            let mut inputs: Vec<(String, Vec<Bar>)> = Vec::with_capacity(symbols.len());
            for symbol in &symbols {
                let bars = load_bars(&db, &settings, symbol, &interval, limit, offline).await?;
                inputs.push((symbol.clone(), bars));
            }

            // Portfolio runs need aligned series; keep the common tail
            if inputs.len() > 1 {
                let min_len = inputs.iter().map(|(_, b)| b.len()).min().unwrap_or(0);
                for (symbol, bars) in inputs.iter_mut() {
                    if bars.len() > min_len {
                        info!(
                            symbol = %symbol,
                            dropped = bars.len() - min_len,
                            "Trimming to common history length"
                        );
                        bars.drain(..bars.len() - min_len);
                    }
                }
            }

            for (_, bars) in inputs.iter_mut() {
                attach_indicators(bars, &sim_config.volatility_column, &sim_config.atr_column);
            }

            let signal_series: Vec<Vec<i8>> = inputs
                .iter()
                .map(|(_, bars)| momentum_signals(bars, lookback))
                .collect();

            let runner = SimulationLoop::new(sim_config, RiskSizer::new(settings.risk.clone()));

            if inputs.len() == 1 {
                let (symbol, bars) = &inputs[0];
                let report = runner.run(symbol, bars, &signal_series[0])?;
                println!("{report}");

                let run_id = db.save_run(&report).await?;
                info!(run_id, "Run saved");
            } else {
                let runs: Vec<SymbolRun<'_>> = inputs
                    .iter()
                    .zip(&signal_series)
                    .map(|((symbol, bars), signals)| SymbolRun {
                        symbol,
                        bars,
                        signals,
                    })
                    .collect();

                let report = runner.run_portfolio(&runs, Objective::from_str(&objective))?;
                println!("{report}");

                for symbol_report in &report.symbol_reports {
                    let run_id = db.save_run(symbol_report).await?;
                    info!(run_id, symbol = %symbol_report.symbol, "Run saved");
                }
            }
        }

        Commands::Optimize {
            symbols,
            interval,
            limit,
            objective,
        } => {
            if symbols.len() < 2 {
                bail!("Optimization needs at least two symbols");
            }

            let mut series: Vec<(String, Vec<Bar>)> = Vec::with_capacity(symbols.len());
            for symbol in &symbols {
                let bars = load_bars(&db, &settings, symbol, &interval, limit, false).await?;
                series.push((symbol.clone(), bars));
            }

            let min_len = series.iter().map(|(_, b)| b.len()).min().unwrap_or(0);
            for (_, bars) in series.iter_mut() {
                if bars.len() > min_len {
                    bars.drain(..bars.len() - min_len);
                }
            }

            let bar_refs: Vec<&[Bar]> = series.iter().map(|(_, b)| b.as_slice()).collect();
            let returns = data::returns_matrix(&bar_refs)?;

            let objective = Objective::from_str(&objective);
            let optimizer = PortfolioOptimizer::new(settings.risk.risk_free_rate);
            let result = optimizer.optimize(&returns, objective)?;

            println!("\n{:<12} {:>8}", "SYMBOL", "WEIGHT");
            println!("{}", "-".repeat(22));
            for ((symbol, _), weight) in series.iter().zip(&result.weights) {
                println!("{:<12} {:>7.1}%", symbol, weight * 100.0);
            }
            println!(
                "\nObjective ({}): {:.4}",
                objective.as_str(),
                result.objective_value
            );
            if !result.converged {
                println!("Warning: optimizer did not converge; weights are best-effort");
            }
        }

        Commands::Runs { limit } => {
            let runs = db.list_runs(limit).await?;

            if runs.is_empty() {
                println!("No stored runs. Use 'tradesim backtest <symbol>' to create one.");
                return Ok(());
            }

            println!(
                "\n{:<5} {:<10} {:>12} {:>12} {:>8} {:>6}",
                "ID", "SYMBOL", "INITIAL", "FINAL", "TRADES", "WIN%"
            );
            println!("{}", "-".repeat(60));

            for run in runs {
                println!(
                    "{:<5} {:<10} {:>12} {:>12} {:>8} {:>5.1}%",
                    run.id,
                    run.symbol,
                    run.initial_capital,
                    run.final_capital,
                    run.total_trades,
                    run.win_rate * 100.0
                );
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

/// Load bars from the cache, fetching and caching on a miss (unless
/// offline).
async fn load_bars(
    db: &Database,
    settings: &Settings,
    symbol: &str,
    interval: &str,
    limit: u32,
    offline: bool,
) -> Result<Vec<Bar>> {
    let cached = db.load_bars(symbol, interval).await?;
    if cached.len() >= limit as usize {
        info!(symbol, bars = cached.len(), "Using cached bars");
        let start = cached.len() - limit as usize;
        return Ok(cached[start..].to_vec());
    }

    if offline {
        if cached.is_empty() {
            bail!("No cached bars for {symbol} and --offline was given");
        }
        info!(
            symbol,
            bars = cached.len(),
            "Offline: using shorter cached history"
        );
        return Ok(cached);
    }

    let fetcher = KlineFetcher::new(settings.feed.clone())?;
    let bars = fetcher.fetch_bars(symbol, interval, limit).await?;
    db.cache_bars(symbol, interval, &bars).await?;

    Ok(bars)
}
