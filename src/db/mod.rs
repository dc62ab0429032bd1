//! SQLite persistence: the bar cache and completed simulation runs.
//!
//! The bar cache is the keyed store the data collaborator owns: fetched
//! klines land here keyed by (symbol, interval, timestamp) so repeated
//! replays do not refetch. Completed runs are stored with their full
//! trade ledgers for later inspection.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::Bar;
use crate::sim::SimulationReport;

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored run summary.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredRun {
    pub id: i64,
    pub symbol: String,
    pub started_at: String,
    pub ended_at: String,
    pub initial_capital: String,
    pub final_capital: String,
    pub total_pnl: String,
    pub total_trades: i64,
    pub profitable_trades: i64,
    pub win_rate: f64,
    pub created_at: String,
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Bar cache: prices kept as TEXT so decimal values stay exact
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time_ms INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (symbol, interval, open_time_ms)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Completed simulation runs
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                initial_capital TEXT NOT NULL,
                final_capital TEXT NOT NULL,
                total_pnl TEXT NOT NULL,
                total_trades INTEGER NOT NULL,
                profitable_trades INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Trade ledgers of stored runs
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                commission TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Bar Cache ====================

    /// Cache bars for a symbol/interval. Duplicate timestamps are
    /// ignored, keeping the first stored row.
    pub async fn cache_bars(&self, symbol: &str, interval: &str, bars: &[Bar]) -> Result<()> {
        for bar in bars {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO bars
                    (symbol, interval, open_time_ms, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(symbol)
            .bind(interval)
            .bind(bar.timestamp.timestamp_millis())
            .bind(bar.open.to_string())
            .bind(bar.high.to_string())
            .bind(bar.low.to_string())
            .bind(bar.close.to_string())
            .bind(bar.volume.to_string())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Load cached bars for a symbol/interval, oldest first. No
    /// indicator columns are attached; the data layer recomputes them.
    pub async fn load_bars(&self, symbol: &str, interval: &str) -> Result<Vec<Bar>> {
        let rows: Vec<(i64, String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT open_time_ms, open, high, low, close, volume
            FROM bars
            WHERE symbol = ? AND interval = ?
            ORDER BY open_time_ms ASC
            "#,
        )
        .bind(symbol)
        .bind(interval)
        .fetch_all(&self.pool)
        .await?;

        let mut bars = Vec::with_capacity(rows.len());
        for (ms, open, high, low, close, volume) in rows {
            let timestamp = Utc
                .timestamp_millis_opt(ms)
                .single()
                .with_context(|| format!("corrupt cached timestamp {ms}"))?;
            bars.push(Bar::new(
                timestamp,
                parse_decimal(&open, "open")?,
                parse_decimal(&high, "high")?,
                parse_decimal(&low, "low")?,
                parse_decimal(&close, "close")?,
                parse_decimal(&volume, "volume")?,
            ));
        }

        Ok(bars)
    }

    /// Number of cached bars for a symbol/interval.
    pub async fn cached_bar_count(&self, symbol: &str, interval: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM bars WHERE symbol = ? AND interval = ?")
                .bind(symbol)
                .bind(interval)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    // ==================== Runs ====================

    /// Persist a completed run with its trade ledger. Returns the run id.
    pub async fn save_run(&self, report: &SimulationReport) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO runs
                (symbol, started_at, ended_at, initial_capital, final_capital,
                 total_pnl, total_trades, profitable_trades, win_rate)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.symbol)
        .bind(report.start_time.to_rfc3339())
        .bind(report.end_time.to_rfc3339())
        .bind(report.initial_capital.to_string())
        .bind(report.final_capital.to_string())
        .bind(report.total_pnl.to_string())
        .bind(report.total_trades as i64)
        .bind(report.profitable_trades as i64)
        .bind(report.win_rate)
        .execute(&self.pool)
        .await?;

        let run_id = result.last_insert_rowid();

        for trade in &report.trades {
            sqlx::query(
                r#"
                INSERT INTO run_trades
                    (run_id, timestamp, symbol, side, quantity, price, commission, realized_pnl)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(trade.timestamp.to_rfc3339())
            .bind(&trade.symbol)
            .bind(trade.side.as_str())
            .bind(trade.quantity.to_string())
            .bind(trade.price.to_string())
            .bind(trade.commission.to_string())
            .bind(trade.realized_pnl.to_string())
            .execute(&self.pool)
            .await?;
        }

        Ok(run_id)
    }

    /// Recent runs, newest first.
    pub async fn list_runs(&self, limit: i64) -> Result<Vec<StoredRun>> {
        sqlx::query_as::<_, StoredRun>(
            "SELECT * FROM runs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")
    }
}

fn parse_decimal(s: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("corrupt cached {field}: {s}"))
}
