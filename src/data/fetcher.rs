//! Kline fetcher: HTTP bar feed with bounded retry.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use backoff::ExponentialBackoffBuilder;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::Bar;

use super::clean_bars;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the bar feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Exchange REST endpoint
    pub base_url: String,

    /// First retry delay in milliseconds
    pub retry_initial_ms: u64,

    /// Give up retrying after this many seconds
    pub retry_max_elapsed_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            retry_initial_ms: 500,
            retry_max_elapsed_secs: 30,
        }
    }
}

/// HTTP client for historical klines.
///
/// Transient fetch failures are retried with exponential backoff up to
/// the configured elapsed budget; whatever still fails surfaces as a
/// clean error, never as malformed in-band data.
pub struct KlineFetcher {
    client: Client,
    config: FeedConfig,
}

impl KlineFetcher {
    /// Create a fetcher with default settings.
    pub fn new(config: FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Fetch, clean and return up to `limit` bars for one symbol.
    pub async fn fetch_bars(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Bar>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.retry_initial_ms))
            .with_max_elapsed_time(Some(Duration::from_secs(
                self.config.retry_max_elapsed_secs,
            )))
            .build();

        let bars = backoff::future::retry(policy, || async {
            self.fetch_once(symbol, interval, limit).await.map_err(|e| {
                warn!(symbol, error = %e, "Kline fetch failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
        .with_context(|| format!("Failed to fetch klines for {symbol}"))?;

        Ok(clean_bars(bars))
    }

    /// Fetch several symbols concurrently. Returns them in input order;
    /// any individual failure fails the batch.
    pub async fn fetch_many(
        &self,
        symbols: &[String],
        interval: &str,
        limit: u32,
    ) -> Result<Vec<(String, Vec<Bar>)>> {
        let fetches = symbols
            .iter()
            .map(|symbol| async move {
                let bars = self.fetch_bars(symbol, interval, limit).await?;
                Ok::<_, anyhow::Error>((symbol.clone(), bars))
            })
            .collect::<Vec<_>>();

        join_all(fetches).await.into_iter().collect()
    }

    /// One un-retried fetch attempt.
    async fn fetch_once(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.config.base_url,
            symbol,
            interval,
            limit.min(1000)
        );

        debug!(url = %url, "Fetching klines");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Kline request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("Kline request returned {}", response.status()));
        }

        let rows: Vec<serde_json::Value> =
            response.json().await.context("Invalid kline response")?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in &rows {
            bars.push(parse_kline_row(row)?);
        }

        Ok(bars)
    }
}

/// Parse one kline row of the exchange wire format:
/// `[open_time_ms, "open", "high", "low", "close", "volume", ...]`.
fn parse_kline_row(row: &serde_json::Value) -> Result<Bar> {
    let fields = row
        .as_array()
        .ok_or_else(|| anyhow!("kline row is not an array"))?;
    if fields.len() < 6 {
        return Err(anyhow!("kline row has {} fields, need 6", fields.len()));
    }

    let open_time_ms = fields[0]
        .as_i64()
        .ok_or_else(|| anyhow!("kline open time is not an integer"))?;
    let timestamp = Utc
        .timestamp_millis_opt(open_time_ms)
        .single()
        .ok_or_else(|| anyhow!("kline open time {open_time_ms} out of range"))?;

    let price = |idx: usize, name: &str| -> Result<Decimal> {
        let s = fields[idx]
            .as_str()
            .ok_or_else(|| anyhow!("kline {name} is not a string"))?;
        Decimal::from_str(s).with_context(|| format!("unparseable kline {name}: {s}"))
    };

    Ok(Bar::new(
        timestamp,
        price(1, "open")?,
        price(2, "high")?,
        price(3, "low")?,
        price(4, "close")?,
        price(5, "volume")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_kline_row() {
        let row = serde_json::json!([
            1704067200000i64,
            "42000.5",
            "42500.0",
            "41800.0",
            "42250.25",
            "1234.56",
            1704070799999i64
        ]);

        let bar = parse_kline_row(&row).unwrap();
        assert_eq!(bar.open, dec!(42000.5));
        assert_eq!(bar.close, dec!(42250.25));
        assert_eq!(bar.volume, dec!(1234.56));
        assert_eq!(bar.timestamp.timestamp_millis(), 1704067200000);
    }

    #[test]
    fn test_parse_kline_row_rejects_garbage() {
        assert!(parse_kline_row(&serde_json::json!("not an array")).is_err());
        assert!(parse_kline_row(&serde_json::json!([1, 2])).is_err());
        assert!(parse_kline_row(&serde_json::json!([
            1704067200000i64,
            "abc",
            "1",
            "1",
            "1",
            "1"
        ]))
        .is_err());
    }
}
