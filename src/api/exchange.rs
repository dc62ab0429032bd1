//! REST exchange client for live order execution.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{OrderKind, OrderSide};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the live venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange REST endpoint
    pub base_url: String,

    /// API key, typically sourced from the environment
    pub api_key: String,
}

impl ExchangeConfig {
    /// Build a config from `EXCHANGE_BASE_URL` / `EXCHANGE_API_KEY`
    /// environment variables (a `.env` file is honored).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let base_url = std::env::var("EXCHANGE_BASE_URL")
            .context("EXCHANGE_BASE_URL is not set")?;
        let api_key =
            std::env::var("EXCHANGE_API_KEY").context("EXCHANGE_API_KEY is not set")?;

        Ok(Self { base_url, api_key })
    }
}

/// Order submission payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitOrderRequest<'a> {
    symbol: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    side: &'a str,
    quantity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trailing_percent: Option<String>,
}

/// Raw submission response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitOrderResponse {
    success: bool,
    #[serde(default)]
    error_msg: String,
    order_id: Option<String>,
    filled_price: Option<String>,
    filled_quantity: Option<String>,
}

/// What the venue reports back for a filled order.
#[derive(Debug, Clone)]
pub struct FillReport {
    /// Venue-side order identifier
    pub exchange_order_id: String,

    /// Price the order filled at
    pub filled_price: Decimal,

    /// Quantity filled
    pub filled_quantity: Decimal,
}

/// Client for submitting and cancelling orders on a live venue.
pub struct ExchangeClient {
    http: Client,
    config: ExchangeConfig,
}

impl ExchangeClient {
    /// Create a client from the given configuration.
    pub fn new(config: ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http, config })
    }

    /// Submit an order and wait for the venue's fill report.
    ///
    /// A rejection or an unfilled response surfaces as an error; the
    /// caller decides whether to mark the local order failed or retry.
    pub async fn submit_order(
        &self,
        symbol: &str,
        kind: OrderKind,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
        trailing_percent: Option<Decimal>,
    ) -> Result<FillReport> {
        let payload = SubmitOrderRequest {
            symbol,
            kind: kind.as_str(),
            side: side.as_str(),
            quantity: quantity.to_string(),
            price: price.map(|p| p.to_string()),
            stop_price: stop_price.map(|p| p.to_string()),
            trailing_percent: trailing_percent.map(|p| p.to_string()),
        };

        info!(
            symbol,
            kind = kind.as_str(),
            side = side.as_str(),
            quantity = %quantity,
            "Submitting live order"
        );

        let response = self
            .http
            .post(format!("{}/api/v3/order", self.config.base_url))
            .header("X-API-KEY", &self.config.api_key)
            .json(&payload)
            .send()
            .await
            .context("Order submission failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Order submission returned {}",
                response.status()
            ));
        }

        let body: SubmitOrderResponse =
            response.json().await.context("Invalid order response")?;

        if !body.success {
            warn!(symbol, error = %body.error_msg, "Venue rejected order");
            return Err(anyhow!("Venue rejected order: {}", body.error_msg));
        }

        let exchange_order_id = body
            .order_id
            .ok_or_else(|| anyhow!("Fill report missing order id"))?;
        let filled_price = body
            .filled_price
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .context("Unparseable filled price")?
            .ok_or_else(|| anyhow!("Fill report missing filled price"))?;
        let filled_quantity = body
            .filled_quantity
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .context("Unparseable filled quantity")?
            .ok_or_else(|| anyhow!("Fill report missing filled quantity"))?;

        Ok(FillReport {
            exchange_order_id,
            filled_price,
            filled_quantity,
        })
    }

    /// Cancel a venue-side order. Returns true when the venue confirms
    /// the cancellation.
    pub async fn cancel_order(&self, symbol: &str, exchange_order_id: &str) -> Result<bool> {
        let response = self
            .http
            .delete(format!(
                "{}/api/v3/order?symbol={}&orderId={}",
                self.config.base_url, symbol, exchange_order_id
            ))
            .header("X-API-KEY", &self.config.api_key)
            .send()
            .await
            .context("Order cancellation failed")?;

        Ok(response.status().is_success())
    }
}
