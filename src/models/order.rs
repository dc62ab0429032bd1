//! Order model: a tagged request with a monotonic fill status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of order being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "market",
            OrderKind::Limit => "limit",
            OrderKind::StopLoss => "stop_loss",
            OrderKind::TakeProfit => "take_profit",
            OrderKind::TrailingStop => "trailing_stop",
        }
    }
}

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i8 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Lifecycle status of an order.
///
/// Transitions only ever move forward: Pending → Filled, Cancelled or
/// Failed. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// A single order request and its resolution state.
///
/// Immutable after creation except for the status/fill fields, which are
/// only written through [`Order::fill`], [`Order::cancel`] and
/// [`Order::fail`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier
    pub id: Uuid,

    /// Instrument symbol
    pub symbol: String,

    /// What kind of order this is
    pub kind: OrderKind,

    /// Buy or sell
    pub side: OrderSide,

    /// Requested quantity (always positive)
    pub quantity: Decimal,

    /// Limit price for limit orders; reference price for market orders
    pub price: Option<Decimal>,

    /// Stop/reference price (trigger level, or the marketability
    /// reference for limit orders)
    pub stop_price: Option<Decimal>,

    /// Trailing distance as a fraction, for trailing stops
    pub trailing_percent: Option<Decimal>,

    /// Current lifecycle status
    pub status: OrderStatus,

    /// Quantity actually filled
    pub filled_quantity: Decimal,

    /// Price the fill executed at
    pub filled_price: Decimal,

    /// When the order was created
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Construct a new pending order.
    pub fn new(
        symbol: impl Into<String>,
        kind: OrderKind,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
        trailing_percent: Option<Decimal>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            kind,
            side,
            quantity,
            price,
            stop_price,
            trailing_percent,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            filled_price: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    /// Mark the order filled in full at the given price.
    ///
    /// Returns false if the order is already terminal.
    pub fn fill(&mut self, price: Decimal) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Filled;
        self.filled_quantity = self.quantity;
        self.filled_price = price;
        true
    }

    /// Mark the order cancelled. Returns false if already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Cancelled;
        true
    }

    /// Mark the order failed. Returns false if already terminal.
    pub fn fail(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Failed;
        true
    }

    /// Whether the order is still waiting to be resolved.
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_never_moves_backward() {
        let mut order = Order::new(
            "BTCUSDT",
            OrderKind::Market,
            OrderSide::Buy,
            dec!(1),
            Some(dec!(100)),
            None,
            None,
        );

        assert!(order.fill(dec!(100.1)));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(1));

        // A filled order can be neither cancelled nor re-filled
        assert!(!order.cancel());
        assert!(!order.fill(dec!(99)));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_price, dec!(100.1));
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(OrderSide::Buy.sign(), 1);
        assert_eq!(OrderSide::Sell.sign(), -1);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }
}
