//! Trade model: one append-only ledger row per fill.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderSide;

/// A single executed fill, as recorded in the trade ledger.
///
/// Ledger order is fill order; rows are never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Order that produced this fill
    pub order_id: Uuid,

    /// When the fill happened
    pub timestamp: DateTime<Utc>,

    /// Instrument symbol
    pub symbol: String,

    /// Fill direction
    pub side: OrderSide,

    /// Quantity filled (always positive)
    pub quantity: Decimal,

    /// Execution price
    pub price: Decimal,

    /// Commission charged on this fill
    pub commission: Decimal,

    /// Net realized PnL attributed to this fill: zero for a fill that
    /// opens or adds to a position; for a reducing fill, the gross PnL on
    /// the closed quantity minus the pro-rated entry commission and this
    /// fill's own commission.
    pub realized_pnl: Decimal,
}

impl Trade {
    /// Notional value of the fill.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }

    /// Whether this fill closed at a profit.
    pub fn is_profitable(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_notional_and_profitability() {
        let trade = Trade {
            order_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Sell,
            quantity: dec!(10),
            price: dec!(110),
            commission: dec!(1.1),
            realized_pnl: dec!(97.9),
        };

        assert_eq!(trade.notional(), dec!(1100));
        assert!(trade.is_profitable());
    }
}
