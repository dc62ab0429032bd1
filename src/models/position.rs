//! Position model: signed holdings in one instrument.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Open position in a single instrument.
///
/// Quantity is signed: positive for long, negative for short. A position
/// whose quantity reaches exactly zero is removed from the position table
/// by the engine, so no zero-quantity entry ever survives a fill.
/// `average_price` is meaningful only while quantity is nonzero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol
    pub symbol: String,

    /// Signed quantity (positive = long, negative = short)
    pub quantity: Decimal,

    /// Quantity-weighted average entry price
    pub average_price: Decimal,

    /// Cumulative gross realized PnL from reducing fills
    pub realized_pnl: Decimal,

    /// Commission accumulated on the fills that opened this position.
    /// Pro-rated out as the position is reduced, so a closing trade can
    /// report net realized PnL.
    pub entry_commission: Decimal,
}

impl Position {
    /// Open a fresh position from a single fill.
    pub fn open(
        symbol: impl Into<String>,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            average_price: price,
            realized_pnl: Decimal::ZERO,
            entry_commission: commission,
        }
    }

    /// +1 for long, -1 for short. Undefined for zero quantity, which the
    /// engine never stores.
    pub fn sign(&self) -> i8 {
        if self.quantity >= Decimal::ZERO {
            1
        } else {
            -1
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Absolute position size.
    pub fn abs_quantity(&self) -> Decimal {
        self.quantity.abs()
    }

    /// Signed market value at the given price. Shorts contribute
    /// negatively.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Unrealized PnL at the given price.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.average_price) * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_short_position_value_and_pnl() {
        let pos = Position::open("ETHUSDT", dec!(-2), dec!(2000), dec!(4));

        assert_eq!(pos.sign(), -1);
        assert!(!pos.is_long());
        assert_eq!(pos.market_value(dec!(1900)), dec!(-3800));
        // Short gains when price falls
        assert_eq!(pos.unrealized_pnl(dec!(1900)), dec!(200));
        assert_eq!(pos.unrealized_pnl(dec!(2100)), dec!(-200));
    }
}
