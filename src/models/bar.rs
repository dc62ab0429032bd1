//! Bar model: one OHLCV record plus precomputed indicator columns.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single historical price bar.
///
/// Produced by the data collaborator and immutable afterwards. Indicator
/// values (rolling volatility, ATR, ...) are attached by name; the
/// simulation core only ever reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,

    /// Open price
    pub open: Decimal,

    /// High price
    pub high: Decimal,

    /// Low price
    pub low: Decimal,

    /// Close price
    pub close: Decimal,

    /// Traded volume in base units
    pub volume: Decimal,

    /// Named indicator columns, keyed by indicator name
    #[serde(default)]
    pub indicators: HashMap<String, f64>,
}

impl Bar {
    /// Create a bar with no indicator columns.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: HashMap::new(),
        }
    }

    /// Look up an indicator column by name.
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }

    /// True range of this bar given the previous close.
    pub fn true_range(&self, prev_close: Decimal) -> Decimal {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_true_range_uses_gap() {
        let bar = Bar::new(
            Utc::now(),
            dec!(105),
            dec!(106),
            dec!(104),
            dec!(105),
            dec!(1000),
        );

        // Plain range is 2, but the gap from the previous close dominates
        assert_eq!(bar.true_range(dec!(100)), dec!(6));
        assert_eq!(bar.true_range(dec!(105)), dec!(2));
    }
}
