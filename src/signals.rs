//! Baseline signal generation for the CLI.
//!
//! Real deployments feed the simulation from an external strategy; this
//! momentum rule exists so the binary can run end-to-end on its own. One
//! value per bar, index-aligned with the input: +1 when the lookback
//! return is positive, -1 when negative, 0 inside the warmup window or
//! when flat.

use rust_decimal::Decimal;

use crate::models::Bar;

/// Sign of the `lookback`-bar return at each bar.
pub fn momentum_signals(bars: &[Bar], lookback: usize) -> Vec<i8> {
    let mut signals = vec![0i8; bars.len()];
    if lookback == 0 {
        return signals;
    }

    for i in lookback..bars.len() {
        let past = bars[i - lookback].close;
        if past <= Decimal::ZERO {
            continue;
        }
        let diff = bars[i].close - past;
        signals[i] = if diff > Decimal::ZERO {
            1
        } else if diff < Decimal::ZERO {
            -1
        } else {
            0
        };
    }

    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn make_bar(day: i64, close: Decimal) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        Bar::new(ts, close, close, close, close, dec!(1))
    }

    #[test]
    fn test_momentum_direction_and_warmup() {
        let bars = vec![
            make_bar(0, dec!(100)),
            make_bar(1, dec!(101)),
            make_bar(2, dec!(102)),
            make_bar(3, dec!(101)),
            make_bar(4, dec!(100)),
        ];

        let signals = momentum_signals(&bars, 2);

        assert_eq!(signals, vec![0, 0, 1, 0, -1]);
    }
}
