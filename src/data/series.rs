//! Cleaning and indicator computation for bar series.

use ndarray::Array2;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::Bar;

/// Rolling window for the return-volatility column.
pub const VOLATILITY_WINDOW: usize = 20;

/// Rolling window for the ATR column.
pub const ATR_WINDOW: usize = 14;

/// Clean a raw bar sequence in place of the feed contract: sort by
/// timestamp, drop duplicate timestamps keeping the first occurrence,
/// forward-fill bars whose close is missing (reported as a non-positive
/// price), and drop leading bars that still have nothing to fill from.
pub fn clean_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);

    let before = bars.len();
    let mut last_seen = None;
    bars.retain(|b| {
        if last_seen == Some(b.timestamp) {
            false
        } else {
            last_seen = Some(b.timestamp);
            true
        }
    });
    if bars.len() != before {
        debug!(
            dropped = before - bars.len(),
            "Dropped duplicate bar timestamps"
        );
    }

    // Forward-fill gaps from the previous close
    let mut prev_close: Option<Decimal> = None;
    for bar in bars.iter_mut() {
        if bar.close > Decimal::ZERO {
            prev_close = Some(bar.close);
            continue;
        }
        if let Some(close) = prev_close {
            bar.open = close;
            bar.high = close;
            bar.low = close;
            bar.close = close;
            bar.volume = Decimal::ZERO;
        }
    }

    // Anything unfillable can only sit at the head of the series
    let leading_gap = bars
        .iter()
        .take_while(|b| b.close <= Decimal::ZERO)
        .count();
    if leading_gap > 0 {
        debug!(dropped = leading_gap, "Dropped unfillable leading bars");
        bars.drain(..leading_gap);
    }

    bars
}

/// Attach rolling-volatility and ATR indicator columns.
///
/// Volatility is the sample standard deviation of simple returns over
/// [`VOLATILITY_WINDOW`] periods. It is dimensionless, so the sizer's
/// 1/(1+vol) adjustment is scale-free. ATR is Wilder-smoothed true range
/// over [`ATR_WINDOW`] bars. Bars inside the warmup window simply get no
/// column, which the simulation loop treats as "do not enter yet".
pub fn attach_indicators(bars: &mut [Bar], volatility_column: &str, atr_column: &str) {
    if bars.len() < 2 {
        return;
    }

    // Simple returns, one per bar after the first
    let mut returns = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let prev = bars[i - 1].close.to_f64().unwrap_or(0.0);
        let curr = bars[i].close.to_f64().unwrap_or(0.0);
        returns.push(if prev > 0.0 { curr / prev - 1.0 } else { 0.0 });
    }

    for i in VOLATILITY_WINDOW..bars.len() {
        let window: Vec<f64> = returns[i - VOLATILITY_WINDOW..i].to_vec();
        let vol = window.std_dev();
        if vol.is_finite() {
            bars[i]
                .indicators
                .insert(volatility_column.to_string(), vol);
        }
    }

    // Wilder ATR: simple average of the first window, then smoothing
    let mut true_ranges = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let tr = bars[i]
            .true_range(bars[i - 1].close)
            .to_f64()
            .unwrap_or(0.0);
        true_ranges.push(tr);
    }

    if true_ranges.len() >= ATR_WINDOW {
        let mut atr: f64 =
            true_ranges[..ATR_WINDOW].iter().sum::<f64>() / ATR_WINDOW as f64;
        bars[ATR_WINDOW].indicators.insert(atr_column.to_string(), atr);

        for i in ATR_WINDOW..true_ranges.len() {
            atr = (atr * (ATR_WINDOW as f64 - 1.0) + true_ranges[i]) / ATR_WINDOW as f64;
            bars[i + 1].indicators.insert(atr_column.to_string(), atr);
        }
    }
}

/// Build the aligned returns matrix the optimizer consumes: one column
/// per symbol, one row per period, no missing values.
///
/// All series must be equally long (the feed contract requires the
/// collaborator to have aligned them) and at least three bars deep so
/// two return rows exist.
pub fn returns_matrix(series: &[&[Bar]]) -> EngineResult<Array2<f64>> {
    if series.is_empty() {
        return Err(EngineError::data_feed("no series to build returns from"));
    }

    let len = series[0].len();
    if series.iter().any(|s| s.len() != len) {
        return Err(EngineError::data_feed(
            "bar series are not aligned to the same length",
        ));
    }
    if len < 3 {
        return Err(EngineError::data_feed(format!(
            "need at least 3 bars per symbol for a returns matrix, got {len}"
        )));
    }

    let periods = len - 1;
    let mut matrix = Array2::zeros((periods, series.len()));

    for (col, bars) in series.iter().enumerate() {
        for t in 1..len {
            let prev = bars[t - 1].close.to_f64().unwrap_or(0.0);
            let curr = bars[t].close.to_f64().unwrap_or(0.0);
            if prev <= 0.0 {
                return Err(EngineError::data_feed(format!(
                    "non-positive close in series {col} at row {t}"
                )));
            }
            matrix[[t - 1, col]] = curr / prev - 1.0;
        }
    }

    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn make_bar(day: i64, close: Decimal) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        Bar::new(ts, close, close, close, close, dec!(100))
    }

    #[test]
    fn test_clean_sorts_and_keeps_first_duplicate() {
        let mut dup = make_bar(1, dec!(999));
        dup.volume = dec!(0);

        let bars = clean_bars(vec![
            make_bar(2, dec!(102)),
            make_bar(1, dec!(101)),
            dup, // Same timestamp as day 1; must lose to the first
            make_bar(0, dec!(100)),
        ]);

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].close, dec!(100));
        assert_eq!(bars[1].close, dec!(101));
        assert_eq!(bars[2].close, dec!(102));
    }

    #[test]
    fn test_clean_forward_fills_and_drops_leading_gap() {
        let bars = clean_bars(vec![
            make_bar(0, dec!(0)), // Unfillable leading gap
            make_bar(1, dec!(100)),
            make_bar(2, dec!(0)), // Filled from day 1
            make_bar(3, dec!(104)),
        ]);

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].close, dec!(100));
        assert_eq!(bars[1].close, dec!(100));
        assert_eq!(bars[1].volume, Decimal::ZERO);
        assert_eq!(bars[2].close, dec!(104));
    }

    #[test]
    fn test_indicators_respect_warmup() {
        let mut bars: Vec<Bar> = (0..30)
            .map(|i| make_bar(i, dec!(100) + Decimal::from(i % 5)))
            .collect();

        attach_indicators(&mut bars, "volatility", "atr");

        // Warmup rows carry no columns
        assert!(bars[VOLATILITY_WINDOW - 1].indicator("volatility").is_none());
        assert!(bars[VOLATILITY_WINDOW].indicator("volatility").is_some());
        assert!(bars[ATR_WINDOW - 1].indicator("atr").is_none());
        assert!(bars[ATR_WINDOW].indicator("atr").is_some());

        // Values are finite and non-negative once present
        for bar in &bars[VOLATILITY_WINDOW..] {
            let vol = bar.indicator("volatility").unwrap();
            assert!(vol.is_finite() && vol >= 0.0);
        }
    }

    #[test]
    fn test_returns_matrix_shape() {
        let a: Vec<Bar> = vec![
            make_bar(0, dec!(100)),
            make_bar(1, dec!(110)),
            make_bar(2, dec!(99)),
        ];
        let b: Vec<Bar> = vec![
            make_bar(0, dec!(50)),
            make_bar(1, dec!(51)),
            make_bar(2, dec!(50)),
        ];

        let matrix = returns_matrix(&[&a, &b]).unwrap();
        assert_eq!(matrix.shape(), &[2, 2]);
        assert!((matrix[[0, 0]] - 0.1).abs() < 1e-12);
        assert!((matrix[[0, 1]] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_returns_matrix_rejects_misaligned_series() {
        let a: Vec<Bar> = vec![
            make_bar(0, dec!(100)),
            make_bar(1, dec!(110)),
            make_bar(2, dec!(99)),
        ];
        let b: Vec<Bar> = vec![make_bar(0, dec!(50)), make_bar(1, dec!(51))];

        assert!(returns_matrix(&[&a, &b]).is_err());
    }
}
