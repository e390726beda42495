use crate::domain::market::PriceSeries;
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

pub const MIN_TREND_POINTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    pub short_window: usize,
    pub long_window: usize,
    /// Scale applied to the relative gap between the short and long moving averages.
    pub ma_gain: f64,
    /// Scale applied to the first-to-last percentage change (as a fraction).
    pub pct_gain: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            short_window: 7,
            long_window: 30,
            ma_gain: 10.0,
            pct_gain: 5.0,
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.short_window >= 1, "short_window must be >= 1");
        anyhow::ensure!(
            self.long_window >= self.short_window,
            "long_window ({}) must be >= short_window ({})",
            self.long_window,
            self.short_window
        );
        anyhow::ensure!(
            self.ma_gain.is_finite() && self.ma_gain >= 0.0,
            "ma_gain must be finite and non-negative"
        );
        anyhow::ensure!(
            self.pct_gain.is_finite() && self.pct_gain >= 0.0,
            "pct_gain must be finite and non-negative"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    /// Normalized to [-1, 1].
    pub score: f64,
    pub short_ma: f64,
    pub long_ma: f64,
    /// First-to-last change as a fraction (0.05 = +5%).
    pub pct_change: f64,
    pub last_close: f64,
}

pub fn compute_trend(series: &PriceSeries, cfg: &TrendConfig) -> Result<TrendReport, AnalysisError> {
    if series.len() < MIN_TREND_POINTS {
        return Err(AnalysisError::InsufficientData {
            points: series.len(),
            required: MIN_TREND_POINTS,
        });
    }

    let closes: Vec<f64> = series.closes().collect();
    let short_ma = trailing_mean(&closes, cfg.short_window);
    let long_ma = trailing_mean(&closes, cfg.long_window);

    let first = closes[0];
    let last = closes[closes.len() - 1];

    // Closes are positive by construction; the guards keep a flat or degenerate series at 0.
    let ma_signal = if long_ma > 0.0 {
        (short_ma - long_ma) / long_ma
    } else {
        0.0
    };
    let pct_change = if first > 0.0 { (last - first) / first } else { 0.0 };

    let raw = (cfg.ma_gain * ma_signal + cfg.pct_gain * pct_change) / 2.0;
    let score = if raw.is_finite() {
        raw.clamp(-1.0, 1.0)
    } else {
        0.0
    };

    tracing::debug!(
        ticker = series.ticker(),
        points = closes.len(),
        short_ma,
        long_ma,
        pct_change,
        score,
        "computed trend"
    );

    Ok(TrendReport {
        score,
        short_ma,
        long_ma,
        pct_change,
        last_close: last,
    })
}

/// Population standard deviation of simple daily returns.
pub fn realized_volatility(series: &PriceSeries) -> f64 {
    let closes: Vec<f64> = series.closes().collect();
    if closes.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let vol = var.sqrt();
    if vol.is_finite() {
        vol
    } else {
        0.0
    }
}

fn trailing_mean(values: &[f64], window: usize) -> f64 {
    let window = window.clamp(1, values.len());
    let tail = &values[values.len() - window..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::PricePoint;
    use chrono::{Duration, NaiveDate};

    fn series(closes: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let points = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PricePoint {
                date: start + Duration::days(i as i64),
                close,
            })
            .collect();
        PriceSeries::new("TEST", points).unwrap()
    }

    #[test]
    fn single_point_is_insufficient() {
        let err = compute_trend(&series(&[100.0]), &TrendConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InsufficientData {
                points: 1,
                required: 2
            }
        ));
    }

    #[test]
    fn flat_series_is_neutral() {
        let report = compute_trend(&series(&[42.0; 40]), &TrendConfig::default()).unwrap();
        assert_eq!(report.score, 0.0);
        assert_eq!(report.pct_change, 0.0);
        assert_eq!(realized_volatility(&series(&[42.0; 40])), 0.0);
    }

    #[test]
    fn rising_series_is_positive_and_falling_is_negative() {
        let up: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..40).map(|i| 140.0 - i as f64).collect();
        let cfg = TrendConfig::default();

        let up = compute_trend(&series(&up), &cfg).unwrap();
        let down = compute_trend(&series(&down), &cfg).unwrap();
        assert!(up.score > 0.0, "{up:?}");
        assert!(down.score < 0.0, "{down:?}");
        assert!(up.short_ma > up.long_ma);
    }

    #[test]
    fn score_stays_bounded() {
        let cfg = TrendConfig::default();
        let cases: Vec<Vec<f64>> = vec![
            vec![1.0, 1000.0],
            vec![1000.0, 0.01],
            vec![5.0, 5.0],
            (0..300).map(|i| 1.0 + (i as f64 * 0.7).sin().abs() * 50.0).collect(),
            (0..10).map(|i| 10f64.powi(i)).collect(),
        ];
        for closes in cases {
            let report = compute_trend(&series(&closes), &cfg).unwrap();
            assert!(
                (-1.0..=1.0).contains(&report.score),
                "score {} out of range for {closes:?}",
                report.score
            );
        }
    }

    #[test]
    fn two_points_use_clamped_windows() {
        let report = compute_trend(&series(&[100.0, 110.0]), &TrendConfig::default()).unwrap();
        // Both windows collapse to the available points, so only the percentage change speaks.
        assert_eq!(report.short_ma, report.long_ma);
        assert!((report.pct_change - 0.1).abs() < 1e-12);
        assert!((report.score - 0.25).abs() < 1e-12);
        assert_eq!(report.last_close, 110.0);
    }

    #[test]
    fn volatility_of_alternating_returns() {
        // +10% then -10%/1.1: returns 0.1 and -0.0909..; non-zero spread.
        let vol = realized_volatility(&series(&[100.0, 110.0, 100.0]));
        assert!(vol > 0.09 && vol < 0.11, "{vol}");
    }

    #[test]
    fn config_validation() {
        assert!(TrendConfig::default().validate().is_ok());
        let bad = TrendConfig {
            short_window: 40,
            ..TrendConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = TrendConfig {
            short_window: 0,
            ..TrendConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
