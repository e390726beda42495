use crate::domain::recommendation::{Recommendation, Thresholds, WeightConfig};
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

/// Maps realized volatility to weights.
///
/// At or below `calm_volatility` the trend-leaning pair applies, at or above
/// `turbulent_volatility` the sentiment-leaning pair; weights are linearly interpolated
/// in between. Invalid volatility falls back to `neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightPolicy {
    pub calm_volatility: f64,
    pub turbulent_volatility: f64,
    pub calm: WeightConfig,
    pub turbulent: WeightConfig,
    pub neutral: WeightConfig,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self {
            calm_volatility: 0.01,
            turbulent_volatility: 0.03,
            calm: WeightConfig::new(0.3, 0.7),
            turbulent: WeightConfig::new(0.7, 0.3),
            neutral: WeightConfig::new(0.5, 0.5),
        }
    }
}

impl WeightPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.calm_volatility.is_finite() && self.calm_volatility >= 0.0,
            "calm_volatility must be finite and non-negative"
        );
        anyhow::ensure!(
            self.turbulent_volatility.is_finite()
                && self.turbulent_volatility > self.calm_volatility,
            "turbulent_volatility ({}) must exceed calm_volatility ({})",
            self.turbulent_volatility,
            self.calm_volatility
        );
        for (name, w) in [
            ("calm", self.calm),
            ("turbulent", self.turbulent),
            ("neutral", self.neutral),
        ] {
            anyhow::ensure!(w.is_valid(), "{name} weights must be non-negative: {w:?}");
        }
        Ok(())
    }
}

pub fn derive_weights(volatility: f64, policy: &WeightPolicy) -> WeightConfig {
    if !volatility.is_finite() || volatility < 0.0 {
        return policy.neutral;
    }
    if volatility <= policy.calm_volatility {
        return policy.calm;
    }
    if volatility >= policy.turbulent_volatility {
        return policy.turbulent;
    }

    let t = (volatility - policy.calm_volatility)
        / (policy.turbulent_volatility - policy.calm_volatility);
    let lerp = |a: f64, b: f64| a + (b - a) * t;
    WeightConfig::new(
        lerp(policy.calm.sentiment_weight, policy.turbulent.sentiment_weight),
        lerp(policy.calm.trend_weight, policy.turbulent.trend_weight),
    )
}

pub fn recommend(
    sentiment: f64,
    trend: f64,
    weights: &WeightConfig,
    thresholds: &Thresholds,
) -> Result<Recommendation, AnalysisError> {
    if !weights.is_valid() {
        return Err(AnalysisError::InvalidWeight {
            sentiment_weight: weights.sentiment_weight,
            trend_weight: weights.trend_weight,
        });
    }
    if !sentiment.is_finite() {
        return Err(AnalysisError::InvalidScore {
            name: "sentiment",
            value: sentiment,
        });
    }
    if !trend.is_finite() {
        return Err(AnalysisError::InvalidScore {
            name: "trend",
            value: trend,
        });
    }

    let score = weights.sentiment_weight * sentiment + weights.trend_weight * trend;
    Ok(Recommendation {
        score,
        label: thresholds.label(score),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::Label;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn weighted_buy_example() {
        let weights = WeightConfig::new(0.7, 0.3);
        let thresholds = Thresholds::new(0.4, -0.4).unwrap();
        let rec = recommend(0.6, 0.2, &weights, &thresholds).unwrap();
        assert!(approx(rec.score, 0.48));
        assert_eq!(rec.label, Label::Buy);
    }

    #[test]
    fn weighted_sell_example() {
        let weights = WeightConfig::new(0.5, 0.5);
        let thresholds = Thresholds::new(0.3, -0.3).unwrap();
        let rec = recommend(-0.8, -0.5, &weights, &thresholds).unwrap();
        assert!(approx(rec.score, -0.65));
        assert_eq!(rec.label, Label::Sell);
    }

    #[test]
    fn negative_weight_is_rejected() {
        let weights = WeightConfig::new(-0.1, 0.5);
        let err = recommend(0.1, 0.1, &weights, &Thresholds::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidWeight { .. }));
    }

    #[test]
    fn non_finite_scores_are_rejected() {
        let w = WeightConfig::default();
        let t = Thresholds::default();
        assert!(matches!(
            recommend(f64::NAN, 0.0, &w, &t),
            Err(AnalysisError::InvalidScore { name: "sentiment", .. })
        ));
        assert!(matches!(
            recommend(0.0, f64::INFINITY, &w, &t),
            Err(AnalysisError::InvalidScore { name: "trend", .. })
        ));
    }

    #[test]
    fn monotonic_in_sentiment() {
        let thresholds = Thresholds::default();
        for weights in [
            WeightConfig::new(0.0, 1.0),
            WeightConfig::new(0.3, 0.7),
            WeightConfig::new(2.0, 0.1),
        ] {
            for trend in [-1.0, -0.2, 0.0, 0.5, 1.0] {
                let mut prev = f64::NEG_INFINITY;
                for i in -20..=20 {
                    let sentiment = i as f64 / 20.0;
                    let rec = recommend(sentiment, trend, &weights, &thresholds).unwrap();
                    assert!(rec.score >= prev);
                    prev = rec.score;
                }
            }
        }
    }

    #[test]
    fn labels_match_thresholds_and_are_deterministic() {
        let thresholds = Thresholds::new(0.25, -0.15).unwrap();
        let weights = WeightConfig::new(0.6, 0.4);
        for s in -10..=10 {
            for t in -10..=10 {
                let (s, t) = (s as f64 / 10.0, t as f64 / 10.0);
                let a = recommend(s, t, &weights, &thresholds).unwrap();
                let b = recommend(s, t, &weights, &thresholds).unwrap();
                assert_eq!(a, b);
                let expected = if a.score >= 0.25 {
                    Label::Buy
                } else if a.score <= -0.15 {
                    Label::Sell
                } else {
                    Label::Hold
                };
                assert_eq!(a.label, expected);
            }
        }
    }

    #[test]
    fn derive_weights_regimes() {
        let p = WeightPolicy::default();
        assert_eq!(derive_weights(0.0, &p), p.calm);
        assert_eq!(derive_weights(0.01, &p), p.calm);
        assert_eq!(derive_weights(0.5, &p), p.turbulent);
        assert_eq!(derive_weights(f64::NAN, &p), p.neutral);
        assert_eq!(derive_weights(-1.0, &p), p.neutral);

        let mid = derive_weights(0.02, &p);
        assert!(approx(mid.sentiment_weight, 0.5));
        assert!(approx(mid.trend_weight, 0.5));
    }

    #[test]
    fn derive_weights_is_continuous_and_deterministic() {
        let p = WeightPolicy::default();
        let just_above_calm = derive_weights(0.01 + 1e-9, &p);
        assert!((just_above_calm.sentiment_weight - 0.3).abs() < 1e-6);
        let just_below_turbulent = derive_weights(0.03 - 1e-9, &p);
        assert!((just_below_turbulent.sentiment_weight - 0.7).abs() < 1e-6);
        assert_eq!(derive_weights(0.017, &p), derive_weights(0.017, &p));
    }

    #[test]
    fn policy_validation() {
        assert!(WeightPolicy::default().validate().is_ok());
        let bad = WeightPolicy {
            turbulent_volatility: 0.005,
            ..WeightPolicy::default()
        };
        assert!(bad.validate().is_err());
        let bad = WeightPolicy {
            calm: WeightConfig::new(-0.3, 0.7),
            ..WeightPolicy::default()
        };
        assert!(bad.validate().is_err());
    }
}
