use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Buy,
    Hold,
    Sell,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Buy => "Buy",
            Label::Hold => "Hold",
            Label::Sell => "Sell",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub score: f64,
    pub label: Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    pub sentiment_weight: f64,
    pub trend_weight: f64,
}

impl WeightConfig {
    pub const fn new(sentiment_weight: f64, trend_weight: f64) -> Self {
        Self {
            sentiment_weight,
            trend_weight,
        }
    }

    pub fn is_valid(&self) -> bool {
        let ok = |w: f64| w.is_finite() && w >= 0.0;
        ok(self.sentiment_weight) && ok(self.trend_weight)
    }
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self::new(0.5, 0.5)
    }
}

/// Label cut-offs: `score >= buy` is Buy, `score <= sell` is Sell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub buy: f64,
    pub sell: f64,
}

impl Thresholds {
    pub fn new(buy: f64, sell: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            buy.is_finite() && sell.is_finite(),
            "thresholds must be finite (buy={buy}, sell={sell})"
        );
        anyhow::ensure!(
            buy > sell,
            "buy threshold must exceed sell threshold (buy={buy}, sell={sell})"
        );
        Ok(Self { buy, sell })
    }

    pub fn label(&self, score: f64) -> Label {
        if score >= self.buy {
            Label::Buy
        } else if score <= self.sell {
            Label::Sell
        } else {
            Label::Hold
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            buy: 0.2,
            sell: -0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_partition_the_line() {
        let t = Thresholds::new(0.4, -0.3).unwrap();
        assert_eq!(t.label(0.4), Label::Buy);
        assert_eq!(t.label(0.39), Label::Hold);
        assert_eq!(t.label(-0.3), Label::Sell);
        assert_eq!(t.label(-0.29), Label::Hold);
        assert_eq!(t.label(f64::INFINITY), Label::Buy);
    }

    #[test]
    fn thresholds_reject_inverted_cutoffs() {
        assert!(Thresholds::new(-0.2, 0.2).is_err());
        assert!(Thresholds::new(0.1, 0.1).is_err());
        assert!(Thresholds::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn stored_label_text_matches_json() {
        for label in [Label::Buy, Label::Hold, Label::Sell] {
            let json = serde_json::to_string(&label).unwrap();
            assert_eq!(json, format!("\"{}\"", label.as_str()));
            assert_eq!(serde_json::from_str::<Label>(&json).unwrap(), label);
        }
    }

    #[test]
    fn weight_validity() {
        assert!(WeightConfig::new(0.0, 0.0).is_valid());
        assert!(!WeightConfig::new(-0.1, 0.5).is_valid());
        assert!(!WeightConfig::new(0.5, f64::NAN).is_valid());
    }
}
