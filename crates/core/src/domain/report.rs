use crate::analysis::sentiment::SentimentSummary;
use crate::analysis::trend::TrendReport;
use crate::domain::market::PriceSeries;
use crate::domain::recommendation::{Label, Recommendation, Thresholds, WeightConfig};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Everything the dashboard shows for one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub ticker: String,
    pub as_of_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub recommendation: Recommendation,
    pub sentiment: SentimentSummary,
    pub trend: TrendReport,
    pub prices: PriceSeries,
    pub volatility: f64,
    pub weights: WeightConfig,
    pub thresholds: Thresholds,
    pub reasoning: String,
}

pub fn reasoning(sentiment: f64, trend: f64, label: Label) -> String {
    let action = match label {
        Label::Buy => "buy",
        Label::Hold => "hold",
        Label::Sell => "sell",
    };
    format!(
        "Based on the recent news sentiment ({sentiment:.2}) and stock trend ({trend:.2}), \
         the recommendation is '{label}'. The overall market trend combined with the sentiment \
         suggests that investors should {action} this stock."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_mentions_scores_and_label() {
        let s = reasoning(0.4249, -0.1, Label::Hold);
        assert!(s.contains("(0.42)"));
        assert!(s.contains("(-0.10)"));
        assert!(s.contains("'Hold'"));
        assert!(s.ends_with("should hold this stock."));
    }
}
