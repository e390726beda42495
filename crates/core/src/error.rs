use crate::llm::error::OracleError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline stage an [`AnalysisError`] is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    MarketData,
    News,
    Trend,
    Sentiment,
    Recommendation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::MarketData => "market_data",
            Stage::News => "news",
            Stage::Trend => "trend",
            Stage::Sentiment => "sentiment",
            Stage::Recommendation => "recommendation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Prices,
    News,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Prices => f.write_str("prices"),
            DataSource::News => f.write_str("news"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("insufficient price history: {points} point(s), need at least {required}")]
    InsufficientData { points: usize, required: usize },

    #[error("sentiment unavailable: all {failed} of {attempted} article scorings failed")]
    SentimentUnavailable { attempted: usize, failed: usize },

    #[error("invalid weights (sentiment={sentiment_weight}, trend={trend_weight}): weights must be finite and non-negative")]
    InvalidWeight {
        sentiment_weight: f64,
        trend_weight: f64,
    },

    #[error("invalid {name} score: {value}")]
    InvalidScore { name: &'static str, value: f64 },

    #[error("{feed} unavailable for {ticker}: {reason}")]
    DataUnavailable {
        feed: DataSource,
        ticker: String,
        reason: String,
    },

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("analysis cancelled during {stage} stage")]
    Cancelled { stage: Stage },
}

impl AnalysisError {
    pub fn stage(&self) -> Stage {
        match self {
            AnalysisError::InsufficientData { .. } => Stage::Trend,
            AnalysisError::SentimentUnavailable { .. } | AnalysisError::Oracle(_) => {
                Stage::Sentiment
            }
            AnalysisError::InvalidWeight { .. } | AnalysisError::InvalidScore { .. } => {
                Stage::Recommendation
            }
            AnalysisError::DataUnavailable { feed, .. } => match feed {
                DataSource::Prices => Stage::MarketData,
                DataSource::News => Stage::News,
            },
            AnalysisError::Cancelled { stage } => *stage,
        }
    }

    pub fn prices_unavailable(ticker: &str, reason: impl Into<String>) -> Self {
        AnalysisError::DataUnavailable {
            feed: DataSource::Prices,
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }

    pub fn news_unavailable(ticker: &str, reason: impl Into<String>) -> Self {
        AnalysisError::DataUnavailable {
            feed: DataSource::News,
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    #[test]
    fn stage_follows_variant() {
        let err = AnalysisError::InsufficientData {
            points: 1,
            required: 2,
        };
        assert_eq!(err.stage(), Stage::Trend);

        let err = AnalysisError::news_unavailable("AAPL", "HTTP 503");
        assert_eq!(err.stage(), Stage::News);
        assert_eq!(err.to_string(), "news unavailable for AAPL: HTTP 503");

        let err: AnalysisError = OracleError {
            provider: Provider::Anthropic,
            stage: "http",
            detail: "status=429".to_string(),
            raw_output: None,
        }
        .into();
        assert_eq!(err.stage(), Stage::Sentiment);
    }

    #[test]
    fn stage_serializes_snake_case() {
        let v = serde_json::to_value(Stage::MarketData).unwrap();
        assert_eq!(v, serde_json::json!("market_data"));
        assert_eq!(Stage::MarketData.to_string(), "market_data");
    }
}
