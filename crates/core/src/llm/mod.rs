pub mod anthropic;
pub mod cache;
pub mod error;
pub mod json;

use crate::llm::error::OracleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    /// Test doubles and in-process scorers.
    Local,
}

/// External service that rates the tone of a piece of text.
#[async_trait::async_trait]
pub trait SentimentOracle: Send + Sync {
    fn provider(&self) -> Provider;

    /// Returns a score in [-1, 1].
    async fn score_sentiment(&self, text: &str) -> Result<f64, OracleError>;
}
