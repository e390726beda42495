pub mod provider;
pub mod types;
pub mod yahoo;
pub mod yahoo_news;

use crate::domain::market::{LookbackWindow, PriceSeries};
use crate::domain::news::NewsArticle;
use crate::error::AnalysisError;

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Fails with `DataUnavailable` when the ticker is unknown or the window holds no data.
    async fn fetch_price_series(
        &self,
        ticker: &str,
        window: LookbackWindow,
    ) -> Result<PriceSeries, AnalysisError>;
}

#[async_trait::async_trait]
pub trait NewsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// May return an empty list.
    async fn fetch_recent_news(
        &self,
        ticker: &str,
        max_articles: usize,
    ) -> Result<Vec<NewsArticle>, AnalysisError>;
}
