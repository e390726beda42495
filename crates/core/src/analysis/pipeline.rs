use crate::analysis::engine::{derive_weights, recommend};
use crate::analysis::sentiment::SentimentAggregator;
use crate::analysis::trend::{compute_trend, realized_volatility};
use crate::config::{EngineConfig, Settings};
use crate::domain::market::LookbackWindow;
use crate::domain::report::{reasoning, AnalysisReport};
use crate::error::{AnalysisError, Stage};
use crate::ingest::provider::HttpJsonDataProvider;
use crate::ingest::yahoo::YahooChartProvider;
use crate::ingest::yahoo_news::YahooNewsProvider;
use crate::ingest::{MarketDataProvider, NewsProvider};
use crate::llm::anthropic::AnthropicOracle;
use crate::llm::cache::SentimentCache;
use crate::present::{present_best_effort, ReportSink};
use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::sync::Arc;

/// Runs one ticker through fetch, trend, sentiment and the recommendation engine.
pub struct Analyzer {
    market: Arc<dyn MarketDataProvider>,
    news: Arc<dyn NewsProvider>,
    sentiment: SentimentAggregator,
    config: EngineConfig,
}

impl Analyzer {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        news: Arc<dyn NewsProvider>,
        sentiment: SentimentAggregator,
        config: EngineConfig,
    ) -> Self {
        Self {
            market,
            news,
            sentiment,
            config,
        }
    }

    /// Prices and news come from Yahoo Finance unless `MARKET_DATA_BASE_URL` or
    /// `NEWS_PROVIDER_BASE_URL` points at a JSON feed.
    pub fn from_settings(settings: &Settings, config: EngineConfig) -> anyhow::Result<Self> {
        let market: Arc<dyn MarketDataProvider> = match settings.custom_market_feed() {
            Some(base_url) => Arc::new(HttpJsonDataProvider::from_env(
                "MARKET_DATA",
                base_url,
                settings.market_data_api_key.clone(),
            )?),
            None => Arc::new(YahooChartProvider::from_env()?),
        };
        let news: Arc<dyn NewsProvider> = match settings.custom_news_feed() {
            Some(base_url) => Arc::new(HttpJsonDataProvider::from_env(
                "NEWS_PROVIDER",
                base_url,
                settings.news_provider_api_key.clone(),
            )?),
            None => Arc::new(YahooNewsProvider::from_env()?),
        };

        let oracle = Arc::new(AnthropicOracle::from_settings(settings)?);
        let mut sentiment = SentimentAggregator::new(oracle, config.sentiment.clone());
        if config.cache_capacity > 0 {
            sentiment =
                sentiment.with_cache(SentimentCache::new(config.cache_capacity, config.cache_ttl));
        }

        tracing::info!(
            market = market.provider_name(),
            news = news.provider_name(),
            cache_capacity = config.cache_capacity,
            workers = config.sentiment.workers,
            "analyzer ready"
        );
        Ok(Self::new(market, news, sentiment, config))
    }

    pub async fn analyze(
        &self,
        ticker: &str,
        as_of: NaiveDate,
    ) -> Result<AnalysisReport, AnalysisError> {
        self.analyze_until(ticker, as_of, std::future::pending::<()>())
            .await
    }

    /// Gives up with `Cancelled` once `cancel` resolves, tagged with the stage that was running.
    pub async fn analyze_until<C>(
        &self,
        ticker: &str,
        as_of: NaiveDate,
        cancel: C,
    ) -> Result<AnalysisReport, AnalysisError>
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let ticker = ticker.trim().to_ascii_uppercase();
        let window = LookbackWindow::ending(as_of, self.config.lookback_days).ok_or_else(|| {
            AnalysisError::prices_unavailable(
                &ticker,
                format!(
                    "lookback of {} days from {as_of} is out of range",
                    self.config.lookback_days
                ),
            )
        })?;

        let fetch = async {
            tokio::try_join!(
                self.market.fetch_price_series(&ticker, window),
                self.news
                    .fetch_recent_news(&ticker, self.config.max_articles),
            )
        };
        let (series, articles) = tokio::select! {
            biased;
            _ = &mut cancel => {
                return Err(AnalysisError::Cancelled { stage: Stage::MarketData });
            }
            fetched = fetch => fetched?,
        };
        tracing::info!(
            ticker = %ticker,
            market = self.market.provider_name(),
            news = self.news.provider_name(),
            prices = series.len(),
            articles = articles.len(),
            "inputs fetched"
        );

        // Trend first so an unusable series never costs oracle calls.
        let trend = compute_trend(&series, &self.config.trend)?;
        let sentiment = self.sentiment.aggregate_until(&articles, &mut cancel).await?;

        let volatility = realized_volatility(&series);
        let weights = derive_weights(volatility, &self.config.weight_policy);
        let recommendation = recommend(
            sentiment.score,
            trend.score,
            &weights,
            &self.config.thresholds,
        )?;

        tracing::info!(
            ticker = %ticker,
            %as_of,
            sentiment = sentiment.score,
            trend = trend.score,
            volatility,
            sentiment_weight = weights.sentiment_weight,
            trend_weight = weights.trend_weight,
            score = recommendation.score,
            label = %recommendation.label,
            "recommendation ready"
        );

        Ok(AnalysisReport {
            reasoning: reasoning(sentiment.score, trend.score, recommendation.label),
            ticker,
            as_of_date: as_of,
            generated_at: Utc::now(),
            recommendation,
            sentiment,
            trend,
            prices: series,
            volatility,
            weights,
            thresholds: self.config.thresholds,
        })
    }

    /// Analyzes and hands the report to `sink`. Sink failures are logged, not returned.
    pub async fn analyze_and_present(
        &self,
        ticker: &str,
        as_of: NaiveDate,
        sink: &dyn ReportSink,
    ) -> Result<AnalysisReport, AnalysisError> {
        let report = self.analyze(ticker, as_of).await?;
        present_best_effort(sink, &report).await;
        Ok(report)
    }
}
