pub mod analysis;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod present;
pub mod storage;
pub mod time;

pub mod config {
    use crate::analysis::engine::WeightPolicy;
    use crate::analysis::sentiment::{SentimentConfig, MAX_WORKERS};
    use crate::analysis::trend::TrendConfig;
    use crate::domain::market::MAX_LOOKBACK_DAYS;
    use crate::domain::recommendation::{Thresholds, WeightConfig};
    use anyhow::Context;
    use std::str::FromStr;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub market_data_base_url: Option<String>,
        pub market_data_api_key: Option<String>,
        pub news_provider_base_url: Option<String>,
        pub news_provider_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                market_data_base_url: std::env::var("MARKET_DATA_BASE_URL").ok(),
                market_data_api_key: std::env::var("MARKET_DATA_API_KEY").ok(),
                news_provider_base_url: std::env::var("NEWS_PROVIDER_BASE_URL").ok(),
                news_provider_api_key: std::env::var("NEWS_PROVIDER_API_KEY").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        /// Self-hosted JSON price feed; Yahoo chart data is used when unset.
        pub fn custom_market_feed(&self) -> Option<&str> {
            non_blank(self.market_data_base_url.as_deref())
        }

        /// Self-hosted JSON news feed; Yahoo Finance news is used when unset.
        pub fn custom_news_feed(&self) -> Option<&str> {
            non_blank(self.news_provider_base_url.as_deref())
        }
    }

    fn non_blank(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|s| !s.is_empty())
    }

    /// Tunables of the recommendation pipeline.
    #[derive(Debug, Clone)]
    pub struct EngineConfig {
        pub lookback_days: u32,
        pub max_articles: usize,
        pub sentiment: SentimentConfig,
        pub cache_capacity: usize,
        pub cache_ttl: Duration,
        pub trend: TrendConfig,
        pub weight_policy: WeightPolicy,
        pub thresholds: Thresholds,
    }

    impl Default for EngineConfig {
        fn default() -> Self {
            Self {
                lookback_days: 365,
                max_articles: 10,
                sentiment: SentimentConfig::default(),
                cache_capacity: 512,
                cache_ttl: Duration::from_secs(3600),
                trend: TrendConfig::default(),
                weight_policy: WeightPolicy::default(),
                thresholds: Thresholds::default(),
            }
        }
    }

    impl EngineConfig {
        pub fn from_env() -> anyhow::Result<Self> {
            let d = Self::default();
            let policy = WeightPolicy {
                calm_volatility: env_or("WEIGHT_CALM_VOLATILITY", d.weight_policy.calm_volatility)?,
                turbulent_volatility: env_or(
                    "WEIGHT_TURBULENT_VOLATILITY",
                    d.weight_policy.turbulent_volatility,
                )?,
                calm: WeightConfig::new(
                    env_or("WEIGHT_CALM_SENTIMENT", d.weight_policy.calm.sentiment_weight)?,
                    env_or("WEIGHT_CALM_TREND", d.weight_policy.calm.trend_weight)?,
                ),
                turbulent: WeightConfig::new(
                    env_or(
                        "WEIGHT_TURBULENT_SENTIMENT",
                        d.weight_policy.turbulent.sentiment_weight,
                    )?,
                    env_or("WEIGHT_TURBULENT_TREND", d.weight_policy.turbulent.trend_weight)?,
                ),
                neutral: d.weight_policy.neutral,
            };

            let cfg = Self {
                lookback_days: env_or("LOOKBACK_DAYS", d.lookback_days)?,
                max_articles: env_or("MAX_ARTICLES", d.max_articles)?,
                sentiment: SentimentConfig {
                    workers: env_or("SENTIMENT_WORKERS", d.sentiment.workers)?,
                    oracle_timeout: Duration::from_secs(env_or(
                        "ORACLE_TIMEOUT_SECS",
                        d.sentiment.oracle_timeout.as_secs(),
                    )?),
                    deadline: Duration::from_secs(env_or(
                        "SENTIMENT_DEADLINE_SECS",
                        d.sentiment.deadline.as_secs(),
                    )?),
                    max_article_chars: env_or(
                        "SENTIMENT_MAX_ARTICLE_CHARS",
                        d.sentiment.max_article_chars,
                    )?,
                    min_article_chars: env_or(
                        "SENTIMENT_MIN_ARTICLE_CHARS",
                        d.sentiment.min_article_chars,
                    )?,
                },
                cache_capacity: env_or("SENTIMENT_CACHE_CAPACITY", d.cache_capacity)?,
                cache_ttl: Duration::from_secs(env_or(
                    "SENTIMENT_CACHE_TTL_SECS",
                    d.cache_ttl.as_secs(),
                )?),
                trend: TrendConfig {
                    short_window: env_or("TREND_SHORT_WINDOW", d.trend.short_window)?,
                    long_window: env_or("TREND_LONG_WINDOW", d.trend.long_window)?,
                    ma_gain: env_or("TREND_MA_GAIN", d.trend.ma_gain)?,
                    pct_gain: env_or("TREND_PCT_GAIN", d.trend.pct_gain)?,
                },
                weight_policy: policy,
                thresholds: Thresholds::new(
                    env_or("BUY_THRESHOLD", d.thresholds.buy)?,
                    env_or("SELL_THRESHOLD", d.thresholds.sell)?,
                )?,
            };
            cfg.validate()?;
            Ok(cfg)
        }

        pub fn validate(&self) -> anyhow::Result<()> {
            anyhow::ensure!(
                (1..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days),
                "LOOKBACK_DAYS must be between 1 and {MAX_LOOKBACK_DAYS}"
            );
            anyhow::ensure!(
                (1..=MAX_WORKERS).contains(&self.sentiment.workers),
                "SENTIMENT_WORKERS must be between 1 and {MAX_WORKERS}"
            );
            anyhow::ensure!(
                !self.sentiment.oracle_timeout.is_zero(),
                "ORACLE_TIMEOUT_SECS must be >= 1"
            );
            anyhow::ensure!(
                !self.sentiment.deadline.is_zero(),
                "SENTIMENT_DEADLINE_SECS must be >= 1"
            );
            anyhow::ensure!(
                self.sentiment.max_article_chars >= 1,
                "SENTIMENT_MAX_ARTICLE_CHARS must be >= 1"
            );
            anyhow::ensure!(
                self.thresholds.buy > self.thresholds.sell,
                "BUY_THRESHOLD must be greater than SELL_THRESHOLD"
            );
            self.trend.validate()?;
            self.weight_policy.validate()?;
            Ok(())
        }
    }

    fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match std::env::var(name) {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid {name}={s:?}: {e}")),
            _ => Ok(default),
        }
    }

}
