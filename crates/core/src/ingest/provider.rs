use crate::domain::market::{LookbackWindow, PricePoint, PriceSeries};
use crate::domain::news::NewsArticle;
use crate::error::AnalysisError;
use crate::ingest::types::{NewsItem, NewsResponse, PriceHistoryResponse};
use crate::ingest::{MarketDataProvider, NewsProvider};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const MAX_RETRIES: u32 = 10;
const MAX_BACKOFF_EXPONENT: u32 = 6;
const DEFAULT_PRICES_PATH: &str = "/v1/prices";
const DEFAULT_NEWS_PATH: &str = "/v1/news";

/// Non-success HTTP status from a provider.
#[derive(Debug, Error)]
#[error("provider HTTP {status}: {body}")]
pub struct HttpStatusError {
    pub status: StatusCode,
    pub body: String,
}

impl HttpStatusError {
    fn is_retryable(&self) -> bool {
        self.status.is_server_error() || self.status == StatusCode::TOO_MANY_REQUESTS
    }
}

/// Generic JSON-over-HTTP feed serving price history and/or news.
///
/// `GET {base}{prices_path}?ticker=..&start=..&end=..` -> [`PriceHistoryResponse`]
/// `GET {base}{news_path}?ticker=..&limit=..` -> [`NewsResponse`]
#[derive(Debug, Clone)]
pub struct HttpJsonDataProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    prices_path: String,
    news_path: String,
    retries: u32,
}

impl HttpJsonDataProvider {
    /// Reads `{prefix}_TIMEOUT_SECS`, `{prefix}_RETRIES`, `{prefix}_PRICES_PATH` and
    /// `{prefix}_NEWS_PATH` on top of the given base URL and key.
    pub fn from_env(prefix: &str, base_url: &str, api_key: Option<String>) -> Result<Self> {
        let var = |name: &str| {
            std::env::var(format!("{prefix}_{name}"))
                .ok()
                .filter(|s| !s.trim().is_empty())
        };

        let timeout_secs = var("TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retries = var("RETRIES")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key,
            prices_path: var("PRICES_PATH").unwrap_or_else(|| DEFAULT_PRICES_PATH.to_string()),
            news_path: var("NEWS_PATH").unwrap_or_else(|| DEFAULT_NEWS_PATH.to_string()),
            retries: retries.clamp(1, MAX_RETRIES),
        })
    }

    fn url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_once(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .context("data provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read provider response")?;

        if !status.is_success() {
            return Err(HttpStatusError { status, body: text }.into());
        }

        serde_json::from_str::<Value>(&text)
            .with_context(|| format!("provider response is not valid JSON: {text}"))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(path, query).await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    let retryable = err
                        .downcast_ref::<HttpStatusError>()
                        .map_or(true, HttpStatusError::is_retryable);
                    if !retryable || attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = backoff_for(attempt);
                    tracing::warn!(attempt, ?backoff, path, error = %err, "data provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonDataProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_price_series(
        &self,
        ticker: &str,
        window: LookbackWindow,
    ) -> Result<PriceSeries, AnalysisError> {
        let query = [
            ("ticker", ticker.to_string()),
            ("start", window.start.to_string()),
            ("end", window.end.to_string()),
        ];
        let raw = self
            .get_json(&self.prices_path, &query)
            .await
            .map_err(|e| AnalysisError::prices_unavailable(ticker, format!("{e:#}")))?;
        let parsed = serde_json::from_value::<PriceHistoryResponse>(raw).map_err(|e| {
            AnalysisError::prices_unavailable(ticker, format!("unexpected price payload: {e}"))
        })?;
        price_series_from_response(ticker, window, parsed)
    }
}

#[async_trait::async_trait]
impl NewsProvider for HttpJsonDataProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_recent_news(
        &self,
        ticker: &str,
        max_articles: usize,
    ) -> Result<Vec<NewsArticle>, AnalysisError> {
        if max_articles == 0 {
            return Ok(Vec::new());
        }

        let query = [
            ("ticker", ticker.to_string()),
            ("limit", max_articles.to_string()),
        ];
        let raw = self
            .get_json(&self.news_path, &query)
            .await
            .map_err(|e| AnalysisError::news_unavailable(ticker, format!("{e:#}")))?;
        let parsed = serde_json::from_value::<NewsResponse>(raw).map_err(|e| {
            AnalysisError::news_unavailable(ticker, format!("unexpected news payload: {e}"))
        })?;

        Ok(articles_from_response(parsed, max_articles))
    }
}

/// 1s, 2s, 4s, ... capped at 64s.
fn backoff_for(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    Duration::from_secs(1u64 << exponent)
}

fn price_series_from_response(
    ticker: &str,
    window: LookbackWindow,
    resp: PriceHistoryResponse,
) -> Result<PriceSeries, AnalysisError> {
    if !resp.ticker.eq_ignore_ascii_case(ticker) {
        return Err(AnalysisError::prices_unavailable(
            ticker,
            format!("provider ticker mismatch: got {}", resp.ticker),
        ));
    }

    let points: Vec<PricePoint> = resp
        .items
        .into_iter()
        .filter(|item| window.contains(item.date))
        .filter_map(|item| item.close.map(|close| PricePoint { date: item.date, close }))
        .collect();

    PriceSeries::from_unordered(ticker, points)
}

fn articles_from_response(resp: NewsResponse, max_articles: usize) -> Vec<NewsArticle> {
    let mut items: Vec<NewsItem> = resp
        .items
        .into_iter()
        .filter(|item| item.body().is_some())
        .collect();

    // Newest first; undated items last.
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    items.truncate(max_articles);

    items
        .into_iter()
        .map(|item| NewsArticle {
            text: item.body().unwrap_or_default().to_string(),
            published_at: item.published_at,
            title: item.title,
            url: item.url,
            source: item.source,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn window() -> LookbackWindow {
        LookbackWindow::ending(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(), 30).unwrap()
    }

    #[test]
    fn builds_series_from_price_payload() {
        let v = json!({
            "ticker": "AAPL",
            "items": [
                {"date": "2026-03-03", "close": 101.5},
                {"date": "2026-03-02", "close": 100.0},
                {"date": "2026-03-04", "close": null},
                {"date": "2025-12-31", "close": 90.0}
            ]
        });
        let parsed: PriceHistoryResponse = serde_json::from_value(v).unwrap();
        let series = price_series_from_response("aapl", window(), parsed).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].close, 100.0);
        assert_eq!(series.last().close, 101.5);
    }

    #[test]
    fn empty_window_is_data_unavailable() {
        let parsed: PriceHistoryResponse =
            serde_json::from_value(json!({"ticker": "ZZZZ", "items": []})).unwrap();
        let err = price_series_from_response("ZZZZ", window(), parsed).unwrap_err();
        assert!(matches!(err, AnalysisError::DataUnavailable { .. }));
    }

    #[test]
    fn rejects_non_numeric_close_via_deserialize() {
        let v = json!({"ticker": "AAPL", "items": [{"date": "2026-03-02", "close": "100"}]});
        assert!(serde_json::from_value::<PriceHistoryResponse>(v).is_err());
    }

    #[test]
    fn news_payload_is_filtered_sorted_and_capped() {
        let v = json!({
            "ticker": "AAPL",
            "items": [
                {"title": "old", "content": "old body", "published_at": "2026-03-01T10:00:00Z"},
                {"title": "empty", "text": "   "},
                {"title": "new", "text": "new body", "published_at": "2026-03-02T10:00:00Z"},
                {"title": "undated", "summary": "undated body"}
            ]
        });
        let parsed: NewsResponse = serde_json::from_value(v).unwrap();
        let articles = articles_from_response(parsed, 2);
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title.as_deref(), Some("new"));
        assert_eq!(articles[1].text, "old body");
    }

    #[test]
    fn items_with_content_and_summary_parse() {
        let v = json!({
            "ticker": "AAPL",
            "items": [
                {"title": "both", "content": "full body", "summary": "teaser"},
                {"title": "blank text", "text": " ", "summary": "summary only"}
            ]
        });
        let parsed: NewsResponse = serde_json::from_value(v).unwrap();
        let articles = articles_from_response(parsed, 10);
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].text, "full body");
        assert_eq!(articles[1].text, "summary only");
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(3), Duration::from_secs(4));
        assert_eq!(backoff_for(7), Duration::from_secs(64));
        assert_eq!(backoff_for(u32::MAX), Duration::from_secs(64));
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let not_found = HttpStatusError {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        let throttled = HttpStatusError {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        assert!(!not_found.is_retryable());
        assert!(throttled.is_retryable());
    }
}
