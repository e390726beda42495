use crate::domain::market::{LookbackWindow, PricePoint, PriceSeries};
use crate::error::AnalysisError;
use crate::ingest::MarketDataProvider;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Daily closes from the Yahoo Finance v8 chart endpoint.
#[derive(Debug, Clone)]
pub struct YahooChartProvider {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChartProvider {
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("YAHOO_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs = std::env::var("YAHOO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build yahoo http client")?;

        Ok(Self { http, base_url })
    }

    async fn fetch_chart(&self, ticker: &str, window: LookbackWindow) -> Result<ChartResponse> {
        let period1 = window.start.and_time(NaiveTime::MIN).and_utc().timestamp();
        // period2 is exclusive; extend to the end of the last day.
        let period2 = (window.end + chrono::Duration::days(1))
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();

        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url.trim_end_matches('/'),
            ticker
        );
        let res = self
            .http
            .get(url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await
            .context("yahoo chart request failed")?;

        let status = res.status();
        let text = res.text().await.context("failed to read yahoo response")?;
        // Unknown symbols come back as 404 with a JSON error body; let the body speak.
        let parsed = serde_json::from_str::<ChartResponse>(&text)
            .with_context(|| format!("yahoo HTTP {status}: unexpected body: {text}"))?;
        Ok(parsed)
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for YahooChartProvider {
    fn provider_name(&self) -> &'static str {
        "yahoo_chart"
    }

    async fn fetch_price_series(
        &self,
        ticker: &str,
        window: LookbackWindow,
    ) -> Result<PriceSeries, AnalysisError> {
        let chart = self
            .fetch_chart(ticker, window)
            .await
            .map_err(|e| AnalysisError::prices_unavailable(ticker, format!("{e:#}")))?;
        series_from_chart(ticker, window, chart)
    }
}

fn series_from_chart(
    ticker: &str,
    window: LookbackWindow,
    chart: ChartResponse,
) -> Result<PriceSeries, AnalysisError> {
    if let Some(err) = chart.chart.error {
        return Err(AnalysisError::prices_unavailable(
            ticker,
            format!("{}: {}", err.code, err.description),
        ));
    }

    let result = chart
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| AnalysisError::prices_unavailable(ticker, "empty chart result"))?;

    let offset = result.meta.gmtoffset.unwrap_or(0);
    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let points: Vec<PricePoint> = result
        .timestamp
        .unwrap_or_default()
        .into_iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            let close = close?;
            // Exchange-local trading date.
            let date = DateTime::from_timestamp(ts + offset, 0)?.date_naive();
            window
                .contains(date)
                .then_some(PricePoint { date, close })
        })
        .collect();

    PriceSeries::from_unordered(ticker, points)
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}
