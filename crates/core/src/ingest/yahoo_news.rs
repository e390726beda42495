use crate::domain::news::NewsArticle;
use crate::error::AnalysisError;
use crate::ingest::NewsProvider;
use anyhow::{Context, Result};
use chrono::DateTime;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_BODY_TIMEOUT_SECS: u64 = 5;
const BODY_FETCH_WORKERS: usize = 5;
/// Headlines requested per wanted article; some links yield no usable body.
const CANDIDATES_PER_ARTICLE: usize = 2;
const MAX_CANDIDATES: usize = 50;
pub const MIN_BODY_CHARS: usize = 50;
pub const MAX_BODY_CHARS: usize = 5000;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").expect("valid paragraph regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)>")
        .expect("valid noise regex")
});

/// Ticker headlines from the Yahoo Finance search endpoint, with each article body
/// fetched from its link and reduced to paragraph text.
#[derive(Debug, Clone)]
pub struct YahooNewsProvider {
    http: reqwest::Client,
    base_url: String,
    body_timeout: Duration,
}

impl YahooNewsProvider {
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("YAHOO_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs = std::env::var("YAHOO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let body_timeout_secs = std::env::var("YAHOO_NEWS_BODY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_BODY_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build yahoo news http client")?;

        Ok(Self {
            http,
            base_url,
            body_timeout: Duration::from_secs(body_timeout_secs),
        })
    }

    async fn search(&self, ticker: &str, count: usize) -> Result<SearchResponse> {
        let url = format!("{}/v1/finance/search", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .get(url)
            .query(&[
                ("q", ticker.to_string()),
                ("quotesCount", "0".to_string()),
                ("newsCount", count.to_string()),
            ])
            .send()
            .await
            .context("yahoo news search request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read yahoo news response")?;
        anyhow::ensure!(status.is_success(), "yahoo news HTTP {status}: {text}");

        serde_json::from_str::<SearchResponse>(&text)
            .with_context(|| format!("yahoo news: unexpected body: {text}"))
    }
}

async fn fetch_body(http: reqwest::Client, url: String, timeout: Duration) -> Result<String> {
    let res = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("article request failed: {url}"))?;
    let status = res.status();
    anyhow::ensure!(status.is_success(), "article HTTP {status}: {url}");
    res.text()
        .await
        .with_context(|| format!("failed to read article: {url}"))
}

#[async_trait::async_trait]
impl NewsProvider for YahooNewsProvider {
    fn provider_name(&self) -> &'static str {
        "yahoo_news"
    }

    async fn fetch_recent_news(
        &self,
        ticker: &str,
        max_articles: usize,
    ) -> Result<Vec<NewsArticle>, AnalysisError> {
        if max_articles == 0 {
            return Ok(Vec::new());
        }

        let count = max_articles
            .saturating_mul(CANDIDATES_PER_ARTICLE)
            .min(MAX_CANDIDATES);
        let search = self
            .search(ticker, count)
            .await
            .map_err(|e| AnalysisError::news_unavailable(ticker, format!("{e:#}")))?;
        let headlines = headlines_from_search(ticker, search);

        let permits = Arc::new(Semaphore::new(BODY_FETCH_WORKERS));
        let mut tasks = JoinSet::new();
        for (idx, headline) in headlines.iter().enumerate() {
            let permits = Arc::clone(&permits);
            let http = self.http.clone();
            let url = headline.link.clone();
            let timeout = self.body_timeout;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (idx, fetch_body(http, url, timeout).await)
            });
        }

        let mut bodies: Vec<Option<String>> = vec![None; headlines.len()];
        while let Some(joined) = tasks.join_next().await {
            let Ok((idx, fetched)) = joined else {
                continue;
            };
            match fetched {
                Ok(html) => match article_text(&html) {
                    Some(text) => bodies[idx] = Some(text),
                    None => tracing::info!(
                        url = %headlines[idx].link,
                        "skipping article with insufficient content"
                    ),
                },
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "article fetch failed"),
            }
        }

        let articles: Vec<NewsArticle> = headlines
            .into_iter()
            .zip(bodies)
            .filter_map(|(headline, body)| body.map(|text| headline.into_article(text)))
            .take(max_articles)
            .collect();

        tracing::info!(
            %ticker,
            articles = articles.len(),
            candidates = count,
            "fetched yahoo news"
        );
        Ok(articles)
    }
}

#[derive(Debug, Clone)]
struct Headline {
    title: String,
    link: String,
    publisher: Option<String>,
    published_at: Option<DateTime<chrono::Utc>>,
}

impl Headline {
    fn into_article(self, text: String) -> NewsArticle {
        let mut article = NewsArticle::new(text).with_title(self.title);
        if let Some(published_at) = self.published_at {
            article = article.with_published_at(published_at);
        }
        article.url = Some(self.link);
        article.source = self.publisher;
        article
    }
}

/// Linked stories only, newest first, one per link.
fn headlines_from_search(ticker: &str, search: SearchResponse) -> Vec<Headline> {
    let mut items: Vec<SearchNewsItem> = search
        .news
        .into_iter()
        .filter(|item| item.link.starts_with("http"))
        .filter(|item| {
            item.related_tickers.is_empty()
                || item
                    .related_tickers
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(ticker))
        })
        .collect();
    items.sort_by(|a, b| b.provider_publish_time.cmp(&a.provider_publish_time));
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.link.clone()));

    items
        .into_iter()
        .map(|item| Headline {
            published_at: item
                .provider_publish_time
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            title: item.title,
            link: item.link,
            publisher: item.publisher,
        })
        .collect()
}

/// Paragraph text of an HTML page, or `None` when it is too short to score.
fn article_text(html: &str) -> Option<String> {
    let html = NOISE.replace_all(html, " ");
    let joined = PARAGRAPH
        .captures_iter(&html)
        .filter_map(|c| c.get(1))
        .map(|m| collapse_whitespace(&decode_entities(&TAG.replace_all(m.as_str(), " "))))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if joined.chars().count() < MIN_BODY_CHARS {
        return None;
    }
    Some(joined.chars().take(MAX_BODY_CHARS).collect())
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<SearchNewsItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNewsItem {
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    provider_publish_time: Option<i64>,
    #[serde(default)]
    related_tickers: Vec<String>,
}
