use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryResponse {
    pub ticker: String,
    pub items: Vec<PriceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceItem {
    pub date: NaiveDate,
    pub close: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsResponse {
    pub ticker: String,
    pub items: Vec<NewsItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl NewsItem {
    /// Fullest non-blank body: `text`, then `content`, then `summary`.
    pub fn body(&self) -> Option<&str> {
        [&self.text, &self.content, &self.summary]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .find(|body| !body.trim().is_empty())
    }
}
