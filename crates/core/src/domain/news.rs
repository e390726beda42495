use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl NewsArticle {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            published_at: None,
            title: None,
            url: None,
            source: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    /// Short label used in logs.
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .or(self.url.as_deref())
            .unwrap_or("<untitled>")
    }
}

/// An article together with the outcome of scoring it.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredArticle {
    pub article: NewsArticle,
    /// `None` when the oracle failed or timed out for this article.
    pub score: Option<f64>,
    pub cached: bool,
}
