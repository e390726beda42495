use crate::domain::news::ScoredArticle;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredArticle {
    pub id: Uuid,
    pub ticker: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub source: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// `None` when scoring failed for this article.
    pub sentiment_score: Option<f64>,
    pub scored_at: DateTime<Utc>,
}

/// Replaces everything stored for `ticker` with the articles of the latest run.
pub async fn replace_scored_articles(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ticker: &str,
    articles: &[ScoredArticle],
    scored_at: DateTime<Utc>,
) -> anyhow::Result<u64> {
    sqlx::query("DELETE FROM news_articles WHERE ticker = $1")
        .persistent(false)
        .bind(ticker)
        .execute(&mut **tx)
        .await
        .context("delete news_articles failed")?;

    if articles.is_empty() {
        return Ok(0);
    }

    let mut qb = sqlx::QueryBuilder::new(
        "INSERT INTO news_articles (id, ticker, title, url, source, published_at, sentiment_score, scored_at) ",
    );
    qb.push_values(articles, |mut b, scored| {
        let a = &scored.article;
        b.push_bind(Uuid::new_v4())
            .push_bind(ticker)
            .push_bind(a.title.as_deref())
            .push_bind(a.url.as_deref())
            .push_bind(a.source.as_deref())
            .push_bind(a.published_at)
            .push_bind(scored.score)
            .push_bind(scored_at);
    });

    let res = qb
        .build()
        .persistent(false)
        .execute(&mut **tx)
        .await
        .context("insert news_articles failed")?;
    Ok(res.rows_affected())
}

/// Articles of the latest run for `ticker`, newest first.
pub async fn load_news(pool: &sqlx::PgPool, ticker: &str) -> anyhow::Result<Vec<StoredArticle>> {
    sqlx::query_as::<_, StoredArticle>(
        "SELECT id, ticker, title, url, source, published_at, sentiment_score, scored_at \
         FROM news_articles WHERE ticker = $1 \
         ORDER BY published_at DESC NULLS LAST",
    )
    .persistent(false)
    .bind(ticker)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select news_articles failed (ticker={ticker})"))
}
