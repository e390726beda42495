use crate::domain::report::AnalysisReport;
use crate::storage::{news, prices};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Rows kept per ticker; older ones are pruned on every insert.
pub const RETAINED_PER_TICKER: i64 = 5;

const COLUMNS: &str = "id, ticker, as_of_date, generated_at, status, label, score, sentiment, trend, \
     volatility, sentiment_weight, trend_weight, reasoning, last_close, articles_scored, \
     articles_failed, error";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredRecommendation {
    pub id: Uuid,
    pub ticker: String,
    pub as_of_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub status: String,
    pub label: Option<String>,
    pub score: Option<f64>,
    pub sentiment: Option<f64>,
    pub trend: Option<f64>,
    pub volatility: Option<f64>,
    pub sentiment_weight: Option<f64>,
    pub trend_weight: Option<f64>,
    pub reasoning: Option<String>,
    pub last_close: Option<f64>,
    pub articles_scored: Option<i32>,
    pub articles_failed: Option<i32>,
    pub error: Option<String>,
}

/// Stores the report's prices, scored news and recommendation in one transaction.
pub async fn persist_success(pool: &sqlx::PgPool, report: &AnalysisReport) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    prices::upsert_price_series(&mut tx, &report.prices).await?;
    news::replace_scored_articles(
        &mut tx,
        &report.ticker,
        &report.sentiment.articles,
        report.generated_at,
    )
    .await?;

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO recommendations (id, ticker, as_of_date, generated_at, status, label, score, \
         sentiment, trend, volatility, sentiment_weight, trend_weight, reasoning, last_close, \
         articles_scored, articles_failed, error) \
         VALUES ($1, $2, $3, $4, 'success', $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NULL)",
    )
    .persistent(false)
    .bind(id)
    .bind(&report.ticker)
    .bind(report.as_of_date)
    .bind(report.generated_at)
    .bind(report.recommendation.label.as_str())
    .bind(report.recommendation.score)
    .bind(report.sentiment.score)
    .bind(report.trend.score)
    .bind(report.volatility)
    .bind(report.weights.sentiment_weight)
    .bind(report.weights.trend_weight)
    .bind(&report.reasoning)
    .bind(report.trend.last_close)
    .bind(count(report.sentiment.scored))
    .bind(count(report.sentiment.failed))
    .execute(&mut *tx)
    .await
    .context("insert recommendations failed")?;

    prune(&mut tx, &report.ticker).await?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(id)
}

pub async fn persist_failure(
    pool: &sqlx::PgPool,
    ticker: &str,
    as_of_date: NaiveDate,
    generated_at: DateTime<Utc>,
    error: &str,
) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO recommendations (id, ticker, as_of_date, generated_at, status, error) \
         VALUES ($1, $2, $3, $4, 'error', $5)",
    )
    .persistent(false)
    .bind(id)
    .bind(ticker)
    .bind(as_of_date)
    .bind(generated_at)
    .bind(error)
    .execute(&mut *tx)
    .await
    .context("insert error recommendations failed")?;

    prune(&mut tx, ticker).await?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(id)
}

async fn prune(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, ticker: &str) -> anyhow::Result<()> {
    let res = sqlx::query(
        "DELETE FROM recommendations WHERE ticker = $1 AND id NOT IN ( \
             SELECT id FROM recommendations WHERE ticker = $1 \
             ORDER BY generated_at DESC LIMIT $2)",
    )
    .persistent(false)
    .bind(ticker)
    .bind(RETAINED_PER_TICKER)
    .execute(&mut **tx)
    .await
    .context("prune recommendations failed")?;

    if res.rows_affected() > 0 {
        tracing::debug!(ticker, pruned = res.rows_affected(), "old recommendations pruned");
    }
    Ok(())
}

/// Latest successful recommendation for `ticker`.
pub async fn latest_for_ticker(
    pool: &sqlx::PgPool,
    ticker: &str,
) -> anyhow::Result<Option<StoredRecommendation>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM recommendations \
         WHERE ticker = $1 AND status = 'success' \
         ORDER BY generated_at DESC LIMIT 1"
    );
    sqlx::query_as::<_, StoredRecommendation>(&sql)
        .persistent(false)
        .bind(ticker)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("select latest recommendation failed (ticker={ticker})"))
}

/// Newest successful recommendation of each ticker, most recent tickers first.
pub async fn recent(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<Vec<StoredRecommendation>> {
    let sql = format!(
        "SELECT * FROM ( \
             SELECT DISTINCT ON (ticker) {COLUMNS} FROM recommendations \
             WHERE status = 'success' \
             ORDER BY ticker, generated_at DESC \
         ) latest ORDER BY generated_at DESC LIMIT $1"
    );
    sqlx::query_as::<_, StoredRecommendation>(&sql)
        .persistent(false)
        .bind(limit.max(1))
        .fetch_all(pool)
        .await
        .context("select recent recommendations failed")
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
