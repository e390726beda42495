use crate::domain::market::{PricePoint, PriceSeries};
use anyhow::Context;
use chrono::NaiveDate;

const DEFAULT_UPSERT_BATCH: usize = 200;

fn upsert_batch_size() -> anyhow::Result<usize> {
    let size = std::env::var("PRICE_HISTORY_UPSERT_BATCH")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_UPSERT_BATCH);
    anyhow::ensure!(size >= 1, "PRICE_HISTORY_UPSERT_BATCH must be >= 1");
    Ok(size)
}

/// Batched upsert of a whole series inside the caller's transaction.
pub async fn upsert_price_series(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    series: &PriceSeries,
) -> anyhow::Result<u64> {
    let chunk_size = upsert_batch_size()?;
    let ticker = series.ticker();

    let mut affected: u64 = 0;
    for (batch_idx, chunk) in series.points().chunks(chunk_size).enumerate() {
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new("INSERT INTO price_history (ticker, date, close) ");
        qb.push_values(chunk, |mut b, p| {
            b.push_bind(ticker).push_bind(p.date).push_bind(p.close);
        });
        qb.push(" ON CONFLICT (ticker, date) DO UPDATE SET close = EXCLUDED.close");

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut **tx)
            .await
            .context("batch upsert price_history failed")?;
        affected += res.rows_affected();

        tracing::debug!(
            ticker,
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "price_history batch upsert"
        );
    }

    Ok(affected)
}

/// Stored closes for `ticker`, oldest first.
pub async fn load_price_history(
    pool: &sqlx::PgPool,
    ticker: &str,
) -> anyhow::Result<Vec<PricePoint>> {
    let rows: Vec<(NaiveDate, f64)> = sqlx::query_as(
        "SELECT date, close FROM price_history WHERE ticker = $1 ORDER BY date ASC",
    )
    .persistent(false)
    .bind(ticker)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select price_history failed (ticker={ticker})"))?;

    Ok(rows
        .into_iter()
        .map(|(date, close)| PricePoint { date, close })
        .collect())
}
