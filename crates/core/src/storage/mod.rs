pub mod lock;
pub mod news;
pub mod prices;
pub mod recommendations;
pub mod sink;

use anyhow::Context;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Deletes all stored price history and news. Recommendations are kept.
pub async fn clear_market_data(pool: &sqlx::PgPool) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let prices = sqlx::query("DELETE FROM price_history")
        .persistent(false)
        .execute(&mut *tx)
        .await
        .context("delete price_history failed")?
        .rows_affected();
    let news = sqlx::query("DELETE FROM news_articles")
        .persistent(false)
        .execute(&mut *tx)
        .await
        .context("delete news_articles failed")?
        .rows_affected();

    tx.commit().await.context("commit transaction failed")?;
    tracing::info!(prices, news, "market data cleared");
    Ok(prices + news)
}
