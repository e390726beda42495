use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

// Advisory locks are scoped to the Postgres session. Best-effort guard against two runs
// analysing the same ticker for the same as-of date.
const LOCK_NAMESPACE: i64 = 0x534D_4152_5400; // "SMART"

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// FNV-1a: the key has to agree across processes, which `DefaultHasher` does not promise.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

fn lock_key(ticker: &str, as_of_date: NaiveDate) -> i64 {
    let ticker = ticker.trim().to_ascii_uppercase();
    let h = fnv1a(ticker.as_bytes()) ^ (as_of_date.num_days_from_ce() as u64).rotate_left(32);
    LOCK_NAMESPACE ^ (h as i64)
}

/// Session advisory lock for one (ticker, as-of date). The lock lives on the connection it
/// was taken on, so that connection is held until [`AnalysisLock::release`].
pub struct AnalysisLock {
    conn: PoolConnection<Postgres>,
    key: i64,
    ticker: String,
}

impl AnalysisLock {
    /// `Ok(None)` when another session already holds the lock.
    pub async fn try_acquire(
        pool: &PgPool,
        ticker: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Option<Self>> {
        let key = lock_key(ticker, as_of_date);
        let mut conn = pool
            .acquire()
            .await
            .context("failed to check out a connection for the analysis lock")?;
        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| {
                format!("failed to acquire advisory lock (ticker={ticker}, key={key})")
            })?;

        Ok(acquired.0.then(|| Self {
            conn,
            key,
            ticker: ticker.to_string(),
        }))
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(self.key)
            .execute(&mut *self.conn)
            .await;

        match unlocked {
            Ok(_) => Ok(()),
            Err(e) => {
                // Closing the session drops every lock it holds.
                let _ = self.conn.close().await;
                Err(anyhow::Error::new(e).context(format!(
                    "failed to release advisory lock (ticker={}, key={})",
                    self.ticker, self.key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn key_is_per_ticker_and_date() {
        assert_eq!(lock_key("aapl ", d(2)), lock_key("AAPL", d(2)));
        assert_ne!(lock_key("AAPL", d(2)), lock_key("AAPL", d(3)));
        assert_ne!(lock_key("AAPL", d(2)), lock_key("MSFT", d(2)));
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL
    async fn lock_is_released_on_the_session_that_holds_it() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(3)
            .connect(&url)
            .await
            .unwrap();

        let held = AnalysisLock::try_acquire(&pool, "LOCKTEST", d(2))
            .await
            .unwrap()
            .unwrap();
        assert!(AnalysisLock::try_acquire(&pool, "LOCKTEST", d(2))
            .await
            .unwrap()
            .is_none());

        held.release().await.unwrap();

        let again = AnalysisLock::try_acquire(&pool, "LOCKTEST", d(2))
            .await
            .unwrap()
            .unwrap();
        again.release().await.unwrap();
    }
}
