use anyhow::Context;
use clap::Parser;
use smart_core::analysis::pipeline::Analyzer;
use smart_core::config::{EngineConfig, Settings};
use smart_core::storage::lock::AnalysisLock;
use smart_core::storage::recommendations;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod stdout;

#[derive(Debug, Parser)]
#[command(name = "smart_worker")]
struct Args {
    /// Ticker symbol to analyse, e.g. AAPL.
    #[arg(long)]
    ticker: String,

    /// Market as-of date (YYYY-MM-DD). Defaults to the latest settled US trading day.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Print the report as JSON instead of writing to the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let as_of_date = smart_core::time::us_market::resolve_as_of_date(
        args.as_of_date.as_deref(),
        chrono::Utc::now(),
    )?;
    let ticker = args.ticker.trim().to_ascii_uppercase();
    anyhow::ensure!(!ticker.is_empty(), "--ticker must not be empty");

    let config = EngineConfig::from_env()?;
    let analyzer = Analyzer::from_settings(&settings, config)?;

    if args.dry_run {
        let report = analyzer
            .analyze_and_present(&ticker, as_of_date, &stdout::StdoutSink)
            .await
            .with_context(|| format!("analysis failed for {ticker}"))?;
        tracing::info!(
            %as_of_date,
            ticker = %report.ticker,
            dry_run = true,
            label = %report.recommendation.label,
            "analysis complete (dry-run)"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    smart_core::storage::migrate(&pool).await?;

    let Some(guard) = AnalysisLock::try_acquire(&pool, &ticker, as_of_date).await? else {
        tracing::warn!(%as_of_date, %ticker, "analysis lock not acquired; another run in progress");
        return Ok(());
    };

    let result = run(&analyzer, &pool, &ticker, as_of_date).await;

    if let Err(e) = guard.release().await {
        tracing::warn!(error = %format!("{e:#}"), %ticker, "analysis lock release failed");
    }
    result
}

async fn run(
    analyzer: &Analyzer,
    pool: &sqlx::PgPool,
    ticker: &str,
    as_of_date: chrono::NaiveDate,
) -> anyhow::Result<()> {
    let interrupted = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::warn!("interrupt received; cancelling analysis");
    };

    match analyzer.analyze_until(ticker, as_of_date, interrupted).await {
        Ok(report) => {
            let id = recommendations::persist_success(pool, &report).await?;
            tracing::info!(
                %as_of_date,
                %ticker,
                %id,
                label = %report.recommendation.label,
                score = report.recommendation.score,
                "persisted recommendation"
            );
        }
        Err(err) => {
            let stage = err.stage();
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);

            let id = recommendations::persist_failure(
                pool,
                ticker,
                as_of_date,
                chrono::Utc::now(),
                &format!("{stage} stage: {err:#}"),
            )
            .await?;

            tracing::error!(%as_of_date, %ticker, %id, %stage, error = %err, "analysis failed");
        }
    }

    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "smart_worker",
            "--ticker",
            "aapl",
            "--as-of-date",
            "2026-03-04",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.ticker, "aapl");
        assert_eq!(args.as_of_date.as_deref(), Some("2026-03-04"));
        assert!(args.dry_run);
    }

    #[test]
    fn ticker_is_required() {
        assert!(Args::try_parse_from(["smart_worker", "--dry-run"]).is_err());
    }
}
