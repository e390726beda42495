use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smart_core::analysis::pipeline::Analyzer;
use smart_core::config::{EngineConfig, Settings};
use smart_core::domain::market::PricePoint;
use smart_core::domain::report::AnalysisReport;
use smart_core::error::{AnalysisError, Stage};
use smart_core::present::present_best_effort;
use smart_core::storage::news::StoredArticle;
use smart_core::storage::recommendations::{self, StoredRecommendation};
use smart_core::storage::sink::PgReportSink;

const DEFAULT_RECENT_LIMIT: i64 = 5;
const MAX_RECENT_LIMIT: i64 = 50;

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match smart_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let analyzer = match EngineConfig::from_env()
        .and_then(|config| Analyzer::from_settings(&settings, config))
    {
        Ok(analyzer) => Some(Arc::new(analyzer)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "analyzer unavailable; on-demand analysis disabled");
            None
        }
    };

    let state = AppState { pool, analyzer };

    let app = router(state).layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/recommendations", get(list_recommendations))
        .route("/recommendations/:ticker", get(get_recommendation))
        .route("/news/:ticker", get(get_news))
        .route("/prices/:ticker", get(get_prices))
        .route("/analyze/:ticker", post(analyze_ticker))
        .route("/market-data", delete(clear_market_data))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    analyzer: Option<Arc<Analyzer>>,
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %format!("{e:#}"), "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn normalize_ticker(ticker: &str) -> Result<String, StatusCode> {
    let t = ticker.trim().to_ascii_uppercase();
    let valid = !t.is_empty()
        && t.len() <= 16
        && t.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid {
        Ok(t)
    } else {
        Err(StatusCode::BAD_REQUEST)
    }
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    limit: Option<i64>,
}

async fn list_recommendations(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<StoredRecommendation>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);
    let rows = recommendations::recent(pool, limit).await.map_err(internal)?;
    Ok(Json(rows))
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<StoredRecommendation>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let ticker = normalize_ticker(&ticker)?;

    let row = recommendations::latest_for_ticker(pool, &ticker)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(row))
}

async fn get_news(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<Vec<StoredArticle>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let ticker = normalize_ticker(&ticker)?;

    let rows = smart_core::storage::news::load_news(pool, &ticker)
        .await
        .map_err(internal)?;
    Ok(Json(rows))
}

async fn get_prices(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<Vec<PricePoint>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let ticker = normalize_ticker(&ticker)?;

    let rows = smart_core::storage::prices::load_price_history(pool, &ticker)
        .await
        .map_err(internal)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    as_of_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct StageError {
    stage: Stage,
    error: String,
}

enum AnalyzeError {
    Status(StatusCode),
    Analysis(AnalysisError),
}

impl IntoResponse for AnalyzeError {
    fn into_response(self) -> Response {
        match self {
            AnalyzeError::Status(status) => status.into_response(),
            AnalyzeError::Analysis(err) => {
                let body = StageError {
                    stage: err.stage(),
                    error: err.to_string(),
                };
                (status_for(&err), Json(body)).into_response()
            }
        }
    }
}

fn status_for(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::DataUnavailable { .. } => StatusCode::NOT_FOUND,
        AnalysisError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::SentimentUnavailable { .. } | AnalysisError::Oracle(_) => {
            StatusCode::BAD_GATEWAY
        }
        AnalysisError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AnalysisError::InvalidWeight { .. } | AnalysisError::InvalidScore { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Runs the pipeline now. The report is persisted when a database is configured.
async fn analyze_ticker(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(params): Query<AnalyzeParams>,
) -> Result<Json<AnalysisReport>, AnalyzeError> {
    let Some(analyzer) = state.analyzer.clone() else {
        return Err(AnalyzeError::Status(StatusCode::SERVICE_UNAVAILABLE));
    };
    let ticker = normalize_ticker(&ticker).map_err(AnalyzeError::Status)?;
    let as_of_date = smart_core::time::us_market::resolve_as_of_date(
        params.as_of_date.as_deref(),
        chrono::Utc::now(),
    )
    .map_err(|_| AnalyzeError::Status(StatusCode::BAD_REQUEST))?;

    match analyzer.analyze(&ticker, as_of_date).await {
        Ok(report) => {
            if let Some(pool) = &state.pool {
                present_best_effort(&PgReportSink::new(pool.clone()), &report).await;
            }
            Ok(Json(report))
        }
        Err(err) => {
            tracing::warn!(%ticker, %as_of_date, stage = %err.stage(), error = %err, "on-demand analysis failed");
            if let Some(pool) = &state.pool {
                let message = format!("{} stage: {err}", err.stage());
                if let Err(e) = recommendations::persist_failure(
                    pool,
                    &ticker,
                    as_of_date,
                    chrono::Utc::now(),
                    &message,
                )
                .await
                {
                    sentry_anyhow::capture_anyhow(&e);
                }
            }
            Err(AnalyzeError::Analysis(err))
        }
    }
}

#[derive(Debug, Serialize)]
struct Cleared {
    deleted: u64,
}

async fn clear_market_data(State(state): State<AppState>) -> Result<Json<Cleared>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let deleted = smart_core::storage::clear_market_data(pool)
        .await
        .map_err(internal)?;
    Ok(Json(Cleared { deleted }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
    use smart_core::error::DataSource;

    fn degraded() -> AppState {
        AppState {
            pool: None,
            analyzer: None,
        }
    }

    #[tokio::test]
    async fn router_builds_and_healthz_is_ok() {
        let _ = router(degraded());
        assert_eq!(healthz().await, "ok");
    }

    #[tokio::test]
    async fn data_routes_are_unavailable_without_backends() {
        let unavailable = Err(StatusCode::SERVICE_UNAVAILABLE);

        let res = list_recommendations(State(degraded()), Query(RecentParams { limit: None })).await;
        assert_eq!(res.map(|_| ()), unavailable);
        let res = get_recommendation(State(degraded()), Path("AAPL".into())).await;
        assert_eq!(res.map(|_| ()), unavailable);
        let res = get_news(State(degraded()), Path("AAPL".into())).await;
        assert_eq!(res.map(|_| ()), unavailable);
        let res = get_prices(State(degraded()), Path("AAPL".into())).await;
        assert_eq!(res.map(|_| ()), unavailable);
        let res = clear_market_data(State(degraded())).await;
        assert_eq!(res.map(|_| ()), unavailable);

        let res = analyze_ticker(
            State(degraded()),
            Path("AAPL".into()),
            Query(AnalyzeParams { as_of_date: None }),
        )
        .await;
        let status = res.map(|_| ()).unwrap_err().into_response().status();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn tickers_are_normalized_and_checked() {
        assert_eq!(normalize_ticker(" brk-b ").unwrap(), "BRK-B");
        assert_eq!(normalize_ticker("^gspc").unwrap(), "^GSPC");
        assert!(normalize_ticker("").is_err());
        assert!(normalize_ticker("AAPL;DROP").is_err());
    }

    #[test]
    fn analysis_errors_map_to_statuses() {
        let missing = AnalysisError::DataUnavailable {
            feed: DataSource::Prices,
            ticker: "NOPE".into(),
            reason: "unknown".into(),
        };
        assert_eq!(status_for(&missing), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&AnalysisError::InsufficientData {
                points: 1,
                required: 2
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&AnalysisError::SentimentUnavailable {
                attempted: 3,
                failed: 3
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn stage_error_body_shape() {
        let body = StageError {
            stage: Stage::Trend,
            error: "insufficient price history".into(),
        };
        let v = serde_json::to_value(body).unwrap();
        assert_eq!(v["stage"], "trend");
        assert_eq!(v["error"], "insufficient price history");
    }
}
