use crate::domain::report::AnalysisReport;
use crate::present::ReportSink;
use crate::storage::recommendations;

/// Persists reports for the dashboard.
#[derive(Debug, Clone)]
pub struct PgReportSink {
    pool: sqlx::PgPool,
}

impl PgReportSink {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReportSink for PgReportSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn present(&self, report: &AnalysisReport) -> anyhow::Result<()> {
        let id = recommendations::persist_success(&self.pool, report).await?;
        tracing::info!(ticker = %report.ticker, %id, "recommendation persisted");
        Ok(())
    }
}
