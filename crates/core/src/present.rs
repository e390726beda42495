use crate::domain::report::AnalysisReport;

/// Consumer of finished reports (dashboard store, stdout, ...).
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn present(&self, report: &AnalysisReport) -> anyhow::Result<()>;
}

/// Hands `report` to `sink`; a failing sink is logged and otherwise ignored.
pub async fn present_best_effort(sink: &dyn ReportSink, report: &AnalysisReport) -> bool {
    match sink.present(report).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                sink = sink.name(),
                ticker = %report.ticker,
                error = %format!("{err:#}"),
                "report sink failed"
            );
            false
        }
    }
}
