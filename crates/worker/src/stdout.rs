use anyhow::Context;
use smart_core::domain::report::AnalysisReport;
use smart_core::present::ReportSink;
use std::io::Write;

/// Pretty-printed JSON on stdout, for `--dry-run`.
pub struct StdoutSink;

#[async_trait::async_trait]
impl ReportSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn present(&self, report: &AnalysisReport) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(report).context("serialize report failed")?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{json}").context("write report to stdout failed")?;
        Ok(())
    }
}
