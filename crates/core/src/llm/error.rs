use crate::llm::Provider;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("oracle error (provider={provider:?}, stage={stage}): {detail}")]
pub struct OracleError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
}

impl OracleError {
    pub fn new(provider: Provider, stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            provider,
            stage,
            detail: detail.into(),
            raw_output: None,
        }
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    pub fn timeout(provider: Provider, after: std::time::Duration) -> Self {
        Self::new(provider, "timeout", format!("no response after {after:?}"))
    }
}
