use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?(?:\d+\.\d*|\.\d+|\d+)").expect("valid number regex"));

/// Shape the model is asked to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSentiment {
    pub score: f64,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl LlmSentiment {
    pub fn validate(self) -> anyhow::Result<f64> {
        anyhow::ensure!(self.score.is_finite(), "score must be finite");
        anyhow::ensure!(
            (-1.0..=1.0).contains(&self.score),
            "score must be between -1 and 1 (got {})",
            self.score
        );
        Ok(self.score)
    }
}

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Parses a model reply into a score in [-1, 1].
///
/// Accepts a JSON object (`{"score": 0.4}`, optionally fenced) or, failing that, the first
/// numeric token in the text ("Sentiment: -0.35").
pub fn parse_score(text: &str) -> anyhow::Result<f64> {
    if let Some(json_str) = extract_json(text) {
        if let Ok(parsed) = serde_json::from_str::<LlmSentiment>(&json_str) {
            return parsed.validate();
        }
    }

    let m = NUMBER
        .find(text)
        .with_context(|| format!("no numeric sentiment in LLM output: {text}"))?;
    let score = m
        .as_str()
        .parse::<f64>()
        .with_context(|| format!("unparseable sentiment value: {}", m.as_str()))?;
    LlmSentiment {
        score,
        rationale: None,
    }
    .validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"score\":0.5}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"score\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"score\":1}".to_string()));
    }

    #[test]
    fn parse_score_accepts_json_and_bare_numbers() {
        assert_eq!(parse_score("{\"score\": -0.25}").unwrap(), -0.25);
        assert_eq!(
            parse_score("```json\n{\"score\": 0.8, \"rationale\": \"beat estimates\"}\n```").unwrap(),
            0.8
        );
        assert_eq!(parse_score("0.6").unwrap(), 0.6);
        assert_eq!(parse_score("Sentiment rating: -0.35 (negative)").unwrap(), -0.35);
        assert_eq!(parse_score(".5").unwrap(), 0.5);
        assert_eq!(parse_score("1").unwrap(), 1.0);
    }

    #[test]
    fn parse_score_rejects_out_of_range_and_missing() {
        assert!(parse_score("{\"score\": 1.5}").is_err());
        assert!(parse_score("7").is_err());
        assert!(parse_score("no idea").is_err());
    }
}
