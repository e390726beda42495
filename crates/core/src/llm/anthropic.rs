use crate::config::Settings;
use crate::llm::error::OracleError;
use crate::llm::json::{self, LlmSentiment};
use crate::llm::{Provider, SentimentOracle};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 256;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const TEMPERATURE: f64 = 0.1;

const TOOL_NAME_EMIT_SENTIMENT: &str = "emit_sentiment";

#[derive(Debug, Clone)]
pub struct AnthropicOracle {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicOracle {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    fn err(stage: &'static str, detail: impl Into<String>) -> OracleError {
        OracleError::new(Provider::Anthropic, stage, detail)
    }

    async fn create_message(
        &self,
        req: &CreateMessageRequest,
    ) -> Result<CreateMessageResponse, OracleError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Self::err("request", format!("invalid api key header: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .map_err(|e| Self::err("http", format!("Anthropic request failed: {e}")))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| Self::err("http", format!("failed to read response body: {e}")))?;
        if !status.is_success() {
            return Err(Self::err("http", format!("status={status}")).with_raw_output(text));
        }

        serde_json::from_str::<CreateMessageResponse>(&text).map_err(|e| {
            Self::err("decode", format!("unexpected response shape: {e}")).with_raw_output(text)
        })
    }

    fn request(&self, content: String) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(ToolChoice::Tool {
                name: TOOL_NAME_EMIT_SENTIMENT,
            }),
        }
    }

    fn tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["score"],
            "properties": {
                "score": {"type": "number", "minimum": -1, "maximum": 1},
                "rationale": {"type": ["string", "null"]}
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_SENTIMENT,
            description: "Emit the sentiment rating of the article",
            input_schema: schema,
        }]
    }

    fn system_prompt() -> String {
        [
            "You rate the sentiment of financial news articles for equity investors.",
            "Rate between -1 (very negative) and 1 (very positive); 0 is neutral.",
            "Return ONLY the rating via the emit_sentiment tool, or as JSON {\"score\": <number>}.",
        ]
        .join("\n")
    }

    fn user_prompt(text: &str) -> String {
        format!(
            "Provide a sentiment rating for this news article between -1 (very negative) and 1 \
             (very positive). Only return the numeric value.\n\n{text}"
        )
    }

    fn repair_prompt(previous_output: &str) -> String {
        format!(
            "Your previous message did not contain a valid rating.\n\
             Output ONLY a JSON object {{\"score\": <number between -1 and 1>}}.\n\
             No markdown, no prose.\n\n\
             INVALID OUTPUT (for reference only):\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn tool_input(res: &CreateMessageResponse) -> Option<&serde_json::Value> {
        res.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input } if name == TOOL_NAME_EMIT_SENTIMENT => Some(input),
            _ => None,
        })
    }

    /// On failure also returns the raw output, for the repair prompt.
    fn score_from_response(res: &CreateMessageResponse) -> Result<f64, (OracleError, String)> {
        if let Some(input) = Self::tool_input(res) {
            let raw = input.to_string();
            return serde_json::from_value::<LlmSentiment>(input.clone())
                .map_err(anyhow::Error::from)
                .and_then(LlmSentiment::validate)
                .map_err(|e| (Self::err("validate", e.to_string()), raw));
        }

        let text = Self::response_text(res);
        json::parse_score(&text).map_err(|e| (Self::err("parse", e.to_string()), text))
    }
}

#[async_trait::async_trait]
impl SentimentOracle for AnthropicOracle {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn score_sentiment(&self, text: &str) -> Result<f64, OracleError> {
        let res = self.create_message(&self.request(Self::user_prompt(text))).await?;
        let (first_err, previous) = match Self::score_from_response(&res) {
            Ok(score) => return Ok(score),
            Err(e) => e,
        };

        tracing::warn!(error = %first_err, "LLM rating invalid; requesting repair");
        let repaired = self
            .create_message(&self.request(Self::repair_prompt(&previous)))
            .await?;
        Self::score_from_response(&repaired).map_err(|(last_err, last_text)| {
            OracleError {
                provider: Provider::Anthropic,
                stage: "parse_after_repair",
                detail: format!("final_error={last_err}"),
                raw_output: Some(last_text),
            }
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(v: serde_json::Value) -> CreateMessageResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn parses_tool_use_rating() {
        let res = response(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "tool_use", "id": "toolu_1", "name": "emit_sentiment",
                 "input": {"score": -0.4, "rationale": "guidance cut"}}
            ],
            "stop_reason": "tool_use"
        }));
        assert_eq!(AnthropicOracle::score_from_response(&res).unwrap(), -0.4);
    }

    #[test]
    fn falls_back_to_text_rating() {
        let res = response(json!({
            "content": [{"type": "text", "text": "0.65"}]
        }));
        assert_eq!(AnthropicOracle::score_from_response(&res).unwrap(), 0.65);
    }

    #[test]
    fn out_of_range_tool_rating_is_rejected() {
        let res = response(json!({
            "content": [{"type": "tool_use", "name": "emit_sentiment", "input": {"score": 3.0}}]
        }));
        let (err, previous) = AnthropicOracle::score_from_response(&res).unwrap_err();
        assert_eq!(err.stage, "validate");
        assert!(previous.contains('3'));
    }

    #[test]
    fn request_forces_the_rating_tool() {
        let oracle = AnthropicOracle {
            http: reqwest::Client::new(),
            api_key: "k".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        };
        let v = serde_json::to_value(oracle.request("Title: x".to_string())).unwrap();
        assert_eq!(v["tool_choice"], json!({"type": "tool", "name": "emit_sentiment"}));
        assert_eq!(v["messages"][0]["role"], "user");
        assert!(v["messages"][0]["content"]
            .as_str()
            .unwrap()
            .ends_with("Title: x"));
    }
}
