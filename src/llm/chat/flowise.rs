use log::{error, warn};
use reqwest::{Client as HttpClient, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{check_status, ClientError, DataLine};

/// Connection settings for one Flowise chatflow. Both values are required;
/// callers skip the flow entirely when either is missing.
#[derive(Clone, Debug)]
pub struct FlowiseConfig {
    pub base_url: String,
    pub chatflow_id: String,
}

impl FlowiseConfig {
    pub fn resolve(base_url: Option<&str>, chatflow_id: Option<&str>) -> Option<Self> {
        match (base_url, chatflow_id) {
            (Some(url), Some(id)) if !url.is_empty() && !id.is_empty() => Some(Self {
                base_url: url.trim_end_matches('/').to_string(),
                chatflow_id: id.to_string(),
            }),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct FlowiseClient {
    http: HttpClient,
    config: FlowiseConfig,
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    streaming: Option<bool>,
}

#[derive(Deserialize)]
struct PredictionEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    data: Option<Value>,
}

impl FlowiseClient {
    pub fn new(config: FlowiseConfig) -> Self {
        Self {
            http: HttpClient::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/api/v1/prediction/{}",
            self.config.base_url, self.config.chatflow_id
        )
    }

    async fn post(&self, req: &PredictionRequest<'_>) -> Result<Response, ClientError> {
        let url = self.endpoint();
        let resp = self.http.post(&url).json(req).send().await.map_err(|e| {
            error!("request to {} failed: {}", url, e);
            ClientError::Transport {
                url: url.clone(),
                source: e,
            }
        })?;
        check_status(&url, resp).await
    }

    /// Returns the open streaming response for the caller to decode.
    pub async fn predict_stream(&self, question: &str) -> Result<Response, ClientError> {
        self.post(&PredictionRequest {
            question,
            streaming: Some(true),
        })
        .await
    }

    /// Posts a blocking prediction request and returns the reply text.
    pub async fn predict(&self, question: &str) -> Result<String, ClientError> {
        let url = self.endpoint();
        let resp = self
            .post(&PredictionRequest {
                question,
                streaming: None,
            })
            .await?;
        let value = resp.json::<Value>().await.map_err(|e| {
            error!("invalid prediction body from {}: {}", url, e);
            ClientError::Transport { url, source: e }
        })?;
        Ok(reply_text(&value))
    }
}

/// Flowise replies with either `{"text": ...}` or a bare value.
fn reply_text(value: &Value) -> String {
    match value.get("text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

/// Decodes one line of the prediction event stream. Only `token` events
/// carry output; every other event type is received and dropped.
pub fn parse_prediction_line(line: &str) -> DataLine {
    let Some(data) = line.strip_prefix("data:") else {
        return DataLine::Skip;
    };
    match serde_json::from_str::<PredictionEvent>(data) {
        Ok(event) if event.event == "token" => match event.data {
            Some(Value::String(text)) => DataLine::Token(text),
            Some(other) => DataLine::Token(other.to_string()),
            None => DataLine::Skip,
        },
        Ok(_) => DataLine::Skip,
        Err(e) => {
            warn!("failed to decode prediction event: {} in: {}", e, data);
            DataLine::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_token_event() {
        let line = r#"data:{"event":"token","data":"Hi"}"#;
        assert_eq!(parse_prediction_line(line), DataLine::Token("Hi".to_string()));
    }

    #[test]
    fn test_parse_non_token_event_is_silent() {
        assert_eq!(
            parse_prediction_line(r#"data:{"event":"start"}"#),
            DataLine::Skip
        );
        assert_eq!(
            parse_prediction_line(r#"data:{"event":"end","data":"x"}"#),
            DataLine::Skip
        );
    }

    #[test]
    fn test_parse_line_without_prefix_is_skipped() {
        assert_eq!(
            parse_prediction_line(r#"message:{"event":"token"}"#),
            DataLine::Skip
        );
        assert_eq!(parse_prediction_line(""), DataLine::Skip);
    }

    #[test]
    fn test_parse_invalid_json_is_skipped() {
        assert_eq!(parse_prediction_line("data:{oops"), DataLine::Skip);
    }

    #[test]
    fn test_non_string_token_data_is_rendered() {
        let line = r#"data:{"event":"token","data":42}"#;
        assert_eq!(parse_prediction_line(line), DataLine::Token("42".to_string()));
    }

    #[test]
    fn test_config_requires_both_values() {
        assert!(FlowiseConfig::resolve(None, None).is_none());
        assert!(FlowiseConfig::resolve(Some("http://localhost:3000"), None).is_none());
        assert!(FlowiseConfig::resolve(None, Some("flow")).is_none());
        assert!(FlowiseConfig::resolve(Some(""), Some("flow")).is_none());

        let config = FlowiseConfig::resolve(Some("http://localhost:3000/"), Some("flow")).unwrap();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.chatflow_id, "flow");
    }

    #[test]
    fn test_reply_text_prefers_text_field() {
        assert_eq!(reply_text(&json!({"text": "answer"})), "answer");
        assert_eq!(reply_text(&json!("bare")), "bare");
        assert_eq!(reply_text(&json!({"other": 1})), r#"{"other":1}"#);
    }
}
