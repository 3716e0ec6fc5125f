use log::{error, warn};
use reqwest::{Client as HttpClient, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{check_status, ClientError, DataLine};
use crate::models::chat::ChatMessage;

pub struct ChatCompletionClient {
    http: HttpClient,
    base_url: String,
}

/// Generation parameters sent with every request. `extra` is flattened into
/// the request body verbatim and never validated here; the server decides
/// what to do with unknown fields.
#[derive(Clone, Debug)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub extra: Map<String, Value>,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            extra: Map::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

#[derive(Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
pub struct CompletionChoice {
    pub message: AssistantMessage,
}

#[derive(Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub role: String,
    pub content: String,
}

impl ChatCompletionResponse {
    /// Content of the first choice, when the server returned one.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

impl ChatCompletionClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn post(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        stream: bool,
    ) -> Result<Response, ClientError> {
        let url = self.endpoint();
        let req = ChatCompletionRequest {
            model: &params.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream,
            extra: &params.extra,
        };
        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                error!("request to {} failed: {}", url, e);
                ClientError::Transport {
                    url: url.clone(),
                    source: e,
                }
            })?;
        check_status(&url, resp).await
    }

    /// Blocks for the complete response body and returns it parsed.
    pub async fn create(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<ChatCompletionResponse, ClientError> {
        let url = self.endpoint();
        let resp = self.post(messages, params, false).await?;
        resp.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!("invalid completion body from {}: {}", url, e);
            ClientError::Transport { url, source: e }
        })
    }

    /// Sends a streaming request and hands back the open response once the
    /// status has been checked. The caller iterates the body.
    pub async fn create_stream(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<Response, ClientError> {
        self.post(messages, params, true).await
    }
}

/// Decodes one line of the chat completion event stream. Only the first
/// choice is read; a chunk without text is a no-op rather than an error.
pub fn parse_completion_line(line: &str) -> DataLine {
    let Some(data) = line.strip_prefix("data: ") else {
        return DataLine::Skip;
    };
    if data == "[DONE]" {
        return DataLine::Done;
    }
    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => {
            let content = chunk.choices.into_iter().next().and_then(|c| c.delta.content);
            match content {
                Some(text) if !text.is_empty() => DataLine::Token(text),
                _ => DataLine::Skip,
            }
        }
        Err(e) => {
            warn!("failed to decode stream chunk: {} in: {}", e, data);
            DataLine::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::testing::collect_fragments;
    use serde_json::json;

    #[test]
    fn test_parse_line_without_prefix_is_skipped() {
        assert_eq!(parse_completion_line(""), DataLine::Skip);
        assert_eq!(parse_completion_line(": comment"), DataLine::Skip);
        assert_eq!(
            parse_completion_line(r#"{"choices":[{"delta":{"content":"x"}}]}"#),
            DataLine::Skip
        );
    }

    #[test]
    fn test_parse_done_sentinel() {
        assert_eq!(parse_completion_line("data: [DONE]"), DataLine::Done);
    }

    #[test]
    fn test_parse_content_fragment() {
        let line = r#"data: {"choices":[{"delta":{"content":"He"}}]}"#;
        assert_eq!(parse_completion_line(line), DataLine::Token("He".to_string()));
    }

    #[test]
    fn test_parse_chunk_without_text_is_noop() {
        assert_eq!(
            parse_completion_line(r#"data: {"choices":[{"delta":{}}]}"#),
            DataLine::Skip
        );
        assert_eq!(
            parse_completion_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            DataLine::Skip
        );
        assert_eq!(parse_completion_line(r#"data: {"id":"x"}"#), DataLine::Skip);
    }

    #[test]
    fn test_parse_invalid_json_is_skipped() {
        assert_eq!(parse_completion_line("data: {not json"), DataLine::Skip);
    }

    #[test]
    fn test_only_first_choice_is_read() {
        let line = concat!(
            r#"data: {"choices":[{"delta":{"content":"a"}},"#,
            r#"{"delta":{"content":"b"}}]}"#
        );
        assert_eq!(parse_completion_line(line), DataLine::Token("a".to_string()));
    }

    #[tokio::test]
    async fn test_stream_concatenates_fragments() {
        let fragments = collect_fragments(
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n",
                "data: [DONE]\n",
            ],
            parse_completion_line,
        )
        .await;
        assert_eq!(fragments, vec!["He", "llo"]);
        assert_eq!(fragments.concat(), "Hello");
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_abort_stream() {
        let fragments = collect_fragments(
            vec![
                "data: {broken\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
                "data: [DONE]\n",
            ],
            parse_completion_line,
        )
        .await;
        assert_eq!(fragments, vec!["ok"]);
    }

    #[test]
    fn test_response_body_without_role_still_parses() {
        let resp: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"hi"}}]}"#).unwrap();
        assert_eq!(resp.first_content(), Some("hi"));
    }

    #[test]
    fn test_response_without_choices_has_no_content() {
        let resp: ChatCompletionResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(resp.first_content(), None);
    }

    #[test]
    fn test_request_body_flattens_extra_params() {
        let messages = vec![
            ChatMessage::new("user", "hi"),
            ChatMessage::new("assistant", "hello"),
        ];
        let mut extra = Map::new();
        extra.insert("top_p".to_string(), json!(0.9));
        let req = ChatCompletionRequest {
            model: "gpt-3.5-turbo",
            messages: &messages,
            temperature: 0.7,
            max_tokens: 1000,
            stream: true,
            extra: &extra,
        };
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["top_p"], json!(0.9));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "hello");
    }
}
