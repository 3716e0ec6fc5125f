use std::error::Error;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::cli::ServeArgs;
use crate::llm::chat::flowise::{parse_prediction_line, FlowiseClient, FlowiseConfig};
use crate::llm::chat::fragment_stream;
use crate::models::chat::ChatMessage;

const BRIDGE_MODEL: &str = "flowise-bridge";

#[derive(Clone)]
struct AppState {
    client: FlowiseClient,
}

/// Incoming OpenAI-shape request. Only the message list and the stream flag
/// matter to the bridge; every other field is accepted and ignored.
#[derive(Deserialize)]
struct BridgeRequest {
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct Completion {
    id: String,
    object: &'static str,
    created: i64,
    model: &'static str,
    choices: Vec<CompletionChoice>,
    usage: Usage,
}

#[derive(Serialize)]
struct CompletionChoice {
    index: u32,
    message: ChatMessage,
    finish_reason: &'static str,
}

#[derive(Serialize, Default)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Serialize)]
struct StreamChunk {
    id: String,
    object: &'static str,
    created: i64,
    model: &'static str,
    choices: Vec<ChunkChoice>,
}

#[derive(Serialize)]
struct ChunkChoice {
    index: u32,
    delta: ChunkDelta,
    finish_reason: Option<&'static str>,
}

#[derive(Serialize, Default)]
struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

pub async fn start_http_server(args: &ServeArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", args.port).parse::<SocketAddr>()?;
    let config = FlowiseConfig::resolve(Some(&args.flowise_url), Some(&args.chatflow_id))
        .ok_or("FLOWISE_API_URL and FLOWISE_CHATFLOW_ID must be set")?;

    info!("Starting bridge server on: http://{}", addr);
    let state = AppState {
        client: FlowiseClient::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<BridgeRequest>,
) -> Response {
    let question = match req.messages.last() {
        Some(message) => message.content.clone(),
        None => return error_response("messages array is empty", Value::Null),
    };

    if req.stream.unwrap_or(false) {
        stream_completion(state, question).await
    } else {
        full_completion(state, question).await
    }
}

async fn full_completion(state: AppState, question: String) -> Response {
    match state.client.predict(&question).await {
        Ok(text) => Json(completion_body(&text)).into_response(),
        Err(e) => {
            error!("bridge request failed: {}", e);
            error_response(
                "An error occurred during your request.",
                Value::String(e.to_string()),
            )
        }
    }
}

/// Re-frames the Flowise token stream as OpenAI completion chunks: a role
/// chunk first, one content chunk per token, a stop chunk, then `[DONE]`.
async fn stream_completion(state: AppState, question: String) -> Response {
    let upstream = match state.client.predict_stream(&question).await {
        Ok(resp) => resp,
        Err(e) => {
            error!("bridge request failed: {}", e);
            return error_response(
                "An error occurred during your request.",
                Value::String(e.to_string()),
            );
        }
    };
    info!("streaming prediction from Flowise");

    let id = completion_id();
    let created = Utc::now().timestamp();
    let (tx, rx) = mpsc::channel::<Result<String, std::convert::Infallible>>(32);

    tokio::spawn(async move {
        if tx.send(Ok(sse_frame(&role_chunk(&id, created)))).await.is_err() {
            return;
        }
        let mut tokens = fragment_stream(upstream, parse_prediction_line);
        while let Some(next) = tokens.next().await {
            match next {
                Ok(token) => {
                    let frame = sse_frame(&token_chunk(&id, created, token));
                    if tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("upstream prediction stream failed: {}", e);
                    break;
                }
            }
        }
        let _ = tx.send(Ok(sse_frame(&stop_chunk(&id, created)))).await;
        let _ = tx.send(Ok("data: [DONE]\n\n".to_string())).await;
    });

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
    {
        Ok(resp) => resp,
        Err(e) => {
            error!("failed to build streaming response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

fn completion_body(content: &str) -> Completion {
    Completion {
        id: completion_id(),
        object: "chat.completion",
        created: Utc::now().timestamp(),
        model: BRIDGE_MODEL,
        choices: vec![CompletionChoice {
            index: 0,
            message: ChatMessage::new("assistant", content),
            finish_reason: "stop",
        }],
        usage: Usage::default(),
    }
}

fn role_chunk(id: &str, created: i64) -> StreamChunk {
    chunk(
        id,
        created,
        ChunkDelta {
            role: Some("assistant"),
            content: None,
        },
        None,
    )
}

fn token_chunk(id: &str, created: i64, content: String) -> StreamChunk {
    chunk(
        id,
        created,
        ChunkDelta {
            role: None,
            content: Some(content),
        },
        None,
    )
}

fn stop_chunk(id: &str, created: i64) -> StreamChunk {
    chunk(id, created, ChunkDelta::default(), Some("stop"))
}

fn chunk(
    id: &str,
    created: i64,
    delta: ChunkDelta,
    finish_reason: Option<&'static str>,
) -> StreamChunk {
    StreamChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        created,
        model: BRIDGE_MODEL,
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    }
}

fn sse_frame(chunk: &StreamChunk) -> String {
    format!(
        "data: {}\n\n",
        serde_json::to_string(chunk).unwrap_or_default()
    )
}

fn error_response(message: &str, details: Value) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": { "message": message, "details": details } })),
    )
        .into_response()
}
