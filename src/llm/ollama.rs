use super::{check_status, line_stream, BackendCall, ChunkStream, LlmError, StreamChunk};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub client: Client,
    pub base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
}

#[derive(Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatLine {
    message: Option<ChatDelta>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: String,
}

/// `POST /api/generate` — one prompt, one answer, no images.
pub async fn generate_stream(config: &OllamaConfig, call: &BackendCall) -> Result<ChunkStream, LlmError> {
    let body = GenerateRequest {
        model: &call.model,
        prompt: &call.prompt,
        stream: true,
    };

    debug!(model = %call.model, "ollama generate");
    let resp = config
        .client
        .post(format!("{}/api/generate", config.base_url))
        .json(&body)
        .send()
        .await?;
    let resp = check_status(resp).await?;

    Ok(line_stream(Box::pin(resp.bytes_stream()), parse_generate_line))
}

/// `POST /api/chat` — a single user turn carrying the prompt and images.
pub async fn chat_stream(config: &OllamaConfig, call: &BackendCall) -> Result<ChunkStream, LlmError> {
    let body = ChatRequest {
        model: &call.model,
        messages: vec![ChatMessage {
            role: "user",
            content: &call.prompt,
            images: call.images.iter().map(|i| i.data.as_str()).collect(),
        }],
        stream: true,
    };

    debug!(model = %call.model, images = call.images.len(), "ollama chat");
    let resp = config
        .client
        .post(format!("{}/api/chat", config.base_url))
        .json(&body)
        .send()
        .await?;
    let resp = check_status(resp).await?;

    Ok(line_stream(Box::pin(resp.bytes_stream()), parse_chat_line))
}

fn parse_generate_line(line: &str) -> Result<Option<StreamChunk>, LlmError> {
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: GenerateLine =
        serde_json::from_str(line).map_err(|e| LlmError::Parse(format!("{e}: {line}")))?;
    if let Some(error) = parsed.error {
        return Err(LlmError::Backend(error));
    }
    Ok(Some(StreamChunk {
        delta: parsed.response,
        done: parsed.done,
    }))
}

fn parse_chat_line(line: &str) -> Result<Option<StreamChunk>, LlmError> {
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: ChatLine =
        serde_json::from_str(line).map_err(|e| LlmError::Parse(format!("{e}: {line}")))?;
    if let Some(error) = parsed.error {
        return Err(LlmError::Backend(error));
    }
    Ok(Some(StreamChunk {
        delta: parsed.message.map(|m| m.content).unwrap_or_default(),
        done: parsed.done,
    }))
}
