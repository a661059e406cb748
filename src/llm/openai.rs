use super::{check_status, line_stream, BackendCall, ChunkStream, LlmError, StreamChunk};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub client: Client,
    pub api_key: String,
    pub base_url: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

pub async fn completion_stream(config: &OpenAiConfig, call: &BackendCall) -> Result<ChunkStream, LlmError> {
    let body = CompletionRequest {
        model: &call.model,
        prompt: &call.prompt,
        stream: true,
    };
    post_stream(config, "completions", &body).await
}

pub async fn chat_stream(config: &OpenAiConfig, call: &BackendCall) -> Result<ChunkStream, LlmError> {
    let body = ChatRequest {
        model: &call.model,
        messages: vec![user_turn(call)],
        stream: true,
    };
    post_stream(config, "chat/completions", &body).await
}

/// One user message: the prompt as a text part followed by one
/// `image_url` part per image, encoded as a data URL.
fn user_turn(call: &BackendCall) -> Value {
    let mut parts = vec![json!({ "type": "text", "text": call.prompt })];
    parts.extend(call.images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{};base64,{}", image.media_type, image.data) }
        })
    }));
    json!({ "role": "user", "content": parts })
}

async fn post_stream<T: Serialize>(
    config: &OpenAiConfig,
    path: &str,
    body: &T,
) -> Result<ChunkStream, LlmError> {
    let mut req = config
        .client
        .post(format!("{}/{}", config.base_url, path))
        .header("Content-Type", "application/json")
        .json(body);

    if !config.api_key.is_empty() {
        req = req.header("Authorization", format!("Bearer {}", config.api_key));
    }

    let resp = check_status(req.send().await?).await?;
    Ok(line_stream(Box::pin(resp.bytes_stream()), parse_sse_line))
}

/// Parse one server-sent-events line. Anything that is not a `data:` line
/// (comments, `event:` fields, blank separators) is skipped.
fn parse_sse_line(line: &str) -> Result<Option<StreamChunk>, LlmError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(Some(StreamChunk::finished()));
    }

    let parsed: StreamResponse =
        serde_json::from_str(data).map_err(|e| LlmError::Parse(format!("{e}: {data}")))?;
    if let Some(error) = parsed.error {
        return Err(LlmError::Backend(error.to_string()));
    }

    let Some(choice) = parsed.choices.into_iter().next() else {
        return Ok(None);
    };
    let delta = choice
        .delta
        .and_then(|d| d.content)
        .or(choice.text)
        .unwrap_or_default();

    Ok(Some(StreamChunk {
        delta,
        done: choice.finish_reason.is_some(),
    }))
}
