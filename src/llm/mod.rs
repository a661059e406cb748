pub mod ollama;
pub mod openai;
pub mod router;

use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{BackendConfig, BackendKind};
use crate::error::GatewayError;
use crate::prompt::Modality;

/// One normalized unit of model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            done: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            delta: String::new(),
            done: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
}

/// Base64 image carried next to the prompt for vision calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub media_type: String,
    pub data: String,
}

/// Everything a provider needs to issue one backend call.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub model: String,
    pub prompt: String,
    pub images: Vec<ImagePayload>,
    pub modality: Modality,
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, LlmError>>;

/// Unified backend enum — dispatches to the native Ollama API or an
/// OpenAI-compatible server.
#[derive(Debug, Clone)]
pub enum Provider {
    Ollama(ollama::OllamaConfig),
    OpenAi(openai::OpenAiConfig),
}

impl Provider {
    pub fn from_config(config: &BackendConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Config(format!("cannot build http client: {e}")))?;
        let base_url = config.endpoint.trim_end_matches('/').to_string();

        Ok(match config.kind {
            BackendKind::Ollama => Provider::Ollama(ollama::OllamaConfig { client, base_url }),
            BackendKind::OpenAi => Provider::OpenAi(openai::OpenAiConfig {
                client,
                base_url,
                api_key: config.api_key.clone().unwrap_or_default(),
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama(_) => "ollama",
            Provider::OpenAi(_) => "openai",
        }
    }

    /// Issue the call and hand back the backend's chunk stream.
    ///
    /// `Text` calls use the single-turn completion endpoint; `Vision` calls
    /// use the chat endpoint with one user turn carrying the images.
    pub async fn open_stream(&self, call: &BackendCall) -> Result<ChunkStream, LlmError> {
        match (self, call.modality) {
            (Provider::Ollama(config), Modality::Text) => ollama::generate_stream(config, call).await,
            (Provider::Ollama(config), Modality::Vision) => ollama::chat_stream(config, call).await,
            (Provider::OpenAi(config), Modality::Text) => openai::completion_stream(config, call).await,
            (Provider::OpenAi(config), Modality::Vision) => openai::chat_stream(config, call).await,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    /// The backend could not produce an answer. Unreadable backend output
    /// counts, caller-initiated cancellation does not.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LlmError::Http(_) | LlmError::Api { .. } | LlmError::Backend(_) | LlmError::Parse(_)
        )
    }
}

/// Turn a non-success response into [`LlmError::Api`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }
    Ok(resp)
}

struct LineReader<S, F> {
    bytes: S,
    buffer: Vec<u8>,
    parse: F,
    finished: bool,
}

/// Split a byte stream into lines and parse each one into an optional chunk.
///
/// Lines are cut on raw `\n` bytes before decoding, so multi-byte characters
/// split across network reads survive intact. The stream ends after the first
/// `done` chunk or the first error. A body that closes before any `done`
/// line is an error, never a short answer.
pub(crate) fn line_stream<S, B, E, F>(bytes: S, parse: F) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
    F: FnMut(&str) -> Result<Option<StreamChunk>, LlmError> + Send + 'static,
{
    let reader = LineReader {
        bytes,
        buffer: Vec::new(),
        parse,
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        if reader.finished {
            return None;
        }
        loop {
            if let Some(pos) = reader.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = reader.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match (reader.parse)(line.trim()) {
                    Ok(Some(chunk)) => {
                        reader.finished = chunk.done;
                        return Some((Ok(chunk), reader));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        reader.finished = true;
                        return Some((Err(e), reader));
                    }
                }
            }

            match reader.bytes.next().await {
                Some(Ok(bytes)) => reader.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    reader.finished = true;
                    return Some((Err(e.into()), reader));
                }
                None if !reader.buffer.is_empty() => {
                    // last line without a trailing newline
                    reader.buffer.push(b'\n');
                }
                None => {
                    reader.finished = true;
                    let err = LlmError::Backend("backend stream ended before completion".into());
                    return Some((Err(err), reader));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_plain(line: &str) -> Result<Option<StreamChunk>, LlmError> {
        match line {
            "" => Ok(None),
            "END" => Ok(Some(StreamChunk::finished())),
            "BOOM" => Err(LlmError::Backend("boom".into())),
            text => Ok(Some(StreamChunk::text(text))),
        }
    }

    async fn collect(parts: &[&[u8]]) -> Vec<Result<StreamChunk, LlmError>> {
        let owned: Vec<Vec<u8>> = parts.iter().map(|p| p.to_vec()).collect();
        let bytes = stream::iter(owned.into_iter().map(Ok::<_, LlmError>));
        line_stream(bytes, parse_plain).collect().await
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let out = collect(&[b"Hel", b"lo\nwor", b"ld\n\nEND\n"]).await;
        let deltas: Vec<String> = out.into_iter().map(|c| c.unwrap().delta).collect();
        assert_eq!(deltas, vec!["Hello", "world", ""]);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_reads() {
        let text = "olá\n".as_bytes();
        let (a, b) = text.split_at(3);
        let out = collect(&[a, b]).await;
        assert_eq!(out[0].as_ref().unwrap().delta, "olá");
    }

    #[tokio::test]
    async fn test_stops_after_done_marker() {
        let out = collect(&[b"a\nEND\nnever\n"]).await;
        assert_eq!(out.len(), 2);
        assert!(out[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_body_closed_before_done_is_error() {
        let out = collect(&[b"a\nb"]).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap().delta, "a");
        assert_eq!(out[1].as_ref().unwrap().delta, "b");
        assert!(matches!(&out[2], Err(LlmError::Backend(msg)) if msg.contains("before completion")));
    }

    #[tokio::test]
    async fn test_done_line_without_trailing_newline() {
        let out = collect(&[b"a\nEND"]).await;
        assert_eq!(out.len(), 2);
        assert!(out[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_error_line_ends_stream() {
        let out = collect(&[b"a\nBOOM\nb\n"]).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(LlmError::Backend(_))));
    }

    #[test]
    fn test_cancelled_is_not_unavailable() {
        assert!(!LlmError::Cancelled.is_unavailable());
        assert!(LlmError::Backend("x".into()).is_unavailable());
        assert!(LlmError::Parse("bad json".into()).is_unavailable());
    }
}
