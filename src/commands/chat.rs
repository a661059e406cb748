use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::AppState;
use crate::db::models::Message;
use crate::doc_processor::Attachment;
use crate::error::GatewayError;
use crate::llm::ModelInfo;
use crate::pipeline::{ExchangeRequest, PreparedExchange};
use crate::relay::{self, BlockingReply};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPromptDto {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentDto>,
}

/// JSON-borne attachment; `data` is base64.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDto {
    pub filename: String,
    pub media_type: String,
    pub data: String,
}

impl SendPromptDto {
    fn into_request(self) -> Result<ExchangeRequest, GatewayError> {
        let attachments = self
            .attachments
            .into_iter()
            .map(|a| {
                let bytes = STANDARD.decode(a.data.trim()).map_err(|e| {
                    GatewayError::InvalidRequest(format!("attachment {} is not valid base64: {e}", a.filename))
                })?;
                Ok(Attachment {
                    filename: a.filename,
                    media_type: a.media_type,
                    bytes,
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;

        Ok(ExchangeRequest {
            conversation_id: self.conversation_id,
            prompt: self.prompt,
            attachments,
        })
    }
}

// ── Prompt routes ──

/// POST /prompt
pub async fn send_prompt(
    State(state): State<AppState>,
    Json(dto): Json<SendPromptDto>,
) -> Result<BlockingReply, GatewayError> {
    complete(state, dto.into_request()?).await
}

/// POST /prompt-stream
pub async fn send_prompt_stream(
    State(state): State<AppState>,
    Json(dto): Json<SendPromptDto>,
) -> Result<Response, GatewayError> {
    stream(state, dto.into_request()?).await
}

/// POST /prompt-files
pub async fn send_prompt_files(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<BlockingReply, GatewayError> {
    complete(state, read_form(multipart).await?).await
}

/// POST /prompt-stream-files
pub async fn send_prompt_stream_files(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    stream(state, read_form(multipart).await?).await
}

async fn complete(state: AppState, request: ExchangeRequest) -> Result<BlockingReply, GatewayError> {
    let cancel = state.shutdown.child_token();
    // axum drops this future when the caller disconnects
    let _cancel_on_drop = cancel.clone().drop_guard();

    let prepared = prepare(&state, request).await?;
    let message = state.pipeline.run_blocking(prepared, &cancel).await?;
    Ok(BlockingReply { message })
}

async fn stream(state: AppState, request: ExchangeRequest) -> Result<Response, GatewayError> {
    let cancel = state.shutdown.child_token();
    let prepared = prepare(&state, request).await?;
    let fragments = state.pipeline.run_streaming(prepared, cancel).await?;
    Ok(relay::sse_response(fragments))
}

/// PDF extraction is CPU-bound, keep it off the async workers.
async fn prepare(state: &AppState, request: ExchangeRequest) -> Result<PreparedExchange, GatewayError> {
    let pipeline = Arc::clone(&state.pipeline);
    tokio::task::spawn_blocking(move || pipeline.prepare(request))
        .await
        .map_err(|e| GatewayError::Io(std::io::Error::other(format!("prepare task failed: {e}"))))?
}

/// Read `conversationId`, `prompt` (or a JSON `dto` field) and any number
/// of `files` parts.
async fn read_form(mut multipart: Multipart) -> Result<ExchangeRequest, GatewayError> {
    let mut request = ExchangeRequest {
        conversation_id: String::new(),
        prompt: String::new(),
        attachments: Vec::new(),
    };

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "conversationId" => request.conversation_id = field.text().await.map_err(invalid)?,
            "prompt" => request.prompt = field.text().await.map_err(invalid)?,
            "dto" => {
                let raw = field.text().await.map_err(invalid)?;
                let dto: SendPromptDto = serde_json::from_str(&raw).map_err(invalid)?;
                let decoded = dto.into_request()?;
                request.conversation_id = decoded.conversation_id;
                request.prompt = decoded.prompt;
                request.attachments.extend(decoded.attachments);
            }
            "files" => {
                let filename = field.file_name().unwrap_or("unnamed").to_string();
                let media_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(invalid)?.to_vec();
                debug!(%filename, %media_type, size = bytes.len(), "received file");
                request.attachments.push(Attachment {
                    filename,
                    media_type,
                    bytes,
                });
            }
            other => debug!("ignoring form field '{other}'"),
        }
    }

    Ok(request)
}

fn invalid(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::InvalidRequest(e.to_string())
}

// ── History & metadata ──

/// GET /conversations/{conversation_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<Vec<Message>> {
    Json(state.pipeline.store().get_messages(&conversation_id))
}

/// GET /models
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.pipeline.models())
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
