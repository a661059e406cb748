//! HTTP surface.
//!
//! ```text
//! POST /prompt                              JSON in, { message } out
//! POST /prompt-stream                       JSON in, text/event-stream out
//! POST /prompt-files                        multipart in, { message } out
//! POST /prompt-stream-files                 multipart in, text/event-stream out
//! GET  /conversations/{id}/messages
//! GET  /models
//! GET  /health
//! ```

pub mod chat;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::pipeline::ChatPipeline;

/// Router state; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/prompt", post(chat::send_prompt))
        .route("/prompt-stream", post(chat::send_prompt_stream))
        .route("/prompt-files", post(chat::send_prompt_files))
        .route("/prompt-stream-files", post(chat::send_prompt_stream_files))
        .route("/conversations/{conversation_id}/messages", get(chat::get_messages))
        .route("/models", get(chat::list_models))
        .route("/health", get(chat::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
