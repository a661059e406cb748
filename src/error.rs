use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(LlmError),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LlmError> for GatewayError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => GatewayError::Cancelled,
            other => GatewayError::BackendUnavailable(other),
        }
    }
}

impl GatewayError {
    fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config",
            GatewayError::BackendUnavailable(_) => "backend_unavailable",
            GatewayError::Cancelled => "cancelled",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Logger(_) | GatewayError::Io(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            // nginx's "client closed request"; nobody is left to read it
            GatewayError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            GatewayError::Config(_) | GatewayError::Logger(_) | GatewayError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
