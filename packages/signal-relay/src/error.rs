use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur in the relay
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Platform rejected request ({status}): {message}")]
    Platform { status: u16, message: String },

    #[error("Stream not registered: {0}")]
    StreamNotRegistered(String),

    #[error("Producer already active on stream {0}")]
    ProducerActive(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RelayError {
    fn code(&self) -> &'static str {
        match self {
            RelayError::Connection(_) | RelayError::WebSocket(_) => "CONNECTION_ERROR",
            RelayError::Decode(_) => "DECODE_ERROR",
            RelayError::Http(_) | RelayError::Platform { .. } => "PLATFORM_ERROR",
            RelayError::StreamNotRegistered(_) => "STREAM_NOT_REGISTERED",
            RelayError::ProducerActive(_) => "PRODUCER_ACTIVE",
            RelayError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RelayError::StreamNotRegistered(_) => StatusCode::NOT_FOUND,
            RelayError::ProducerActive(_) => StatusCode::CONFLICT,
            RelayError::InvalidInput(_) | RelayError::Decode(_) => StatusCode::BAD_REQUEST,
            RelayError::Connection(_)
            | RelayError::WebSocket(_)
            | RelayError::Http(_)
            | RelayError::Platform { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Error body returned by HTTP handlers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
