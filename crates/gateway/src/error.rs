//! HTTP-facing error mapping for the chat completions flow.
//!
//! Every failure leaving the gateway is wrapped in the
//! `{"error": {"message", "type", "code"}}` envelope; the `code` field
//! mirrors the HTTP status.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    thiserror::Error,
};

use switchboard_protocol::ErrorEnvelope;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("no idle client connection available, retry later")]
    ServiceUnavailable,

    #[error("client did not respond before the request deadline")]
    Timeout,

    /// The client replied with an error object of its own.
    #[error("{message}")]
    Client { message: String, kind: String },

    #[error("client returned an empty response")]
    EmptyResponse,

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Client { .. } | Self::EmptyResponse | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    fn kind(&self) -> String {
        match self {
            Self::Validation(_) => "validation_error".into(),
            Self::ServiceUnavailable => "service_unavailable".into(),
            Self::Timeout => "timeout".into(),
            Self::Client { kind, .. } => kind.clone(),
            Self::EmptyResponse => "empty_response".into(),
            Self::Internal(_) => "internal_error".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = ErrorEnvelope::new(self.to_string(), self.kind(), status.as_u16());
        (status, Json(envelope)).into_response()
    }
}
