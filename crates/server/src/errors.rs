use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use service::{FlashError, Recovered};
use tracing::error;

/// JSON error response: `{"error": ..., "code": ...}` plus any extra fields.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self { status, body: json!({ "error": msg.into() }) }
    }

    pub fn missing_session() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "no session id on request; flash unavailable")
    }
}

impl From<FlashError> for ApiError {
    fn from(err: FlashError) -> Self {
        let code = err.code();
        let msg = err.to_string();
        match err {
            FlashError::BackendUnavailable(_) => {
                error!(error = %msg, code, "flash backend unavailable");
                Self { status: StatusCode::SERVICE_UNAVAILABLE, body: json!({ "error": msg, "code": code }) }
            }
            FlashError::InvalidCategory => {
                Self { status: StatusCode::BAD_REQUEST, body: json!({ "error": msg, "code": code }) }
            }
            // the data was read, so the caller still gets it
            FlashError::PartialConsumption { category, recovered, .. } => {
                let body = match recovered {
                    Recovered::Message(message) => json!({
                        "partial": true, "error": msg, "code": code, "category": category, "message": message,
                    }),
                    Recovered::All(messages) => json!({
                        "partial": true, "error": msg, "code": code, "messages": messages,
                    }),
                };
                Self { status: StatusCode::OK, body }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
