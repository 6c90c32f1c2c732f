use crate::services::error::ServiceError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use std::fmt;

/// A failed call, rendered as `{ "success": false, "message": ..., ...data }`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Extra fields merged into the body next to `message`.
    pub data: Map<String, Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            data: Map::new(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = Map::new();
        body.insert("success".into(), json!(false));
        body.insert("message".into(), json!(self.message));
        body.extend(self.data);

        let mut response = (self.status, Json(Value::Object(body))).into_response();
        response.extensions_mut().insert(Failure);
        response
    }
}

/// Marks a response rendered from an [`AppError`].
#[derive(Clone, Copy, Debug)]
pub struct Failure;

/// Response mapper that sends failure envelopes with `200 OK`, leaving
/// `success: false` as the only failure signal.
pub async fn failures_as_ok(mut response: Response) -> Response {
    if response.extensions().get::<Failure>().is_some() {
        *response.status_mut() = StatusCode::OK;
    }
    response
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Validation(_) => AppError::bad_request(message),
            ServiceError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, message),
            ServiceError::Conflict(_) => AppError::new(StatusCode::CONFLICT, message),
            ServiceError::Permission(_) => AppError::new(StatusCode::FORBIDDEN, message),
            ServiceError::Store(ref source) => {
                tracing::error!("store failure: {:?}", source);
                AppError::internal(message)
            }
            ServiceError::PartialDelete { .. } => AppError::internal(message),
            ServiceError::Upload { committed, .. } => AppError::internal(message)
                .with("files", serde_json::to_value(committed).unwrap_or_default()),
        }
    }
}
