//! HTTP error responses.
//!
//! # Design
//! Every failure leaves the server as `{ "code", "message", "details"? }`.
//! `NotFound` becomes 404 and validation failures become 400 with one
//! `details` entry per rejected field. Unparseable query parameters are 400
//! `INVALID_PARAMETER`. Store failures become 500 and their text is logged,
//! never sent to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use todo_core::{FieldError, TodoError};

/// JSON body of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone)]
pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn validation(details: Vec<FieldError>) -> Self {
        let mut response =
            Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Validation failed");
        response.body.details = Some(details);
        response
    }

    /// A query-string parameter that could not be parsed.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAMETER", message)
    }

    pub fn internal_error() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "An internal error occurred",
        )
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<TodoError> for ApiErrorResponse {
    fn from(error: TodoError) -> Self {
        match error {
            TodoError::NotFound { .. } => Self::not_found(error.to_string()),
            TodoError::Validation(validation) => Self::validation(validation.errors),
            TodoError::Store(store) => {
                tracing::error!(error = %store, "record store failure");
                Self::internal_error()
            }
        }
    }
}
