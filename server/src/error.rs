use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::model::FieldErrors;

/// Every failure a caller can observe. The `Display` text is the message
/// placed in the response envelope, so variants carrying a `String` must be
/// given caller-safe text, never a driver or parser message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("User not found. Please register first.")]
    NotRegistered,

    #[error("Server configuration error")]
    Configuration,

    #[error("{0}")]
    Dependency(String),

    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Monthly limit ({0}) reached")]
    QuotaExceeded(u64),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotImplemented(String),
}

impl ApiError {
    pub fn unauthenticated(message: &str) -> Self {
        ApiError::Unauthenticated(message.to_string())
    }

    pub fn bad_request(message: &str) -> Self {
        ApiError::BadRequest(message.to_string())
    }

    pub fn not_found(message: &str) -> Self {
        ApiError::NotFound(message.to_string())
    }

    pub fn dependency(message: &str) -> Self {
        ApiError::Dependency(message.to_string())
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a FieldErrors>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotRegistered | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Configuration | ApiError::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let fields = match self {
            ApiError::Validation(fields) => Some(fields),
            _ => None,
        };
        let body = ErrorEnvelope {
            success: false,
            error: ErrorDetail { message: self.to_string(), fields },
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[derive(Serialize)]
struct SuccessEnvelope<T> {
    success: bool,
    data: T,
}

/// `{ "success": true, "data": ... }` with the given status.
pub fn success<T: Serialize>(status: StatusCode, data: T) -> HttpResponse {
    HttpResponse::build(status).json(SuccessEnvelope { success: true, data })
}
