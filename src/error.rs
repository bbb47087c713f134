use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl AppError {
    /// HTTP status reported for this error kind
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidStateTransition(_) => StatusCode::CONFLICT,
            AppError::InvalidFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Decryption(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized(_) | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable application code, distinct per error kind.
    /// Kinds sharing an HTTP status are told apart by this code.
    pub fn code(&self) -> i32 {
        match self {
            AppError::Unauthorized(_) | AppError::Jwt(_) => 401,
            AppError::AccessDenied(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::BadRequest(_) => 400,
            AppError::PayloadTooLarge(_) => 413,
            AppError::InvalidStateTransition(_) => 4091,
            AppError::InvalidFormat(_) => 4221,
            AppError::Decryption(_) => 4222,
            AppError::Internal(_) | AppError::Io(_) => 500,
            AppError::Storage(_) => 5031,
            AppError::Database(_) => 5032,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Storage(_) | AppError::Database(_))
    }
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
            retryable: false,
        }
    }

    pub fn success_message(message: &str) -> ApiResponse<()> {
        ApiResponse {
            code: 0,
            message: message.to_string(),
            data: None,
            retryable: false,
        }
    }

    pub fn error(code: i32, message: &str, retryable: bool) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
            retryable,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                "IO error".to_string()
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                "Invalid token".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                msg.clone()
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                msg.clone()
            }
            AppError::AccessDenied(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidStateTransition(msg)
            | AppError::InvalidFormat(msg)
            | AppError::Decryption(msg)
            | AppError::Conflict(msg)
            | AppError::Unauthorized(msg)
            | AppError::BadRequest(msg)
            | AppError::PayloadTooLarge(msg) => msg.clone(),
        };

        let body = Json(ApiResponse::<()>::error(
            self.code(),
            &message,
            self.is_retryable(),
        ));
        (self.status(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn core_kinds() -> Vec<AppError> {
        vec![
            AppError::AccessDenied("x".into()),
            AppError::NotFound("x".into()),
            AppError::InvalidStateTransition("x".into()),
            AppError::InvalidFormat("x".into()),
            AppError::Decryption("x".into()),
            AppError::Conflict("x".into()),
            AppError::Storage("x".into()),
        ]
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes: HashSet<i32> = core_kinds().iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), core_kinds().len());
    }

    #[test]
    fn test_only_storage_is_retryable() {
        for err in core_kinds() {
            let expected = matches!(err, AppError::Storage(_));
            assert_eq!(err.is_retryable(), expected, "{}", err);
        }
    }

    #[test]
    fn test_response_status() {
        let resp = AppError::AccessDenied("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = AppError::Storage("disk".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
