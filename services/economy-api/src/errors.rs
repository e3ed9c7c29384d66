use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use economy_core::Error as LedgerError;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Shown instead of infrastructure details
const RETRY_MESSAGE: &str = "Service temporarily unavailable, please retry later";
const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        ApiError::Internal(format!("Blocking task failed: {}", err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        let message = if status_code.is_server_error() {
            tracing::error!(error = %self, status = status_code.as_u16(), "Request failed");
            if status_code == StatusCode::SERVICE_UNAVAILABLE {
                RETRY_MESSAGE.to_string()
            } else {
                INTERNAL_MESSAGE.to_string()
            }
        } else {
            self.to_string()
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(err) => match err {
                LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
                LedgerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
                LedgerError::AlreadyApplied(_) => StatusCode::CONFLICT,
                LedgerError::AlreadyReferred(_) => StatusCode::CONFLICT,
                LedgerError::SelfReferral => StatusCode::BAD_REQUEST,
                LedgerError::UnknownReferralToken(_) => StatusCode::NOT_FOUND,
                LedgerError::Authorization(_) => StatusCode::FORBIDDEN,
                LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                LedgerError::Storage(_)
                | LedgerError::Serialization(_)
                | LedgerError::InvariantViolation(_)
                | LedgerError::Config(_)
                | LedgerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Nats(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    fn error_type(&self) -> &str {
        match self {
            ApiError::Ledger(err) => err.code(),
            ApiError::Validation(_) => "validation_error",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Nats(_) => "messaging_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}
