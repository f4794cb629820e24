use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

use crate::usage::UsageDecision;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Content rejected: {0}")]
    ContentRejected(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Usage limit exceeded")]
    QuotaExceeded(Box<UsageDecision>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("AI provider error: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{vendor} request failed with status {status}: {detail}")]
    RequestFailed {
        vendor: &'static str,
        status: u16,
        detail: String,
    },

    #[error("{vendor} request timed out after {seconds}s")]
    Timeout { vendor: &'static str, seconds: u64 },

    #[error("{vendor} returned an unreadable response: {source}")]
    InvalidResponse {
        vendor: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("no default AI model configured")]
    NoModelConfigured,
}

impl ProviderError {
    pub fn vendor(&self) -> &'static str {
        match self {
            ProviderError::RequestFailed { vendor, .. } => vendor,
            ProviderError::Timeout { vendor, .. } => vendor,
            ProviderError::InvalidResponse { vendor, .. } => vendor,
            ProviderError::NoModelConfigured => "none",
        }
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::DatabaseError(DatabaseError::NotFound),
            _ => AppError::DatabaseError(DatabaseError::QueryError(err.to_string())),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        // 429 carries the full decision so clients can render
        // login / upgrade / resets-tomorrow messaging.
        if let AppError::QuotaExceeded(decision) = self {
            return HttpResponse::build(status).json(decision);
        }

        let message = match self {
            // Store and processor internals stay generic on the wire.
            AppError::InternalError(_) | AppError::DatabaseError(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(status).json(json!({
            "error": {
                "status": status.as_u16(),
                "message": message
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::ContentRejected(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ProviderError(ProviderError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ProviderError(ProviderError::NoModelConfigured) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::ProviderError(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
