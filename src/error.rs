use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::{
    audit::LogStoreError,
    producer::ProduceError,
    time::now_utc,
    types::{ApiErrorCode, ApiErrorResponse},
};

pub const VALIDATION_FAILED: &str = "Validation Failed";
pub const MESSAGING_UNAVAILABLE: &str = "Messaging service unavailable";

#[derive(Debug)]
pub enum ApiError {
    Validation {
        message: String,
        details: Option<BTreeMap<String, String>>,
    },
    Unauthorized(String),
    NotFound(String),
    Unavailable(String),
    Db(sqlx::Error),
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

impl From<ProduceError> for ApiError {
    fn from(err: ProduceError) -> Self {
        match err {
            ProduceError::Validation(details) => Self::Validation {
                message: VALIDATION_FAILED.to_string(),
                details: Some(details),
            },
            ProduceError::Unavailable(_) => Self::Unavailable(MESSAGING_UNAVAILABLE.to_string()),
        }
    }
}

impl From<LogStoreError> for ApiError {
    fn from(err: LogStoreError) -> Self {
        match err {
            LogStoreError::Db(db) => Self::Db(db),
            LogStoreError::Unavailable(message) => Self::Unavailable(message),
            LogStoreError::Parse(message) => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            ApiError::Validation { message, details } => (
                StatusCode::BAD_REQUEST,
                ApiErrorCode::Validation,
                message,
                details,
            ),
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ApiErrorCode::Unauthorized,
                message,
                None,
            ),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, ApiErrorCode::NotFound, message, None)
            }
            ApiError::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorCode::Unavailable,
                message,
                None,
            ),
            ApiError::Db(err) => {
                error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorCode::Internal,
                    "database error".to_string(),
                    None,
                )
            }
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorCode::Internal,
                message,
                None,
            ),
        };

        (
            status,
            Json(ApiErrorResponse {
                code,
                message,
                details,
                timestamp: now_utc(),
            }),
        )
            .into_response()
    }
}
